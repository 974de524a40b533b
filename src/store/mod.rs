//! Read-only catalogue access used by the retriever and aggregator.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::embeddings::EmbeddingDimension;
use crate::error::Result;
use crate::filter::CourseFilter;
use crate::model::{CourseWithOutcomes, MatchedLearningOutcome};
use crate::ranking::SearchLimits;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A skill paired with its query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillVector {
    /// Skill text.
    pub skill: String,
    /// Query embedding of `skill`.
    pub vector: Vec<f32>,
}

/// Catalogue queries. Implementations never write.
#[async_trait]
pub trait LearningOutcomeStore: Send + Sync {
    /// Ranked outcome matches per skill.
    ///
    /// Every input skill has an entry, empty when nothing passes the
    /// threshold. Lists are sorted by similarity descending and contain each
    /// outcome at most once.
    async fn search_learning_outcomes_by_skill_vectors(
        &self,
        skills: &[SkillVector],
        dimension: EmbeddingDimension,
        filter: &CourseFilter,
        limits: SearchLimits,
    ) -> Result<HashMap<String, Vec<MatchedLearningOutcome>>>;

    /// Courses owning each outcome id that still satisfy `filter`.
    async fn find_courses_by_learning_outcome_ids(
        &self,
        learning_outcome_ids: &[Uuid],
        filter: &CourseFilter,
    ) -> Result<HashMap<Uuid, Vec<CourseWithOutcomes>>>;

    /// Single course with its full outcome list.
    async fn find_course_by_id(&self, course_id: Uuid) -> Result<CourseWithOutcomes>;
}
