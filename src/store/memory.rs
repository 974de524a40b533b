//! In-process catalogue that evaluates searches the way the SQL does: one raw
//! row per (skill, outcome, qualifying offering), collapsed before ranking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::embeddings::EmbeddingDimension;
use crate::error::{Result, RetrievalError};
use crate::filter::CourseFilter;
use crate::model::{
    CourseOffering, CourseRecord, CourseWithOutcomes, EmbeddingVector, LearningOutcome,
    MatchedLearningOutcome,
};
use crate::ranking::{cosine_similarity, select_top_vectors, ScoredRow, SearchLimits};
use crate::store::{LearningOutcomeStore, SkillVector};

/// Catalogue held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    courses: HashMap<Uuid, CourseRecord>,
    offerings: Vec<CourseOffering>,
    outcomes: Vec<LearningOutcome>,
    vectors: HashMap<Uuid, EmbeddingVector>,
    search_calls: AtomicUsize,
    resolution_calls: AtomicUsize,
}

impl MemoryStore {
    /// Empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a course.
    pub fn insert_course(&mut self, course: CourseRecord) {
        self.courses.insert(course.id, course);
    }

    /// Adds an offering.
    pub fn insert_offering(&mut self, offering: CourseOffering) {
        self.offerings.push(offering);
    }

    /// Adds a learning outcome.
    pub fn insert_learning_outcome(&mut self, outcome: LearningOutcome) {
        self.outcomes.push(outcome);
    }

    /// Adds or replaces a vector row.
    pub fn insert_vector(&mut self, vector: EmbeddingVector) {
        self.vectors.insert(vector.id, vector);
    }

    /// Number of search queries served.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::Acquire)
    }

    /// Number of course-resolution queries served.
    pub fn resolution_calls(&self) -> usize {
        self.resolution_calls.load(Ordering::Acquire)
    }

    fn join_multiplicity(&self, course: &CourseRecord, filter: &CourseFilter) -> usize {
        filter.join_multiplicity(course, &self.offerings)
    }

    fn with_outcomes(&self, course: &CourseRecord) -> CourseWithOutcomes {
        let mut learning_outcomes: Vec<LearningOutcome> = self
            .outcomes
            .iter()
            .filter(|outcome| outcome.course_id == course.id)
            .cloned()
            .collect();
        learning_outcomes.sort_by(|a, b| a.clo_no.cmp(&b.clo_no).then_with(|| a.id.cmp(&b.id)));
        CourseWithOutcomes {
            course: course.clone(),
            learning_outcomes,
        }
    }

    /// Raw candidate rows for one skill, repeated per qualifying offering.
    fn raw_rows(
        &self,
        skill: &SkillVector,
        dimension: EmbeddingDimension,
        filter: &CourseFilter,
    ) -> Vec<ScoredRow> {
        let mut rows = Vec::new();
        for outcome in &self.outcomes {
            if !outcome.is_searchable(dimension) {
                continue;
            }
            let Some(vector_id) = outcome.vector_id else {
                continue;
            };
            let Some(embedding) = self
                .vectors
                .get(&vector_id)
                .and_then(|vector| vector.embedding(dimension))
            else {
                continue;
            };
            let Some(course) = self.courses.get(&outcome.course_id) else {
                continue;
            };
            let Some(similarity) = cosine_similarity(embedding, &skill.vector) else {
                continue;
            };
            let copies = self.join_multiplicity(course, filter);
            for _ in 0..copies {
                rows.push(ScoredRow {
                    learning_outcome_id: outcome.id,
                    vector_id,
                    similarity,
                });
            }
        }
        rows
    }
}

#[async_trait]
impl LearningOutcomeStore for MemoryStore {
    async fn search_learning_outcomes_by_skill_vectors(
        &self,
        skills: &[SkillVector],
        dimension: EmbeddingDimension,
        filter: &CourseFilter,
        limits: SearchLimits,
    ) -> Result<HashMap<String, Vec<MatchedLearningOutcome>>> {
        self.search_calls.fetch_add(1, Ordering::AcqRel);
        let by_id: HashMap<Uuid, &LearningOutcome> =
            self.outcomes.iter().map(|outcome| (outcome.id, outcome)).collect();
        let mut out = HashMap::with_capacity(skills.len());
        for skill in skills {
            let selected = select_top_vectors(self.raw_rows(skill, dimension, filter), limits);
            let matches = selected
                .into_iter()
                .filter_map(|row| {
                    by_id
                        .get(&row.learning_outcome_id)
                        .map(|outcome| MatchedLearningOutcome {
                            learning_outcome: (*outcome).clone(),
                            similarity_score: row.similarity,
                        })
                })
                .collect();
            out.insert(skill.skill.clone(), matches);
        }
        Ok(out)
    }

    async fn find_courses_by_learning_outcome_ids(
        &self,
        learning_outcome_ids: &[Uuid],
        filter: &CourseFilter,
    ) -> Result<HashMap<Uuid, Vec<CourseWithOutcomes>>> {
        self.resolution_calls.fetch_add(1, Ordering::AcqRel);
        let mut out: HashMap<Uuid, Vec<CourseWithOutcomes>> = HashMap::new();
        for id in learning_outcome_ids {
            let Some(outcome) = self.outcomes.iter().find(|outcome| outcome.id == *id) else {
                continue;
            };
            let Some(course) = self.courses.get(&outcome.course_id) else {
                continue;
            };
            if self.join_multiplicity(course, filter) == 0 {
                continue;
            }
            out.entry(*id).or_default().push(self.with_outcomes(course));
        }
        Ok(out)
    }

    async fn find_course_by_id(&self, course_id: Uuid) -> Result<CourseWithOutcomes> {
        self.courses
            .get(&course_id)
            .map(|course| self.with_outcomes(course))
            .ok_or(RetrievalError::CourseNotFound(course_id))
    }
}
