//! Skill embedding plus vector search.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::embeddings::{
    zip_positional, EmbeddingConfiguration, EmbeddingRole, EmbeddingRouter, EmbeddingUsage,
};
use crate::error::Result;
use crate::filter::CourseFilter;
use crate::model::MatchedLearningOutcome;
use crate::ranking::SearchLimits;
use crate::store::{LearningOutcomeStore, SkillVector};

/// Matched outcomes keyed by skill.
pub type OutcomesBySkill = HashMap<String, Vec<MatchedLearningOutcome>>;

/// Embeds skills in one batch and searches the catalogue with the vectors.
pub struct LearningOutcomeRetriever {
    router: Arc<dyn EmbeddingRouter>,
    store: Arc<dyn LearningOutcomeStore>,
}

impl LearningOutcomeRetriever {
    /// Retriever over `router` and `store`.
    pub fn new(router: Arc<dyn EmbeddingRouter>, store: Arc<dyn LearningOutcomeStore>) -> Self {
        Self { router, store }
    }

    /// Embeds every skill in one batch, then runs a single search.
    ///
    /// Each skill in `skills` gets a key in the returned map, possibly with an
    /// empty list. No embedding or store call is made for empty input.
    pub async fn find_los_by_skills(
        &self,
        skills: &[String],
        configuration: &EmbeddingConfiguration,
        filter: &CourseFilter,
        limits: SearchLimits,
    ) -> Result<(OutcomesBySkill, EmbeddingUsage)> {
        if skills.is_empty() {
            return Ok((HashMap::new(), EmbeddingUsage::default()));
        }

        let results = self
            .router
            .embed_many(skills, configuration, EmbeddingRole::Query)
            .await?;
        let pairs = zip_positional(skills, results, configuration)?;
        let usage = EmbeddingUsage::from_pairs(pairs.iter().map(|(skill, result)| (skill.as_str(), result)));
        let vectors: Vec<SkillVector> = pairs
            .into_iter()
            .map(|(skill, result)| SkillVector {
                skill,
                vector: result.vector,
            })
            .collect();

        let mut found = self
            .store
            .search_learning_outcomes_by_skill_vectors(&vectors, configuration.dimension, filter, limits)
            .await?;
        for skill in skills {
            let outcomes = found.entry(skill.clone()).or_default();
            sort_by_similarity(outcomes);
        }
        debug!(
            skills = skills.len(),
            matches = found.values().map(Vec::len).sum::<usize>(),
            prompt_tokens = usage.total_prompt_tokens,
            "retrieved learning outcomes"
        );
        Ok((found, usage))
    }
}

pub(crate) fn sort_by_similarity(outcomes: &mut [MatchedLearningOutcome]) {
    outcomes.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id().cmp(&b.id()))
    });
}
