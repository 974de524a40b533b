//! Request pipeline: embed, search, optionally judge, then aggregate per skill.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregator::CourseAggregator;
use crate::embeddings::{EmbeddingConfiguration, EmbeddingRouter, EmbeddingUsage};
use crate::error::{Result, RetrievalError};
use crate::filter::CourseFilter;
use crate::model::{CourseMatch, CourseWithOutcomes, MatchedLearningOutcome};
use crate::ranking::SearchLimits;
use crate::relevance::RelevanceFilter;
use crate::retriever::LearningOutcomeRetriever;
use crate::store::LearningOutcomeStore;

/// Largest topN a caller may ask for unless reconfigured.
pub const DEFAULT_MAX_TOP_N: usize = 50;

/// Inputs of [`RetrievalOrchestrator::get_courses_by_skills_with_filter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalRequest {
    /// Skill phrases; trimmed and de-duplicated before use.
    pub skills: Vec<String>,
    /// Course restrictions applied at search and resolution.
    #[serde(default)]
    pub filter: CourseFilter,
    /// Model and width to embed skills with.
    pub embedding_configuration: EmbeddingConfiguration,
    /// Overrides the default similarity threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Overrides the default number of ranked vectors per skill.
    #[serde(default, rename = "topN", skip_serializing_if = "Option::is_none")]
    pub top_n: Option<usize>,
    /// Run the LLM relevance judge over each skill's matches.
    #[serde(default)]
    pub enable_llm_filter: bool,
}

impl RetrievalRequest {
    /// Request with an empty filter, default limits and no judge.
    pub fn new(skills: Vec<String>, embedding_configuration: EmbeddingConfiguration) -> Self {
        Self {
            skills,
            filter: CourseFilter::default(),
            embedding_configuration,
            threshold: None,
            top_n: None,
            enable_llm_filter: false,
        }
    }
}

/// Course matches per skill plus embedding accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResponse {
    /// One entry per distinct skill, possibly empty.
    pub courses_by_skill: HashMap<String, Vec<CourseMatch>>,
    /// Token usage of the embedding call.
    pub embedding_usage: EmbeddingUsage,
}

/// Trims, drops blanks and de-duplicates skills, keeping first-seen order.
pub fn distinct_skills(skills: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(skills.len());
    for skill in skills {
        let trimmed = skill.trim();
        if trimmed.is_empty() || out.iter().any(|seen| seen == trimmed) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

/// Runs the skill to course pipeline for one request at a time.
pub struct RetrievalOrchestrator {
    retriever: LearningOutcomeRetriever,
    aggregator: CourseAggregator,
    relevance: Option<RelevanceFilter>,
    store: Arc<dyn LearningOutcomeStore>,
    defaults: SearchLimits,
    max_top_n: usize,
}

impl RetrievalOrchestrator {
    /// Pipeline over `store`. Without `relevance`, requests asking for the LLM
    /// filter are rejected.
    pub fn new(
        router: Arc<dyn EmbeddingRouter>,
        store: Arc<dyn LearningOutcomeStore>,
        relevance: Option<RelevanceFilter>,
    ) -> Self {
        Self {
            retriever: LearningOutcomeRetriever::new(router, store.clone()),
            aggregator: CourseAggregator::new(store.clone()),
            relevance,
            store,
            defaults: SearchLimits::default(),
            max_top_n: DEFAULT_MAX_TOP_N,
        }
    }

    /// Threshold and topN used when a request leaves them unset.
    pub fn with_defaults(mut self, defaults: SearchLimits) -> Self {
        self.defaults = defaults;
        self
    }

    /// Largest topN a request may ask for.
    pub fn with_max_top_n(mut self, max_top_n: usize) -> Self {
        self.max_top_n = max_top_n.max(1);
        self
    }

    fn limits_for(&self, request: &RetrievalRequest) -> Result<SearchLimits> {
        let limits = SearchLimits::new(
            request.threshold.unwrap_or(self.defaults.threshold),
            request.top_n.unwrap_or(self.defaults.top_n),
        )?;
        if limits.top_n > self.max_top_n {
            return Err(RetrievalError::Configuration(format!(
                "topN {} exceeds the maximum of {}",
                limits.top_n, self.max_top_n
            )));
        }
        Ok(limits)
    }

    /// Course matches per distinct skill plus embedding usage.
    ///
    /// Cancelling `cancel` aborts whichever stage is in flight.
    pub async fn get_courses_by_skills_with_filter(
        &self,
        request: &RetrievalRequest,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResponse> {
        let limits = self.limits_for(request)?;
        let relevance = match (request.enable_llm_filter, &self.relevance) {
            (false, _) => None,
            (true, Some(relevance)) => Some(relevance),
            (true, None) => {
                return Err(RetrievalError::Configuration(
                    "LLM relevance filter requested but no judge is configured".to_string(),
                ))
            }
        };
        let skills = distinct_skills(&request.skills);
        if cancel.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(skills = skills.len(), "retrieval cancelled");
                Err(RetrievalError::Cancelled)
            }
            response = self.run(&skills, request, limits, relevance) => response,
        }
    }

    async fn run(
        &self,
        skills: &[String],
        request: &RetrievalRequest,
        limits: SearchLimits,
        relevance: Option<&RelevanceFilter>,
    ) -> Result<RetrievalResponse> {
        let (mut found, embedding_usage) = self
            .retriever
            .find_los_by_skills(skills, &request.embedding_configuration, &request.filter, limits)
            .await?;

        let mut batches: Vec<(String, Vec<MatchedLearningOutcome>)> = skills
            .iter()
            .map(|skill| {
                let matched = found.remove(skill).unwrap_or_default();
                (skill.clone(), matched)
            })
            .collect();
        if let Some(relevance) = relevance {
            batches = relevance.filter_all(batches).await;
        }

        let filter = &request.filter;
        let aggregated = try_join_all(batches.iter().map(|(skill, matched)| async move {
            let courses = self.aggregator.aggregate(skill, matched, filter).await?;
            Ok::<_, RetrievalError>((skill.clone(), courses))
        }))
        .await?;

        debug!(
            skills = skills.len(),
            courses = aggregated.iter().map(|(_, courses)| courses.len()).sum::<usize>(),
            llm_filter = relevance.is_some(),
            "retrieval complete"
        );
        Ok(RetrievalResponse {
            courses_by_skill: aggregated.into_iter().collect(),
            embedding_usage,
        })
    }

    /// Single course with its full outcome list.
    pub async fn get_course_by_id(
        &self,
        course_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<CourseWithOutcomes> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RetrievalError::Cancelled),
            course = self.store.find_course_by_id(course_id) => course,
        }
    }
}
