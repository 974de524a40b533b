//! Groups one skill's matched outcomes into scored course matches.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::filter::CourseFilter;
use crate::model::{CourseMatch, CourseWithOutcomes, MatchedLearningOutcome};
use crate::store::LearningOutcomeStore;

/// Groups one skill's matched outcomes by course.
pub struct CourseAggregator {
    store: Arc<dyn LearningOutcomeStore>,
}

impl CourseAggregator {
    /// Aggregator resolving courses through `store`.
    pub fn new(store: Arc<dyn LearningOutcomeStore>) -> Self {
        Self { store }
    }

    /// Course matches for `skill`, best score first.
    ///
    /// `filter` must be the predicate the outcomes were retrieved with. An
    /// empty `matched` list returns immediately without touching the store.
    pub async fn aggregate(
        &self,
        skill: &str,
        matched: &[MatchedLearningOutcome],
        filter: &CourseFilter,
    ) -> Result<Vec<CourseMatch>> {
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::with_capacity(matched.len());
        let ids: Vec<Uuid> = matched
            .iter()
            .map(MatchedLearningOutcome::id)
            .filter(|id| seen.insert(*id))
            .collect();
        let courses_by_outcome = self
            .store
            .find_courses_by_learning_outcome_ids(&ids, filter)
            .await?;

        let matches = build_matches(skill, matched, courses_by_outcome);
        debug!(skill, outcomes = ids.len(), courses = matches.len(), "aggregated course matches");
        Ok(matches)
    }
}

fn build_matches(
    skill: &str,
    matched: &[MatchedLearningOutcome],
    courses_by_outcome: HashMap<Uuid, Vec<CourseWithOutcomes>>,
) -> Vec<CourseMatch> {
    let known: HashSet<Uuid> = matched.iter().map(MatchedLearningOutcome::id).collect();
    for outcome_id in courses_by_outcome.keys() {
        if !known.contains(outcome_id) {
            warn!(
                skill,
                learning_outcome_id = %outcome_id,
                "resolved learning outcome missing from matched set; skipping"
            );
        }
    }

    let mut slots: HashMap<Uuid, usize> = HashMap::new();
    let mut building: Vec<CourseMatch> = Vec::new();
    let mut attached: HashSet<Uuid> = HashSet::new();
    for outcome in matched {
        if !attached.insert(outcome.id()) {
            continue;
        }
        let Some(courses) = courses_by_outcome.get(&outcome.id()) else {
            continue;
        };
        for resolved in courses {
            let slot = *slots.entry(resolved.course.id).or_insert_with(|| {
                building.push(CourseMatch {
                    course: resolved.course.clone(),
                    score: f64::NEG_INFINITY,
                    matched_learning_outcomes: Vec::new(),
                    remaining_learning_outcomes: Vec::new(),
                    all_learning_outcomes: resolved.learning_outcomes.clone(),
                });
                building.len() - 1
            });
            building[slot].matched_learning_outcomes.push(outcome.clone());
        }
    }

    for course_match in &mut building {
        finalize(course_match);
    }
    building.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.course.subject_code.cmp(&b.course.subject_code))
            .then_with(|| a.course.id.cmp(&b.course.id))
    });
    building
}

fn finalize(course_match: &mut CourseMatch) {
    course_match.matched_learning_outcomes.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id().cmp(&b.id()))
    });
    let matched: HashSet<Uuid> = course_match
        .matched_learning_outcomes
        .iter()
        .map(MatchedLearningOutcome::id)
        .collect();
    course_match.remaining_learning_outcomes = course_match
        .all_learning_outcomes
        .iter()
        .filter(|outcome| !matched.contains(&outcome.id))
        .cloned()
        .collect();
    course_match.score = course_match
        .matched_learning_outcomes
        .iter()
        .map(|outcome| outcome.similarity_score)
        .fold(f64::NEG_INFINITY, f64::max);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Campus, CourseRecord, LearningOutcome};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn course(id: u128, code: &str) -> CourseRecord {
        let campus = Campus {
            id: Uuid::from_u128(1),
            code: "C1".into(),
            name_en: "Campus".into(),
            name_th: "วิทยาเขต".into(),
        };
        CourseRecord {
            id: Uuid::from_u128(id),
            campus_id: campus.id,
            faculty_id: Uuid::from_u128(2),
            subject_code: code.into(),
            subject_name: code.into(),
            is_gen_ed: false,
            metadata: json!({}),
            faculty: crate::model::Faculty {
                id: Uuid::from_u128(2),
                code: "F".into(),
                name_en: "Faculty".into(),
                name_th: "คณะ".into(),
                campus_id: campus.id,
            },
            campus,
        }
    }

    fn outcome(id: u128, course: u128, clo_no: i32) -> LearningOutcome {
        LearningOutcome {
            id: Uuid::from_u128(id),
            course_id: Uuid::from_u128(course),
            clo_no,
            original_name: format!("outcome {id}"),
            cleaned_name: format!("outcome {id}"),
            skip_embedding: false,
            has_embedding_768: true,
            has_embedding_1536: false,
            vector_id: Some(Uuid::from_u128(id + 900)),
        }
    }

    fn matched(outcome: LearningOutcome, score: f64) -> MatchedLearningOutcome {
        MatchedLearningOutcome {
            learning_outcome: outcome,
            similarity_score: score,
        }
    }

    fn store() -> Arc<MemoryStore> {
        let mut store = MemoryStore::new();
        store.insert_course(course(10, "A"));
        store.insert_course(course(20, "B"));
        for lo in [outcome(1, 10, 1), outcome(2, 10, 2), outcome(4, 10, 3), outcome(3, 20, 1)] {
            store.insert_learning_outcome(lo);
        }
        Arc::new(store)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn empty_input_issues_no_store_call() {
        let store = store();
        let aggregator = CourseAggregator::new(store.clone());
        let result = aggregator.aggregate("x", &[], &CourseFilter::default()).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(store.resolution_calls(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn groups_scores_and_splits_remaining() {
        let store = store();
        let aggregator = CourseAggregator::new(store.clone());
        let input = vec![
            matched(outcome(1, 10, 1), 0.9),
            matched(outcome(2, 10, 2), 0.8),
            matched(outcome(3, 20, 1), 0.7),
        ];
        let result = aggregator.aggregate("x", &input, &CourseFilter::default()).await.unwrap();
        assert_eq!(store.resolution_calls(), 1);
        let codes: Vec<&str> = result.iter().map(|m| m.course.subject_code.as_str()).collect();
        assert_eq!(codes, vec!["A", "B"]);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.7);
        let a_matched: Vec<Uuid> = result[0].matched_learning_outcomes.iter().map(|m| m.id()).collect();
        assert_eq!(a_matched, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);
        let a_remaining: Vec<Uuid> = result[0].remaining_learning_outcomes.iter().map(|o| o.id).collect();
        assert_eq!(a_remaining, vec![Uuid::from_u128(4)]);
        assert_eq!(result[0].all_learning_outcomes.len(), 3);
        assert!(result[1].remaining_learning_outcomes.is_empty());
    }

    #[test]
    fn resolved_ids_outside_matched_set_are_skipped() {
        let resolved = CourseWithOutcomes {
            course: course(10, "A"),
            learning_outcomes: vec![outcome(1, 10, 1)],
        };
        let mut by_outcome = HashMap::new();
        by_outcome.insert(Uuid::from_u128(99), vec![resolved]);
        let matches = build_matches("x", &[matched(outcome(1, 10, 1), 0.9)], by_outcome);
        assert!(matches.is_empty());
    }
}
