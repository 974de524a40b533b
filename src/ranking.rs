//! Candidate ranking: duplicate collapse, per-vector ranking and tie inclusion.
//!
//! `topN` bounds distinct vectors, not outcomes. Every outcome that aliases a
//! selected vector is returned, so the outcome count can exceed `topN`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::{Result, RetrievalError};

/// Default minimum similarity.
pub const DEFAULT_THRESHOLD: f64 = 0.75;
/// Default number of ranked vectors kept per skill.
pub const DEFAULT_TOP_N: usize = 10;

/// Threshold and topN bounds for one search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchLimits {
    /// Minimum similarity a vector must reach.
    pub threshold: f64,
    /// Distinct vectors kept per skill.
    pub top_n: usize,
}

impl SearchLimits {
    /// Validated limits.
    pub fn new(threshold: f64, top_n: usize) -> Result<Self> {
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(RetrievalError::Configuration(format!(
                "threshold {threshold} must be within [-1, 1]"
            )));
        }
        if top_n == 0 {
            return Err(RetrievalError::Configuration(
                "topN must be at least 1".to_string(),
            ));
        }
        Ok(Self { threshold, top_n })
    }
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// One (skill, outcome) similarity row from the raw candidate join.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredRow {
    /// Candidate outcome.
    pub learning_outcome_id: Uuid,
    /// Vector row the outcome points at.
    pub vector_id: Uuid,
    /// Similarity against the skill vector.
    pub similarity: f64,
}

/// `1 - cosine distance`, or `None` when either input has zero norm. Such
/// pairs are not candidates at all, matching the SQL store.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Collapses repeated outcome rows (one per matching offering) to one row per
/// outcome, keeping the highest similarity.
pub fn collapse_duplicates<I>(rows: I) -> Vec<ScoredRow>
where
    I: IntoIterator<Item = ScoredRow>,
{
    let mut best: HashMap<Uuid, ScoredRow> = HashMap::new();
    for row in rows {
        best.entry(row.learning_outcome_id)
            .and_modify(|existing| {
                if row.similarity > existing.similarity {
                    *existing = row;
                }
            })
            .or_insert(row);
    }
    best.into_values().collect()
}

struct RankedVector {
    vector_id: Uuid,
    similarity: f64,
    tie_key: Uuid,
}

fn by_similarity_then_id(a_sim: f64, a_id: Uuid, b_sim: f64, b_id: Uuid) -> Ordering {
    b_sim.total_cmp(&a_sim).then_with(|| a_id.cmp(&b_id))
}

/// Ranks distinct vectors per skill and expands the winners to outcomes.
///
/// Vectors are ordered by similarity descending, ties broken by the smallest
/// outcome id referencing the vector. The first `top_n` vectors whose
/// similarity reaches `threshold` are kept; the result lists every outcome
/// aliasing a kept vector, sorted by similarity descending then outcome id.
pub fn select_top_vectors(rows: Vec<ScoredRow>, limits: SearchLimits) -> Vec<ScoredRow> {
    let deduped = collapse_duplicates(rows);

    let mut vectors: HashMap<Uuid, RankedVector> = HashMap::new();
    for row in &deduped {
        vectors
            .entry(row.vector_id)
            .and_modify(|ranked| {
                ranked.similarity = ranked.similarity.max(row.similarity);
                ranked.tie_key = ranked.tie_key.min(row.learning_outcome_id);
            })
            .or_insert(RankedVector {
                vector_id: row.vector_id,
                similarity: row.similarity,
                tie_key: row.learning_outcome_id,
            });
    }
    let mut ranked: Vec<RankedVector> = vectors.into_values().collect();
    ranked.sort_by(|a, b| by_similarity_then_id(a.similarity, a.tie_key, b.similarity, b.tie_key));

    let selected: HashSet<Uuid> = ranked
        .iter()
        .take(limits.top_n)
        .filter(|vector| vector.similarity >= limits.threshold)
        .map(|vector| vector.vector_id)
        .collect();

    let mut expanded: Vec<ScoredRow> = deduped
        .into_iter()
        .filter(|row| selected.contains(&row.vector_id))
        .collect();
    expanded.sort_by(|a, b| {
        by_similarity_then_id(
            a.similarity,
            a.learning_outcome_id,
            b.similarity,
            b.learning_outcome_id,
        )
    });
    expanded
}
