//! Catalogue entities read by the engine plus the per-request match records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embeddings::EmbeddingDimension;

/// University campus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campus {
    /// Campus identifier.
    pub id: Uuid,
    /// Short campus code.
    pub code: String,
    /// English display name.
    pub name_en: String,
    /// Thai display name.
    pub name_th: String,
}

/// Faculty, owned by exactly one campus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Faculty {
    /// Faculty identifier.
    pub id: Uuid,
    /// Short faculty code.
    pub code: String,
    /// English display name.
    pub name_en: String,
    /// Thai display name.
    pub name_th: String,
    /// Owning campus.
    pub campus_id: Uuid,
}

/// Course columns without its learning outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRecord {
    /// Course identifier.
    pub id: Uuid,
    /// Campus the course belongs to.
    pub campus_id: Uuid,
    /// Faculty the course belongs to.
    pub faculty_id: Uuid,
    /// Registrar subject code.
    pub subject_code: String,
    /// Human-readable subject name.
    pub subject_name: String,
    /// General-education course flag.
    pub is_gen_ed: bool,
    /// Free-form catalogue metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Resolved campus row.
    pub campus: Campus,
    /// Resolved faculty row.
    pub faculty: Faculty,
}

/// One scheduled run of a course. Only used as a filter dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOffering {
    /// Offering identifier.
    pub id: Uuid,
    /// Offered course.
    pub course_id: Uuid,
    /// Academic year of the run.
    pub academic_year: i32,
    /// Semester within `academic_year`.
    pub semester: i32,
}

/// Atomic statement of what a course teaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningOutcome {
    /// Outcome identifier.
    pub id: Uuid,
    /// Owning course.
    pub course_id: Uuid,
    /// Position within the course's outcome list.
    pub clo_no: i32,
    /// Text as written in the syllabus.
    pub original_name: String,
    /// Text that was embedded.
    pub cleaned_name: String,
    /// Excluded from search when set.
    pub skip_embedding: bool,
    /// A 768-wide vector exists.
    pub has_embedding_768: bool,
    /// A 1536-wide vector exists.
    pub has_embedding_1536: bool,
    /// Shared vector row. Many outcomes with the same normalised text alias one row.
    pub vector_id: Option<Uuid>,
}

impl LearningOutcome {
    /// Whether the has-embedding flag for `dimension` is set.
    pub fn has_embedding(&self, dimension: EmbeddingDimension) -> bool {
        match dimension {
            EmbeddingDimension::D768 => self.has_embedding_768,
            EmbeddingDimension::D1536 => self.has_embedding_1536,
        }
    }

    /// Whether this outcome may enter a candidate set for `dimension`.
    pub fn is_searchable(&self, dimension: EmbeddingDimension) -> bool {
        !self.skip_embedding && self.has_embedding(dimension) && self.vector_id.is_some()
    }
}

/// Content-addressed embedding row shared by outcomes with identical text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingVector {
    /// Vector row identifier.
    pub id: Uuid,
    /// Normalised text the vectors were computed from.
    pub embedded_text: String,
    /// 768-wide vector, when computed.
    #[serde(default)]
    pub embedding_768: Option<Vec<f32>>,
    /// 1536-wide vector, when computed.
    #[serde(default)]
    pub embedding_1536: Option<Vec<f32>>,
    /// Per-dimension provenance (model, provider, generated timestamp).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl EmbeddingVector {
    /// Stored vector for `dimension`, when present.
    pub fn embedding(&self, dimension: EmbeddingDimension) -> Option<&[f32]> {
        match dimension {
            EmbeddingDimension::D768 => self.embedding_768.as_deref(),
            EmbeddingDimension::D1536 => self.embedding_1536.as_deref(),
        }
    }
}

/// Learning outcome annotated with its query-time similarity. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedLearningOutcome {
    /// Matched outcome.
    #[serde(flatten)]
    pub learning_outcome: LearningOutcome,
    /// `1 - cosine distance` against the skill vector.
    pub similarity_score: f64,
}

impl MatchedLearningOutcome {
    /// Id of the matched outcome.
    pub fn id(&self) -> Uuid {
        self.learning_outcome.id
    }
}

/// Course plus its complete learning-outcome list, as resolved by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseWithOutcomes {
    /// Course row.
    #[serde(flatten)]
    pub course: CourseRecord,
    /// Every outcome of the course, unfiltered.
    pub learning_outcomes: Vec<LearningOutcome>,
}

/// Per-course aggregate for one skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseMatch {
    /// Course row.
    #[serde(flatten)]
    pub course: CourseRecord,
    /// Highest similarity over `matched_learning_outcomes`.
    pub score: f64,
    /// Outcomes that matched the skill, best first.
    pub matched_learning_outcomes: Vec<MatchedLearningOutcome>,
    /// Course outcomes that did not match.
    pub remaining_learning_outcomes: Vec<LearningOutcome>,
    /// Every outcome of the course.
    pub all_learning_outcomes: Vec<LearningOutcome>,
}
