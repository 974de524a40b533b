#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use skillmatch::embedder::{EmbeddingProvider, ProviderRouter};
use skillmatch::error::Result;
use skillmatch::llm::{JudgeRequest, LlmJudge};
use skillmatch::{
    Campus, CourseOffering, CourseRecord, EmbeddingConfiguration, EmbeddingDimension,
    EmbeddingResult, EmbeddingVector, Faculty, LearningOutcome, MemoryStore, RelevanceFilter,
    RelevanceSettings, RetrievalError, RetrievalOrchestrator,
};
use uuid::Uuid;

pub const MODEL: &str = "test-embed";
const WIDTH: usize = 768;
/// Axis reserved for the orthogonal component of candidate vectors.
const FILLER_AXIS: usize = WIDTH - 1;

pub fn config() -> EmbeddingConfiguration {
    EmbeddingConfiguration::new(MODEL, EmbeddingDimension::D768)
}

/// Unit vector along `axis`.
pub fn axis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; WIDTH];
    v[axis] = 1.0;
    v
}

/// Unit vector whose cosine similarity with `axis(skill_axis)` is `similarity`.
pub fn scored_against(skill_axis: usize, similarity: f64) -> Vec<f32> {
    let mut v = vec![0.0; WIDTH];
    v[skill_axis] = similarity as f32;
    v[FILLER_AXIS] = (1.0 - similarity * similarity).max(0.0).sqrt() as f32;
    v
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-5
}

/// Provider that embeds each known skill as a basis vector.
pub struct AxisProvider {
    skills: Vec<(&'static str, usize)>,
    pub inputs_seen: AtomicUsize,
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl AxisProvider {
    pub fn new(skills: &[(&'static str, usize)]) -> Self {
        Self {
            skills: skills.to_vec(),
            inputs_seen: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    pub fn inputs_seen(&self) -> usize {
        self.inputs_seen.load(Ordering::Acquire)
    }
}

#[async_trait]
impl EmbeddingProvider for AxisProvider {
    fn name(&self) -> &str {
        "axis"
    }

    fn supports(&self, model: &str, dimension: EmbeddingDimension) -> bool {
        model == MODEL && dimension == EmbeddingDimension::D768
    }

    fn batch_size(&self) -> usize {
        16
    }

    async fn embed_batch(
        &self,
        inputs: &[String],
        configuration: &EmbeddingConfiguration,
    ) -> Result<Vec<EmbeddingResult>> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.inputs_seen.fetch_add(inputs.len(), Ordering::AcqRel);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(inputs
            .iter()
            .map(|text| {
                let index = self
                    .skills
                    .iter()
                    .find(|(skill, _)| *skill == text.as_str())
                    .map(|(_, index)| *index)
                    .unwrap_or(FILLER_AXIS - 1);
                let tokens = text.split_whitespace().count() as u32;
                EmbeddingResult {
                    vector: axis(index),
                    model: configuration.model.clone(),
                    provider: "axis".into(),
                    dimension: configuration.dimension,
                    prompt_tokens: tokens,
                    total_tokens: tokens,
                    embedded_text: text.clone(),
                    generated_at: Utc::now(),
                }
            })
            .collect())
    }
}

/// Judge that answers from a fixed verdict table. It fails every call, or
/// only calls whose prompt contains `fail_on`.
pub struct ScriptedJudge {
    verdicts: Vec<(String, &'static str)>,
    fail: bool,
    fail_on: Option<String>,
    pub calls: AtomicUsize,
}

impl ScriptedJudge {
    pub fn answering(verdicts: &[(&str, &'static str)]) -> Self {
        Self {
            verdicts: verdicts.iter().map(|(name, d)| (name.to_string(), *d)).collect(),
            fail: false,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers like [`ScriptedJudge::answering`] except for prompts that
    /// mention `marker`, which fail.
    pub fn failing_on(marker: &str, verdicts: &[(&str, &'static str)]) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            ..Self::answering(verdicts)
        }
    }

    pub fn failing() -> Self {
        Self {
            verdicts: Vec::new(),
            fail: true,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmJudge for ScriptedJudge {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate_object(&self, request: &JudgeRequest<'_>) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        let targeted = self
            .fail_on
            .as_deref()
            .is_some_and(|marker| request.prompt.contains(marker));
        if self.fail || targeted {
            return Err(RetrievalError::Judge("upstream 500".into()));
        }
        let items: Vec<serde_json::Value> = self
            .verdicts
            .iter()
            .filter(|(name, _)| request.prompt.contains(name.as_str()))
            .map(|(name, decision)| {
                json!({"learning_outcome": name, "decision": decision, "reason": "scripted"})
            })
            .collect();
        Ok(json!({ "learning_outcomes": items }))
    }
}

pub fn campus(n: u128) -> Campus {
    Campus {
        id: Uuid::from_u128(n),
        code: format!("C{n}"),
        name_en: format!("Campus-{n}"),
        name_th: format!("วิทยาเขต-{n}"),
    }
}

fn faculty(campus_id: Uuid) -> Faculty {
    Faculty {
        id: Uuid::from_u128(campus_id.as_u128() + 100),
        code: "ENG".into(),
        name_en: "Engineering".into(),
        name_th: "วิศวกรรมศาสตร์".into(),
        campus_id,
    }
}

/// Builder for an in-memory catalogue.
#[derive(Default)]
pub struct Catalog {
    store: MemoryStore,
    outcomes_per_course: std::collections::HashMap<Uuid, i32>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn course(&mut self, id: u128, code: &str, campus_no: u128) -> Uuid {
        self.course_with(id, code, campus_no, false)
    }

    pub fn course_with(&mut self, id: u128, code: &str, campus_no: u128, is_gen_ed: bool) -> Uuid {
        let campus = campus(campus_no);
        let faculty = faculty(campus.id);
        let course = CourseRecord {
            id: Uuid::from_u128(id),
            campus_id: campus.id,
            faculty_id: faculty.id,
            subject_code: code.to_string(),
            subject_name: format!("{code} course"),
            is_gen_ed,
            metadata: json!({}),
            campus,
            faculty,
        };
        let course_id = course.id;
        self.store.insert_course(course);
        course_id
    }

    pub fn offering(&mut self, id: u128, course_id: Uuid, academic_year: i32, semester: i32) {
        self.store.insert_offering(CourseOffering {
            id: Uuid::from_u128(id),
            course_id,
            academic_year,
            semester,
        });
    }

    pub fn vector(&mut self, id: u128, embedding: Vec<f32>) -> Uuid {
        let vector = EmbeddingVector {
            id: Uuid::from_u128(id),
            embedded_text: format!("vector {id}"),
            embedding_768: Some(embedding),
            embedding_1536: None,
            metadata: json!({}),
        };
        let vector_id = vector.id;
        self.store.insert_vector(vector);
        vector_id
    }

    pub fn outcome(&mut self, id: u128, course_id: Uuid, vector_id: Uuid, name: &str) -> Uuid {
        let clo_no = self.outcomes_per_course.entry(course_id).or_insert(0);
        *clo_no += 1;
        let outcome = LearningOutcome {
            id: Uuid::from_u128(id),
            course_id,
            clo_no: *clo_no,
            original_name: name.to_string(),
            cleaned_name: name.to_string(),
            skip_embedding: false,
            has_embedding_768: true,
            has_embedding_1536: false,
            vector_id: Some(vector_id),
        };
        self.store.insert_learning_outcome(outcome);
        Uuid::from_u128(id)
    }

    pub fn raw_outcome(&mut self, outcome: LearningOutcome) {
        self.store.insert_learning_outcome(outcome);
    }

    pub fn build(self) -> Arc<MemoryStore> {
        Arc::new(self.store)
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<AxisProvider>,
    pub orchestrator: RetrievalOrchestrator,
}

pub fn harness(store: Arc<MemoryStore>, provider: AxisProvider, judge: Option<Arc<dyn LlmJudge>>) -> Harness {
    let provider = Arc::new(provider);
    let router = Arc::new(ProviderRouter::new(
        vec![provider.clone() as Arc<dyn EmbeddingProvider>],
        64,
    ));
    let relevance = judge.map(|judge| RelevanceFilter::new(judge, RelevanceSettings::default()));
    let orchestrator = RetrievalOrchestrator::new(router, store.clone(), relevance);
    Harness {
        store,
        provider,
        orchestrator,
    }
}
