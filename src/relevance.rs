//! Optional LLM relevance pass over each skill's candidate outcomes.
//!
//! One judge call per skill. Any judge failure, timeout or malformed response
//! leaves that skill's candidates untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Result, RetrievalError};
use crate::llm::{JudgeRequest, LlmJudge};
use crate::model::MatchedLearningOutcome;

const SCHEMA_NAME: &str = "learning_outcome_relevance";

const SYSTEM_PROMPT: &str = "You judge whether university course learning outcomes teach a \
given skill. Answer yes only when the outcome directly develops the skill. Return exactly one \
decision per listed outcome and copy each outcome text verbatim into learning_outcome.";

/// Bounds for the judge fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelevanceSettings {
    /// Per-call deadline; expiry counts as a failed call.
    pub timeout: Duration,
    /// Maximum concurrent judge calls.
    pub max_in_flight: usize,
}

impl Default for RelevanceSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_in_flight: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Decision {
    #[serde(alias = "Yes", alias = "YES")]
    Yes,
    #[serde(alias = "No", alias = "NO")]
    No,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    learning_outcome: String,
    decision: Decision,
    #[allow(dead_code)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct Verdicts {
    learning_outcomes: Vec<Verdict>,
}

fn response_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "learning_outcomes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "learning_outcome": { "type": "string" },
                        "decision": { "type": "string", "enum": ["yes", "no"] },
                        "reason": { "type": "string" }
                    },
                    "required": ["learning_outcome", "decision", "reason"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["learning_outcomes"],
        "additionalProperties": false
    })
}

/// Distinct cleaned names in first-seen order. Outcomes sharing text are
/// judged once.
fn distinct_names(candidates: &[MatchedLearningOutcome]) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let name = candidate.learning_outcome.cleaned_name.as_str();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn build_prompt(skill: &str, names: &[&str]) -> String {
    let items: Vec<serde_json::Value> = names
        .iter()
        .map(|name| json!({ "learning_outcome": name }))
        .collect();
    format!(
        "Skill:\n{skill}\n\nLearning outcomes:\n{}\n",
        serde_json::Value::Array(items)
    )
}

/// Keeps candidates whose text got a `yes`. Candidates with no verdict are
/// dropped with a warning.
fn apply_verdicts(
    skill: &str,
    verdicts: Verdicts,
    candidates: Vec<MatchedLearningOutcome>,
) -> Vec<MatchedLearningOutcome> {
    let mut decisions: HashMap<String, Decision> = HashMap::new();
    for verdict in verdicts.learning_outcomes {
        decisions.entry(verdict.learning_outcome).or_insert(verdict.decision);
    }
    candidates
        .into_iter()
        .filter(|candidate| {
            let name = &candidate.learning_outcome.cleaned_name;
            match decisions.get(name) {
                Some(Decision::Yes) => true,
                Some(Decision::No) => false,
                None => {
                    warn!(
                        skill,
                        learning_outcome_id = %candidate.id(),
                        "judge returned no decision for learning outcome; dropping it"
                    );
                    false
                }
            }
        })
        .collect()
}

/// LLM-backed relevance filter.
#[derive(Clone)]
pub struct RelevanceFilter {
    judge: Arc<dyn LlmJudge>,
    settings: RelevanceSettings,
    limiter: Arc<Semaphore>,
}

impl RelevanceFilter {
    /// Filter calling `judge` under `settings`.
    pub fn new(judge: Arc<dyn LlmJudge>, settings: RelevanceSettings) -> Self {
        Self {
            judge,
            limiter: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
            settings,
        }
    }

    async fn judge(&self, skill: &str, candidates: &[MatchedLearningOutcome]) -> Result<Verdicts> {
        let names = distinct_names(candidates);
        let prompt = build_prompt(skill, &names);
        let schema = response_schema();
        let request = JudgeRequest {
            system_prompt: SYSTEM_PROMPT,
            prompt: &prompt,
            schema_name: SCHEMA_NAME,
            schema: &schema,
        };
        let raw = self.judge.generate_object(&request).await?;
        serde_json::from_value(raw)
            .map_err(|err| RetrievalError::Judge(format!("response violates schema: {err}")))
    }

    /// Filters one skill's candidates. Never fails: on any judge problem the
    /// input comes back unchanged.
    pub async fn filter(
        &self,
        skill: &str,
        candidates: Vec<MatchedLearningOutcome>,
    ) -> Vec<MatchedLearningOutcome> {
        if candidates.is_empty() {
            return candidates;
        }
        let Ok(_permit) = self.limiter.acquire().await else {
            warn!(skill, "relevance limiter closed; keeping unfiltered candidates");
            return candidates;
        };
        match timeout(self.settings.timeout, self.judge(skill, &candidates)).await {
            Ok(Ok(verdicts)) => {
                let before = candidates.len();
                let kept = apply_verdicts(skill, verdicts, candidates);
                debug!(skill, before, after = kept.len(), model = self.judge.model(), "relevance filter applied");
                kept
            }
            Ok(Err(err)) => {
                warn!(skill, error = %err, "relevance judge failed; keeping unfiltered candidates");
                candidates
            }
            Err(_) => {
                warn!(
                    skill,
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "relevance judge timed out; keeping unfiltered candidates"
                );
                candidates
            }
        }
    }

    /// Filters every skill concurrently, bounded by `max_in_flight`.
    pub async fn filter_all(
        &self,
        batches: Vec<(String, Vec<MatchedLearningOutcome>)>,
    ) -> Vec<(String, Vec<MatchedLearningOutcome>)> {
        join_all(batches.into_iter().map(|(skill, candidates)| async move {
            let kept = self.filter(&skill, candidates).await;
            (skill, kept)
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LearningOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    fn matched(id: u128, name: &str, score: f64) -> MatchedLearningOutcome {
        MatchedLearningOutcome {
            learning_outcome: LearningOutcome {
                id: Uuid::from_u128(id),
                course_id: Uuid::from_u128(1000),
                clo_no: id as i32,
                original_name: name.to_string(),
                cleaned_name: name.to_string(),
                skip_embedding: false,
                has_embedding_768: true,
                has_embedding_1536: false,
                vector_id: Some(Uuid::from_u128(id + 500)),
            },
            similarity_score: score,
        }
    }

    struct ScriptedJudge {
        reply: Result<serde_json::Value>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedJudge {
        fn new(reply: Result<serde_json::Value>) -> Self {
            Self {
                reply,
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmJudge for ScriptedJudge {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn generate_object(&self, request: &JudgeRequest<'_>) -> Result<serde_json::Value> {
            self.prompts.lock().unwrap().push(request.prompt.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
            self.peak.fetch_max(now, Ordering::AcqRel);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            match &self.reply {
                Ok(value) => Ok(value.clone()),
                Err(err) => Err(RetrievalError::Judge(err.to_string())),
            }
        }
    }

    fn filter_with(judge: ScriptedJudge, settings: RelevanceSettings) -> (Arc<ScriptedJudge>, RelevanceFilter) {
        let judge = Arc::new(judge);
        let filter = RelevanceFilter::new(judge.clone(), settings);
        (judge, filter)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn keeps_yes_drops_no_and_unanswered() {
        let reply = json!({"learning_outcomes": [
            {"learning_outcome": "build sql queries", "decision": "yes", "reason": "direct"},
            {"learning_outcome": "write essays", "decision": "no", "reason": "unrelated"}
        ]});
        let (_, filter) = filter_with(ScriptedJudge::new(Ok(reply)), RelevanceSettings::default());
        let kept = filter
            .filter(
                "sql",
                vec![
                    matched(1, "build sql queries", 0.9),
                    matched(2, "write essays", 0.8),
                    matched(3, "design schemas", 0.7),
                ],
            )
            .await;
        let ids: Vec<Uuid> = kept.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec![Uuid::from_u128(1)]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fails_open_on_judge_error() {
        let judge = ScriptedJudge::new(Err(RetrievalError::Judge("503".into())));
        let (_, filter) = filter_with(judge, RelevanceSettings::default());
        let input = vec![matched(1, "a", 0.9), matched(2, "b", 0.8)];
        let kept = filter.filter("sql", input.clone()).await;
        assert_eq!(kept, input);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fails_open_on_schema_violation() {
        let (_, filter) = filter_with(
            ScriptedJudge::new(Ok(json!({"answers": "yes"}))),
            RelevanceSettings::default(),
        );
        let input = vec![matched(1, "a", 0.9)];
        assert_eq!(filter.filter("sql", input.clone()).await, input);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fails_open_on_timeout() {
        let mut judge = ScriptedJudge::new(Ok(json!({"learning_outcomes": []})));
        judge.delay = Duration::from_secs(60);
        let settings = RelevanceSettings {
            timeout: Duration::from_secs(1),
            max_in_flight: 2,
        };
        let (_, filter) = filter_with(judge, settings);
        let input = vec![matched(1, "a", 0.9)];
        assert_eq!(filter.filter("sql", input.clone()).await, input);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn shared_text_is_listed_once_and_judged_together() {
        let reply = json!({"learning_outcomes": [
            {"learning_outcome": "analyse data", "decision": "yes", "reason": "direct"}
        ]});
        let (judge, filter) = filter_with(ScriptedJudge::new(Ok(reply)), RelevanceSettings::default());
        let kept = filter
            .filter("data", vec![matched(1, "analyse data", 0.9), matched(2, "analyse data", 0.9)])
            .await;
        assert_eq!(kept.len(), 2);
        let prompts = judge.prompts.lock().unwrap();
        assert_eq!(prompts[0].matches("analyse data").count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn empty_candidates_skip_the_judge() {
        let (judge, filter) = filter_with(
            ScriptedJudge::new(Ok(json!({"learning_outcomes": []}))),
            RelevanceSettings::default(),
        );
        assert!(filter.filter("sql", Vec::new()).await.is_empty());
        assert!(judge.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fan_out_is_bounded() {
        let mut judge = ScriptedJudge::new(Ok(json!({"learning_outcomes": []})));
        judge.delay = Duration::from_millis(10);
        let settings = RelevanceSettings {
            timeout: Duration::from_secs(5),
            max_in_flight: 2,
        };
        let (judge, filter) = filter_with(judge, settings);
        let batches = (0..6)
            .map(|i| (format!("skill-{i}"), vec![matched(i, "x", 0.9)]))
            .collect();
        let results = filter.filter_all(batches).await;
        assert_eq!(results.len(), 6);
        assert_eq!(results[3].0, "skill-3");
        assert_eq!(judge.peak.load(Ordering::Acquire), 2);
        assert_eq!(judge.prompts.lock().unwrap().len(), 6);
    }
}
