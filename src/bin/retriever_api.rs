use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use skillmatch::config::{build_orchestrator, DatabaseArgs, EmbeddingArgs, JudgeArgs, RetrievalArgs};
use skillmatch::{
    CourseFilter, CourseWithOutcomes, EmbeddingConfiguration, RetrievalError,
    RetrievalOrchestrator, RetrievalRequest, RetrievalResponse,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "skillmatch-api",
    about = "HTTP API that maps skills to learning outcomes and courses"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "SKILLMATCH_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Emit JSON log lines.
    #[arg(long, env = "SKILLMATCH_LOG_JSON", default_value_t = false)]
    log_json: bool,

    #[command(flatten)]
    database: DatabaseArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    judge: JudgeArgs,

    #[command(flatten)]
    retrieval: RetrievalArgs,
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<RetrievalOrchestrator>,
    default_configuration: EmbeddingConfiguration,
    shutdown: CancellationToken,
}

/// Wire body for the by-skills route. The embedding configuration falls back
/// to the server default.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BySkillsRequest {
    skills: Vec<String>,
    #[serde(default)]
    filter: CourseFilter,
    #[serde(default)]
    embedding_configuration: Option<EmbeddingConfiguration>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default, rename = "topN")]
    top_n: Option<usize>,
    #[serde(default)]
    enable_llm_filter: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BySkillsResponse {
    #[serde(flatten)]
    result: RetrievalResponse,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseMeta {
    skills: usize,
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ApiCli::parse();
    skillmatch::telemetry::init_tracing("info,skillmatch=debug", cli.log_json)?;

    let store = Arc::new(
        cli.database
            .connect()
            .await
            .context("failed to connect to the course catalogue")?,
    );
    let orchestrator = build_orchestrator(store, &cli.embedding, &cli.judge, &cli.retrieval)
        .context("failed to build retrieval pipeline")?;
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        default_configuration: cli.embedding.default_configuration()?,
        shutdown: CancellationToken::new(),
    };
    let shutdown = state.shutdown.clone();

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/courses/by-skills", post(by_skills_handler))
        .route("/v1/courses/:id", get(course_handler))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    info!(%addr, "skillmatch-api listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
            shutdown.cancel();
        })
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn by_skills_handler(
    State(state): State<AppState>,
    Json(body): Json<BySkillsRequest>,
) -> Result<Json<BySkillsResponse>, (StatusCode, Json<ErrorBody>)> {
    if body.skills.len() > 64 {
        return Err(bad_request("at most 64 skills per request"));
    }
    let request = RetrievalRequest {
        skills: body.skills,
        filter: body.filter,
        embedding_configuration: body
            .embedding_configuration
            .unwrap_or_else(|| state.default_configuration.clone()),
        threshold: body.threshold,
        top_n: body.top_n,
        enable_llm_filter: body.enable_llm_filter,
    };
    // Dropping the handler future (client disconnect) cancels the pipeline.
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();

    let start = Instant::now();
    let result = state
        .orchestrator
        .get_courses_by_skills_with_filter(&request, &cancel)
        .await
        .map_err(error_response)?;
    Ok(Json(BySkillsResponse {
        meta: ResponseMeta {
            skills: result.courses_by_skill.len(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        },
        result,
    }))
}

async fn course_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CourseWithOutcomes>, (StatusCode, Json<ErrorBody>)> {
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();
    state
        .orchestrator
        .get_course_by_id(id, &cancel)
        .await
        .map(Json)
        .map_err(error_response)
}

fn status_for(err: &RetrievalError) -> StatusCode {
    match err {
        RetrievalError::Configuration(_) => StatusCode::BAD_REQUEST,
        RetrievalError::CourseNotFound(_) => StatusCode::NOT_FOUND,
        RetrievalError::EmbeddingProvider { .. }
        | RetrievalError::EmbeddingOrder(_)
        | RetrievalError::EmbeddingDimension { .. }
        | RetrievalError::Judge(_) => StatusCode::BAD_GATEWAY,
        RetrievalError::Store(_) | RetrievalError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: RetrievalError) -> (StatusCode, Json<ErrorBody>) {
    let status = status_for(&err);
    if err.is_request_fatal() {
        warn!(error = %err, %status, "request failed");
    } else {
        debug!(error = %err, %status, "request rejected");
    }
    (
        status,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}
