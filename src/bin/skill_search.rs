use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use skillmatch::config::{build_orchestrator, DatabaseArgs, EmbeddingArgs, JudgeArgs, RetrievalArgs};
use skillmatch::{AcademicYearSemesters, CourseFilter, RetrievalRequest};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "skillmatch",
    about = "Look up courses teaching the given skills and print the matches as JSON"
)]
struct SearchCli {
    /// Skill to search for (repeat for several skills)
    #[arg(long = "skill")]
    skills: Vec<String>,

    /// Print a single course by id instead of searching
    #[arg(long, conflicts_with = "skills")]
    course_id: Option<Uuid>,

    /// Restrict to one campus
    #[arg(long)]
    campus_id: Option<Uuid>,

    /// Restrict to one faculty
    #[arg(long)]
    faculty_id: Option<Uuid>,

    /// Restrict to general-education courses (true) or exclude them (false)
    #[arg(long)]
    gen_ed: Option<bool>,

    /// Academic year the course must be offered in
    #[arg(long)]
    academic_year: Option<i32>,

    /// Comma-separated semesters within --academic-year
    #[arg(long, value_delimiter = ',', requires = "academic_year")]
    semesters: Vec<i32>,

    /// Minimum similarity (defaults to --default-threshold)
    #[arg(long)]
    threshold: Option<f64>,

    /// Ranked vectors kept per skill (defaults to --default-top-n)
    #[arg(long)]
    top_n: Option<usize>,

    /// Run the LLM relevance judge over each skill's matches
    #[arg(long, default_value_t = false)]
    llm_filter: bool,

    /// Pretty-print the JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,

    #[command(flatten)]
    database: DatabaseArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    judge: JudgeArgs,

    #[command(flatten)]
    retrieval: RetrievalArgs,
}

impl SearchCli {
    fn filter(&self) -> CourseFilter {
        CourseFilter {
            campus_id: self.campus_id,
            faculty_id: self.faculty_id,
            is_gen_ed: self.gen_ed,
            academic_year_semesters: self.academic_year.map(|academic_year| {
                vec![AcademicYearSemesters {
                    academic_year,
                    semesters: (!self.semesters.is_empty()).then(|| self.semesters.clone()),
                }]
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SearchCli::parse();
    skillmatch::telemetry::init_tracing("warn,skillmatch=info", false)?;
    if cli.skills.is_empty() && cli.course_id.is_none() {
        bail!("pass at least one --skill or a --course-id");
    }

    let store = Arc::new(
        cli.database
            .connect()
            .await
            .context("failed to connect to the course catalogue")?,
    );
    let orchestrator = build_orchestrator(store, &cli.embedding, &cli.judge, &cli.retrieval)
        .context("failed to build retrieval pipeline")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            on_interrupt.cancel();
        }
    });

    let output = if let Some(course_id) = cli.course_id {
        let course = orchestrator
            .get_course_by_id(course_id, &cancel)
            .await
            .with_context(|| format!("failed to load course {course_id}"))?;
        serde_json::to_value(course)?
    } else {
        let request = RetrievalRequest {
            skills: cli.skills.clone(),
            filter: cli.filter(),
            embedding_configuration: cli.embedding.default_configuration()?,
            threshold: cli.threshold,
            top_n: cli.top_n,
            enable_llm_filter: cli.llm_filter,
        };
        let response = orchestrator
            .get_courses_by_skills_with_filter(&request, &cancel)
            .await
            .context("retrieval failed")?;
        info!(
            skills = response.courses_by_skill.len(),
            total_tokens = response.embedding_usage.total_tokens,
            "retrieval finished"
        );
        serde_json::to_value(response)?
    };

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{rendered}");
    Ok(())
}
