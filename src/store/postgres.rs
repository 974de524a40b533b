//! pgvector-backed catalogue.
//!
//! All skills go through one statement: skills and vectors are bound as two
//! parallel arrays and unnested server side, so no SQL is concatenated from
//! user input.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use pgvector::Vector;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};
use uuid::Uuid;

use crate::embeddings::EmbeddingDimension;
use crate::error::{Result, RetrievalError};
use crate::filter::{CourseFilter, SqlFilter};
use crate::model::{
    Campus, CourseRecord, CourseWithOutcomes, Faculty, LearningOutcome, MatchedLearningOutcome,
};
use crate::ranking::SearchLimits;
use crate::store::{LearningOutcomeStore, SkillVector};
use crate::vector_store::CatalogTables;

const OUTCOME_COLUMNS: &str = "lo.id, lo.course_id, lo.clo_no, lo.original_name, \
    lo.cleaned_name, lo.skip_embedding, lo.has_embedding_768, lo.has_embedding_1536, lo.vector_id";

const COURSE_COLUMNS: &str = "c.id AS course_id, c.campus_id, c.faculty_id, c.subject_code, \
    c.subject_name, c.is_gen_ed, c.metadata, \
    ca.code AS campus_code, ca.name_en AS campus_name_en, ca.name_th AS campus_name_th, \
    f.code AS faculty_code, f.name_en AS faculty_name_en, f.name_th AS faculty_name_th";

/// Placeholders bound before the filter parameters in the search statement.
const SEARCH_FIXED_PARAMS: usize = 4;

/// Postgres catalogue store.
#[derive(Clone)]
pub struct PgStore {
    client: Arc<Client>,
    tables: CatalogTables,
}

impl PgStore {
    /// Store over an existing client.
    pub fn new(client: Arc<Client>, tables: CatalogTables) -> Self {
        Self { client, tables }
    }

    /// Connects and drives the connection on a background task.
    pub async fn connect(database_url: &str, tables: CatalogTables) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|err| RetrievalError::Store(format!("failed to connect to Postgres: {err}")))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        Ok(Self::new(Arc::new(client), tables))
    }

    async fn outcomes_for_courses(
        &self,
        course_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<LearningOutcome>>> {
        let mut grouped: HashMap<Uuid, Vec<LearningOutcome>> = HashMap::new();
        if course_ids.is_empty() {
            return Ok(grouped);
        }
        let sql = outcomes_by_course_sql(&self.tables);
        let ids = course_ids.to_vec();
        let rows = self.client.query(sql.as_str(), &[&ids]).await?;
        for row in rows {
            let outcome = outcome_from_row(&row)?;
            grouped.entry(outcome.course_id).or_default().push(outcome);
        }
        Ok(grouped)
    }
}

fn dimension_columns(dimension: EmbeddingDimension) -> (&'static str, &'static str) {
    match dimension {
        EmbeddingDimension::D768 => ("embedding_768", "has_embedding_768"),
        EmbeddingDimension::D1536 => ("embedding_1536", "has_embedding_1536"),
    }
}

/// Search statement: candidate filter, cross join, duplicate collapse,
/// per-vector ranking, then threshold/topN selection and outcome expansion.
///
/// `$1` skills, `$2` vectors, `$3` topN, `$4` threshold, filter from `$5`.
pub(crate) fn search_sql(
    tables: &CatalogTables,
    dimension: EmbeddingDimension,
    filter: &SqlFilter,
) -> String {
    let (embedding, has_embedding) = dimension_columns(dimension);
    format!(
        "WITH skill_input AS (
            SELECT s.skill, s.embedding
            FROM unnest($1::text[], $2::vector[]) AS s(skill, embedding)
        ),
        candidates AS (
            SELECT lo.id AS learning_outcome_id, lo.vector_id, v.{embedding} AS embedding
            FROM {lo} lo
            JOIN {vectors} v ON v.id = lo.vector_id
            JOIN {course} c ON c.id = lo.course_id{joins}
            WHERE lo.{has_embedding} = TRUE
              AND lo.skip_embedding = FALSE
              AND v.{embedding} IS NOT NULL{conditions}
        ),
        scored AS (
            SELECT si.skill, ca.learning_outcome_id, ca.vector_id,
                   1 - (ca.embedding <=> si.embedding) AS similarity
            FROM skill_input si
            CROSS JOIN candidates ca
            WHERE (ca.embedding <=> si.embedding) <> 'NaN'::float8
        ),
        deduped AS (
            SELECT skill, learning_outcome_id, vector_id, MAX(similarity) AS similarity
            FROM scored
            GROUP BY skill, learning_outcome_id, vector_id
        ),
        vector_ranked AS (
            SELECT skill, vector_id, similarity,
                   ROW_NUMBER() OVER (
                       PARTITION BY skill ORDER BY similarity DESC, tie_key ASC
                   ) AS vector_rank
            FROM (
                SELECT skill, vector_id, MAX(similarity) AS similarity,
                       MIN(learning_outcome_id::text) AS tie_key
                FROM deduped
                GROUP BY skill, vector_id
            ) per_vector
        )
        SELECT d.skill, d.similarity, {columns}
        FROM vector_ranked vr
        JOIN deduped d ON d.skill = vr.skill AND d.vector_id = vr.vector_id
        JOIN {lo} lo ON lo.id = d.learning_outcome_id
        WHERE vr.vector_rank <= $3 AND vr.similarity >= $4
        ORDER BY d.skill, d.similarity DESC, lo.id::text",
        lo = tables.learning_outcome.qualified(),
        vectors = tables.embedding_vector.qualified(),
        course = tables.course.qualified(),
        joins = filter.joins,
        conditions = filter.and_clause(),
        columns = OUTCOME_COLUMNS,
    )
}

/// Courses owning the given outcomes under the filter. `$1` outcome ids.
pub(crate) fn courses_by_outcome_sql(tables: &CatalogTables, filter: &SqlFilter) -> String {
    format!(
        "SELECT DISTINCT ON (lo.id, c.id) lo.id AS learning_outcome_id, {columns}
        FROM {lo} lo
        JOIN {course} c ON c.id = lo.course_id
        JOIN {campus} ca ON ca.id = c.campus_id
        JOIN {faculty} f ON f.id = c.faculty_id{joins}
        WHERE lo.id = ANY($1){conditions}",
        columns = COURSE_COLUMNS,
        lo = tables.learning_outcome.qualified(),
        course = tables.course.qualified(),
        campus = tables.campus.qualified(),
        faculty = tables.faculty.qualified(),
        joins = filter.joins,
        conditions = filter.and_clause(),
    )
}

fn course_by_id_sql(tables: &CatalogTables) -> String {
    format!(
        "SELECT {columns}
        FROM {course} c
        JOIN {campus} ca ON ca.id = c.campus_id
        JOIN {faculty} f ON f.id = c.faculty_id
        WHERE c.id = $1",
        columns = COURSE_COLUMNS,
        course = tables.course.qualified(),
        campus = tables.campus.qualified(),
        faculty = tables.faculty.qualified(),
    )
}

fn outcomes_by_course_sql(tables: &CatalogTables) -> String {
    format!(
        "SELECT {columns}
        FROM {lo} lo
        WHERE lo.course_id = ANY($1)
        ORDER BY lo.course_id, lo.clo_no, lo.id::text",
        columns = OUTCOME_COLUMNS,
        lo = tables.learning_outcome.qualified(),
    )
}

fn outcome_from_row(row: &Row) -> Result<LearningOutcome> {
    Ok(LearningOutcome {
        id: row.try_get("id")?,
        course_id: row.try_get("course_id")?,
        clo_no: row.try_get("clo_no")?,
        original_name: row.try_get("original_name")?,
        cleaned_name: row.try_get("cleaned_name")?,
        skip_embedding: row.try_get("skip_embedding")?,
        has_embedding_768: row.try_get("has_embedding_768")?,
        has_embedding_1536: row.try_get("has_embedding_1536")?,
        vector_id: row.try_get("vector_id")?,
    })
}

fn course_from_row(row: &Row) -> Result<CourseRecord> {
    let id: Uuid = row.try_get("course_id")?;
    let campus_id: Uuid = row.try_get("campus_id")?;
    let faculty_id: Uuid = row.try_get("faculty_id")?;
    let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
    Ok(CourseRecord {
        id,
        campus_id,
        faculty_id,
        subject_code: row.try_get("subject_code")?,
        subject_name: row.try_get("subject_name")?,
        is_gen_ed: row.try_get("is_gen_ed")?,
        metadata: metadata.unwrap_or(serde_json::Value::Null),
        campus: Campus {
            id: campus_id,
            code: row.try_get("campus_code")?,
            name_en: row.try_get("campus_name_en")?,
            name_th: row.try_get("campus_name_th")?,
        },
        faculty: Faculty {
            id: faculty_id,
            code: row.try_get("faculty_code")?,
            name_en: row.try_get("faculty_name_en")?,
            name_th: row.try_get("faculty_name_th")?,
            campus_id,
        },
    })
}

fn bind<'a>(
    fixed: &[&'a (dyn ToSql + Sync)],
    filter: &'a SqlFilter,
) -> Vec<&'a (dyn ToSql + Sync)> {
    let mut params = fixed.to_vec();
    params.extend(
        filter
            .params
            .iter()
            .map(|param| param.as_ref() as &(dyn ToSql + Sync)),
    );
    params
}

#[async_trait]
impl LearningOutcomeStore for PgStore {
    async fn search_learning_outcomes_by_skill_vectors(
        &self,
        skills: &[SkillVector],
        dimension: EmbeddingDimension,
        filter: &CourseFilter,
        limits: SearchLimits,
    ) -> Result<HashMap<String, Vec<MatchedLearningOutcome>>> {
        let mut out: HashMap<String, Vec<MatchedLearningOutcome>> = skills
            .iter()
            .map(|skill| (skill.skill.clone(), Vec::new()))
            .collect();
        if skills.is_empty() {
            return Ok(out);
        }

        let names: Vec<String> = skills.iter().map(|skill| skill.skill.clone()).collect();
        let vectors: Vec<Vector> = skills
            .iter()
            .map(|skill| Vector::from(skill.vector.clone()))
            .collect();
        let top_n = i64::try_from(limits.top_n)
            .map_err(|_| RetrievalError::Configuration(format!("topN {} too large", limits.top_n)))?;
        let threshold = limits.threshold;

        let rendered = filter.to_sql(
            SEARCH_FIXED_PARAMS + 1,
            "c",
            &self.tables.offering.qualified(),
        );
        let sql = search_sql(&self.tables, dimension, &rendered);
        let params = bind(&[&names, &vectors, &top_n, &threshold], &rendered);
        let rows = self.client.query(sql.as_str(), &params).await?;
        debug!(rows = rows.len(), skills = skills.len(), "learning outcome search finished");

        for row in rows {
            let skill: String = row.try_get("skill")?;
            let similarity_score: f64 = row.try_get("similarity")?;
            let learning_outcome = outcome_from_row(&row)?;
            out.entry(skill).or_default().push(MatchedLearningOutcome {
                learning_outcome,
                similarity_score,
            });
        }
        Ok(out)
    }

    async fn find_courses_by_learning_outcome_ids(
        &self,
        learning_outcome_ids: &[Uuid],
        filter: &CourseFilter,
    ) -> Result<HashMap<Uuid, Vec<CourseWithOutcomes>>> {
        let mut out: HashMap<Uuid, Vec<CourseWithOutcomes>> = HashMap::new();
        if learning_outcome_ids.is_empty() {
            return Ok(out);
        }
        let rendered = filter.to_sql(2, "c", &self.tables.offering.qualified());
        let sql = courses_by_outcome_sql(&self.tables, &rendered);
        let ids = learning_outcome_ids.to_vec();
        let params = bind(&[&ids], &rendered);
        let rows = self.client.query(sql.as_str(), &params).await?;

        let mut pairs = Vec::with_capacity(rows.len());
        let mut course_ids = Vec::new();
        let mut seen = HashSet::new();
        for row in &rows {
            let learning_outcome_id: Uuid = row.try_get("learning_outcome_id")?;
            let course = course_from_row(row)?;
            if seen.insert(course.id) {
                course_ids.push(course.id);
            }
            pairs.push((learning_outcome_id, course));
        }

        let outcomes = self.outcomes_for_courses(&course_ids).await?;
        for (learning_outcome_id, course) in pairs {
            let learning_outcomes = outcomes.get(&course.id).cloned().unwrap_or_default();
            out.entry(learning_outcome_id)
                .or_default()
                .push(CourseWithOutcomes {
                    course,
                    learning_outcomes,
                });
        }
        Ok(out)
    }

    async fn find_course_by_id(&self, course_id: Uuid) -> Result<CourseWithOutcomes> {
        let sql = course_by_id_sql(&self.tables);
        let row = self
            .client
            .query_opt(sql.as_str(), &[&course_id])
            .await?
            .ok_or(RetrievalError::CourseNotFound(course_id))?;
        let course = course_from_row(&row)?;
        let mut outcomes = self.outcomes_for_courses(&[course_id]).await?;
        Ok(CourseWithOutcomes {
            learning_outcomes: outcomes.remove(&course_id).unwrap_or_default(),
            course,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AcademicYearSemesters;

    fn tables() -> CatalogTables {
        CatalogTables::in_schema("catalog").unwrap()
    }

    fn term_filter() -> CourseFilter {
        CourseFilter {
            campus_id: Some(Uuid::from_u128(1)),
            academic_year_semesters: Some(vec![AcademicYearSemesters {
                academic_year: 2567,
                semesters: Some(vec![1]),
            }]),
            ..CourseFilter::default()
        }
    }

    #[test]
    fn search_reads_requested_dimension_only() {
        let rendered = CourseFilter::default().to_sql(5, "c", "offering");
        let sql = search_sql(&tables(), EmbeddingDimension::D768, &rendered);
        assert!(sql.contains("v.embedding_768 AS embedding"));
        assert!(sql.contains("lo.has_embedding_768 = TRUE"));
        assert!(sql.contains("lo.skip_embedding = FALSE"));
        assert!(!sql.contains("1536"));
    }

    #[test]
    fn search_collapses_before_ranking_with_tie_break() {
        let rendered = CourseFilter::default().to_sql(5, "c", "offering");
        let sql = search_sql(&tables(), EmbeddingDimension::D1536, &rendered);
        let dedup = sql.find("GROUP BY skill, learning_outcome_id, vector_id").unwrap();
        let rank = sql.find("ROW_NUMBER()").unwrap();
        assert!(dedup < rank);
        assert!(sql.contains("ORDER BY similarity DESC, tie_key ASC"));
        assert!(sql.contains("vr.vector_rank <= $3 AND vr.similarity >= $4"));
    }

    #[test]
    fn search_filter_params_follow_fixed_params() {
        let offering = tables().offering.qualified();
        let rendered = term_filter().to_sql(SEARCH_FIXED_PARAMS + 1, "c", &offering);
        let sql = search_sql(&tables(), EmbeddingDimension::D768, &rendered);
        assert_eq!(rendered.params.len(), 3);
        assert!(sql.contains("c.campus_id = $5"));
        assert!(sql.contains("o.semester = ANY($7)"));
        assert!(sql.contains("JOIN \"catalog\".\"course_offerings\" o ON o.course_id = c.id"));
    }

    #[test]
    fn course_resolution_reuses_filter() {
        let rendered = term_filter().to_sql(2, "c", "offering");
        let sql = courses_by_outcome_sql(&tables(), &rendered);
        assert!(sql.contains("WHERE lo.id = ANY($1) AND c.campus_id = $2"));
        assert!(sql.contains("SELECT DISTINCT ON (lo.id, c.id)"));
    }

    #[test]
    fn search_drops_zero_norm_pairs_before_ranking() {
        let rendered = CourseFilter::default().to_sql(5, "c", "offering");
        let sql = search_sql(&tables(), EmbeddingDimension::D768, &rendered);
        let guard = sql
            .find("WHERE (ca.embedding <=> si.embedding) <> 'NaN'::float8")
            .unwrap();
        assert!(guard < sql.find("ROW_NUMBER()").unwrap());
        assert!(guard < sql.find("vr.similarity >= $4").unwrap());
    }
}
