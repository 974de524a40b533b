//! Course filter predicate shared by retrieval and aggregation.
//!
//! The same [`CourseFilter`] must be applied at both stages; the SQL and
//! in-memory evaluations below are kept equivalent.

use serde::{Deserialize, Serialize};
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::model::{CourseOffering, CourseRecord};

/// Boxed SQL parameter owned by a built clause.
pub type SqlParam = Box<dyn ToSql + Sync + Send>;

/// One academic year, optionally narrowed to specific semesters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYearSemesters {
    /// Academic year an offering must fall in.
    pub academic_year: i32,
    /// Allowed semesters; omitted or empty means the whole year.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semesters: Option<Vec<i32>>,
}

impl AcademicYearSemesters {
    /// Semester list, treating an empty list like an omitted one.
    fn semester_constraint(&self) -> Option<&[i32]> {
        self.semesters.as_deref().filter(|list| !list.is_empty())
    }

    fn matches(&self, offering: &CourseOffering) -> bool {
        offering.academic_year == self.academic_year
            && self
                .semester_constraint()
                .map_or(true, |list| list.contains(&offering.semester))
    }
}

/// Campus / faculty / gen-ed / term restrictions. Top-level fields are AND'd;
/// `academic_year_semesters` entries are OR'd.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseFilter {
    /// Restrict to one campus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campus_id: Option<Uuid>,
    /// Restrict to one faculty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faculty_id: Option<Uuid>,
    /// Only gen-ed courses (`true`) or only non-gen-ed (`false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_gen_ed: Option<bool>,
    /// Course must have an offering matching at least one entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub academic_year_semesters: Option<Vec<AcademicYearSemesters>>,
}

/// Rendered WHERE fragments plus their bound parameters.
pub struct SqlFilter {
    /// Extra JOIN clause, empty when no offering constraint applies.
    pub joins: String,
    /// Conditions to AND into the WHERE clause.
    pub conditions: Vec<String>,
    /// Parameters numbered from the `first_placeholder` given to the builder.
    pub params: Vec<SqlParam>,
}

impl SqlFilter {
    /// Conditions rendered as ` AND ...` suffixes.
    pub fn and_clause(&self) -> String {
        self.conditions
            .iter()
            .map(|condition| format!(" AND {condition}"))
            .collect()
    }
}

impl CourseFilter {
    fn term_entries(&self) -> &[AcademicYearSemesters] {
        self.academic_year_semesters.as_deref().unwrap_or(&[])
    }

    /// Whether an offering join is needed at all.
    pub fn constrains_offerings(&self) -> bool {
        !self.term_entries().is_empty()
    }

    /// Evaluates the course-level fields (everything except terms).
    pub fn matches_course(&self, course: &CourseRecord) -> bool {
        self.campus_id.map_or(true, |id| course.campus_id == id)
            && self.faculty_id.map_or(true, |id| course.faculty_id == id)
            && self.is_gen_ed.map_or(true, |flag| course.is_gen_ed == flag)
    }

    /// Offerings that satisfy the term constraint.
    pub fn matching_offerings<'a>(&self, offerings: &'a [CourseOffering]) -> Vec<&'a CourseOffering> {
        let entries = self.term_entries();
        offerings
            .iter()
            .filter(|offering| entries.iter().any(|entry| entry.matches(offering)))
            .collect()
    }

    /// Number of raw join rows a course contributes: 0 when excluded, 1 when
    /// no term constraint applies, otherwise one per qualifying offering.
    pub fn join_multiplicity(&self, course: &CourseRecord, offerings: &[CourseOffering]) -> usize {
        if !self.matches_course(course) {
            return 0;
        }
        if !self.constrains_offerings() {
            return 1;
        }
        self.matching_offerings(offerings)
            .into_iter()
            .filter(|offering| offering.course_id == course.id)
            .count()
    }

    /// Builds parameterised SQL for this filter.
    ///
    /// `course_alias` names the joined course relation, `offering_table` is the
    /// qualified offering table. The offering join can multiply rows; callers
    /// collapse duplicates.
    pub fn to_sql(
        &self,
        first_placeholder: usize,
        course_alias: &str,
        offering_table: &str,
    ) -> SqlFilter {
        let mut next = first_placeholder;
        let mut conditions = Vec::new();
        let mut params: Vec<SqlParam> = Vec::new();
        let mut placeholder = |param: SqlParam, params: &mut Vec<SqlParam>| {
            params.push(param);
            let current = next;
            next += 1;
            format!("${current}")
        };

        if let Some(campus_id) = self.campus_id {
            let p = placeholder(Box::new(campus_id), &mut params);
            conditions.push(format!("{course_alias}.campus_id = {p}"));
        }
        if let Some(faculty_id) = self.faculty_id {
            let p = placeholder(Box::new(faculty_id), &mut params);
            conditions.push(format!("{course_alias}.faculty_id = {p}"));
        }
        if let Some(is_gen_ed) = self.is_gen_ed {
            let p = placeholder(Box::new(is_gen_ed), &mut params);
            conditions.push(format!("{course_alias}.is_gen_ed = {p}"));
        }

        let mut joins = String::new();
        let entries = self.term_entries();
        if !entries.is_empty() {
            joins = format!(" JOIN {offering_table} o ON o.course_id = {course_alias}.id");
            let mut alternatives = Vec::with_capacity(entries.len());
            for entry in entries {
                let year = placeholder(Box::new(entry.academic_year), &mut params);
                match entry.semester_constraint() {
                    Some(semesters) => {
                        let list = placeholder(Box::new(semesters.to_vec()), &mut params);
                        alternatives.push(format!(
                            "(o.academic_year = {year} AND o.semester = ANY({list}))"
                        ));
                    }
                    None => alternatives.push(format!("(o.academic_year = {year})")),
                }
            }
            conditions.push(format!("({})", alternatives.join(" OR ")));
        }

        SqlFilter {
            joins,
            conditions,
            params,
        }
    }
}
