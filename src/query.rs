//! Read-only analysis queries over the `applicants` table.
//!
//! Every statement is a fixed SQL string with bound parameters; nothing is
//! spliced into the SQL text. Each query sees its own point-in-time view, so
//! a run that is still loading may be partially visible. Averages and
//! percentages are `None` when nothing matched: that means "no data", not 0.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::config::DbConfig;
use crate::db::{open_connection, setup_database};

/// Upper bound for caller-supplied row limits
pub const MAX_LIMIT: i64 = 100;

/// Rows returned by the top-universities query
pub const TOP_UNIVERSITIES: i64 = 5;

/// Institution name variants matched (as substrings of `program`) by the PhD query
pub const PHD_INSTITUTION_PATTERNS: [&str; 5] = [
    "Georgetown University",
    "Massachusetts Institute of Technology",
    "MIT",
    "Stanford University",
    "Carnegie Mellon University",
];

/// Institutions matched exactly against `llm_generated_university`
pub const LLM_INSTITUTIONS: [&str; 4] = [
    "Georgetown University",
    "Massachusetts Institute of Technology",
    "Stanford University",
    "Carnegie Mellon University",
];

// ============================================================================
// STATEMENTS
// ============================================================================

const STMT_TERM_COUNT: &str = "
    SELECT COUNT(*)
    FROM applicants
    WHERE term LIKE ?1";

const STMT_INTL_PCT: &str = "
    SELECT ROUND(
        100.0 * SUM(CASE WHEN us_or_international = 'International' THEN 1 ELSE 0 END)
        / NULLIF(COUNT(*), 0),
        2
    )
    FROM applicants
    WHERE us_or_international IS NOT NULL";

const STMT_AVG_METRICS: &str = "
    SELECT
        ROUND(AVG(gpa), 2),
        ROUND(AVG(gre), 2),
        ROUND(AVG(gre_v), 2),
        ROUND(AVG(gre_aw), 2)
    FROM applicants";

const STMT_AVG_GPA_AMERICAN: &str = "
    SELECT ROUND(AVG(gpa), 2)
    FROM applicants
    WHERE term LIKE ?1
      AND us_or_international = 'American'
      AND gpa IS NOT NULL";

const STMT_ACCEPT_PCT: &str = "
    SELECT ROUND(
        100.0 * SUM(CASE WHEN status = 'Accepted' THEN 1 ELSE 0 END)
        / NULLIF(COUNT(*), 0),
        2
    )
    FROM applicants
    WHERE term LIKE ?1";

const STMT_AVG_GPA_ACCEPTED: &str = "
    SELECT ROUND(AVG(gpa), 2)
    FROM applicants
    WHERE term LIKE ?1
      AND status = 'Accepted'
      AND gpa IS NOT NULL";

const STMT_MASTERS_AT_INSTITUTION: &str = "
    SELECT COUNT(*)
    FROM applicants
    WHERE program LIKE ?1
      AND degree = 'Masters'
      AND program LIKE ?2";

const STMT_PHD_ACCEPTED: &str = "
    SELECT COUNT(*)
    FROM applicants
    WHERE term LIKE ?1
      AND status = 'Accepted'
      AND degree = 'PhD'
      AND program LIKE ?2
      AND (
        program LIKE ?3
        OR program LIKE ?4
        OR program LIKE ?5
        OR program LIKE ?6
        OR program LIKE ?7
      )";

const STMT_PHD_ACCEPTED_LLM: &str = "
    SELECT COUNT(*)
    FROM applicants
    WHERE term LIKE ?1
      AND status = 'Accepted'
      AND degree = 'PhD'
      AND llm_generated_program LIKE ?2
      AND llm_generated_university IN (?3, ?4, ?5, ?6)";

const STMT_GPA_BY_STATUS: &str = "
    SELECT status, ROUND(AVG(gpa), 2) AS avg_gpa
    FROM applicants
    WHERE term LIKE ?1 AND gpa IS NOT NULL
    GROUP BY status
    ORDER BY avg_gpa DESC
    LIMIT ?2";

const STMT_TOP_UNIVERSITIES: &str = "
    SELECT llm_generated_university, COUNT(*) AS total
    FROM applicants
    WHERE term LIKE ?1 AND llm_generated_university IS NOT NULL
    GROUP BY llm_generated_university
    ORDER BY total DESC, llm_generated_university
    LIMIT ?2";

// ============================================================================
// PARAMETERS & RESULTS
// ============================================================================

/// Filters applied by the query battery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Admissions term, e.g. "Fall 2026"
    pub term: String,
    /// Year for the PhD acceptance counts, e.g. "2026"
    pub year: String,
    /// Field of study matched inside program names
    pub program: String,
    /// Institution for the Masters count
    pub institution: String,
    /// Row cap for grouped results, clamped to 1..=MAX_LIMIT
    pub limit: i64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            term: "Fall 2026".to_string(),
            year: "2026".to_string(),
            program: "Computer Science".to_string(),
            institution: "Johns Hopkins".to_string(),
            limit: MAX_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusGpa {
    pub status: Option<String>,
    pub avg_gpa: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniversityCount {
    pub university: String,
    pub total: i64,
}

/// Results of one pass over the query battery.
///
/// Field names follow the default parameters (Fall 2026, Johns Hopkins
/// Masters in Computer Science); `params` records what was actually used.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Analysis {
    pub params: AnalysisParams,
    pub term_count: i64,
    pub international_percent: Option<f64>,
    pub avg_gpa: Option<f64>,
    pub avg_gre: Option<f64>,
    pub avg_gre_v: Option<f64>,
    pub avg_gre_aw: Option<f64>,
    pub avg_gpa_american_fall: Option<f64>,
    pub accept_percent_fall: Option<f64>,
    pub avg_gpa_accept_fall: Option<f64>,
    pub jhu_ms_cs: i64,
    pub cs_phd_accept_2026: i64,
    pub cs_phd_accept_2026_llm: i64,
    pub gpa_by_status: Vec<StatusGpa>,
    pub top_universities: Vec<UniversityCount>,
}

/// Clamp a caller-supplied limit into `low..=high`; missing or unparseable input uses `default`.
pub fn clamp_limit(value: Option<&str>, default: i64, low: i64, high: i64) -> i64 {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
        .clamp(low, high)
}

fn like(value: &str) -> String {
    format!("%{}%", value)
}

// ============================================================================
// QUERY BATTERY
// ============================================================================

/// Run every analysis query on an open connection.
pub fn get_analysis(conn: &Connection, params: &AnalysisParams) -> Result<Analysis> {
    let term_like = like(&params.term);
    let year_like = like(&params.year);
    let program_like = like(&params.program);
    let limit = params.limit.clamp(1, MAX_LIMIT);

    let term_count: i64 = conn
        .query_row(STMT_TERM_COUNT, params![term_like], |row| row.get(0))
        .context("term count query failed")?;

    let international_percent: Option<f64> =
        conn.query_row(STMT_INTL_PCT, [], |row| row.get(0))?;

    let (avg_gpa, avg_gre, avg_gre_v, avg_gre_aw) =
        conn.query_row(STMT_AVG_METRICS, [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;

    let avg_gpa_american_fall: Option<f64> =
        conn.query_row(STMT_AVG_GPA_AMERICAN, params![term_like], |row| row.get(0))?;

    let accept_percent_fall: Option<f64> =
        conn.query_row(STMT_ACCEPT_PCT, params![term_like], |row| row.get(0))?;

    let avg_gpa_accept_fall: Option<f64> =
        conn.query_row(STMT_AVG_GPA_ACCEPTED, params![term_like], |row| row.get(0))?;

    let jhu_ms_cs: i64 = conn.query_row(
        STMT_MASTERS_AT_INSTITUTION,
        params![program_like, like(&params.institution)],
        |row| row.get(0),
    )?;

    let [g, mit_full, mit, stanford, cmu] = PHD_INSTITUTION_PATTERNS.map(like);
    let cs_phd_accept_2026: i64 = conn.query_row(
        STMT_PHD_ACCEPTED,
        params![year_like, program_like, g, mit_full, mit, stanford, cmu],
        |row| row.get(0),
    )?;

    let [g, mit_full, stanford, cmu] = LLM_INSTITUTIONS;
    let cs_phd_accept_2026_llm: i64 = conn.query_row(
        STMT_PHD_ACCEPTED_LLM,
        params![year_like, program_like, g, mit_full, stanford, cmu],
        |row| row.get(0),
    )?;

    let gpa_by_status = conn
        .prepare(STMT_GPA_BY_STATUS)?
        .query_map(params![term_like, limit], |row| {
            Ok(StatusGpa {
                status: row.get(0)?,
                avg_gpa: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let top_universities = conn
        .prepare(STMT_TOP_UNIVERSITIES)?
        .query_map(params![term_like, TOP_UNIVERSITIES], |row| {
            Ok(UniversityCount {
                university: row.get(0)?,
                total: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Analysis {
        params: AnalysisParams {
            limit,
            ..params.clone()
        },
        term_count,
        international_percent,
        avg_gpa,
        avg_gre,
        avg_gre_v,
        avg_gre_aw,
        avg_gpa_american_fall,
        accept_percent_fall,
        avg_gpa_accept_fall,
        jhu_ms_cs,
        cs_phd_accept_2026,
        cs_phd_accept_2026_llm,
        gpa_by_status,
        top_universities,
    })
}

/// Open a dedicated read connection and run the query battery.
///
/// The table is created when missing, so a fresh database reports empty
/// results instead of an error.
pub fn fetch_analysis(config: &DbConfig, params: &AnalysisParams) -> Result<Analysis> {
    let conn = open_connection(config)?;
    setup_database(&conn)?;
    get_analysis(&conn, params)
}

/// Row count, if the table exists yet
pub fn applicant_count(conn: &Connection) -> Result<Option<i64>> {
    let exists = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'applicants'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?;

    match exists {
        Some(_) => Ok(Some(conn.query_row("SELECT COUNT(*) FROM applicants", [], |row| row.get(0))?)),
        None => Ok(None),
    }
}
