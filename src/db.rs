use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DbConfig;
use crate::normalize::{parse_date, parse_float, GPA_VALUE, GRE_AW_VALUE, GRE_VALUE, GRE_V_VALUE};
use crate::record::CandidateRecord;

/// Column order of the `applicants` table (without the `p_id` identity)
pub const APPLICANT_COLUMNS: [&str; 14] = [
    "program",
    "comments",
    "date_added",
    "url",
    "status",
    "term",
    "us_or_international",
    "gpa",
    "gre",
    "gre_v",
    "gre_aw",
    "degree",
    "llm_generated_program",
    "llm_generated_university",
];

/// A candidate record mapped onto the storage columns.
/// Rows are insert-only: never updated in place, never deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicantRow {
    pub program: Option<String>,
    pub comments: Option<String>,
    pub date_added: Option<NaiveDate>,
    /// Unique when present. NULL urls are not deduplicated against each other.
    pub url: Option<String>,
    pub status: Option<String>,
    pub term: Option<String>,
    pub us_or_international: Option<String>,
    pub gpa: Option<f64>,
    pub gre: Option<f64>,
    pub gre_v: Option<f64>,
    pub gre_aw: Option<f64>,
    pub degree: Option<String>,
    pub llm_generated_program: Option<String>,
    pub llm_generated_university: Option<String>,
}

/// A stored row together with its identity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredApplicant {
    pub p_id: i64,
    #[serde(flatten)]
    pub row: ApplicantRow,
}

// ============================================================================
// CONNECTION & SCHEMA
// ============================================================================

/// Open the configured database and apply per-connection settings.
pub fn open_connection(config: &DbConfig) -> Result<Connection> {
    let conn = Connection::open(&config.path)
        .with_context(|| format!("Failed to open database at {}", config.path.display()))?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Per-connection settings: WAL so readers never block the loader, and
/// case-sensitive LIKE so institution filters ("%MIT%") match exact case.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "case_sensitive_like", true)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Create the `applicants` table if absent. Safe to call on every load.
pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS applicants (
            p_id INTEGER PRIMARY KEY AUTOINCREMENT,
            program TEXT,
            comments TEXT,
            date_added DATE,
            url TEXT UNIQUE,
            status TEXT,
            term TEXT,
            us_or_international TEXT,
            gpa REAL,
            gre REAL,
            gre_v REAL,
            gre_aw REAL,
            degree TEXT,
            llm_generated_program TEXT,
            llm_generated_university TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_applicants_status ON applicants(status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_applicants_degree ON applicants(degree)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// LOADING
// ============================================================================

/// Map candidates onto storage columns, parsing the date and metric strings.
/// Unparseable values become NULL.
pub fn prepare_rows(records: &[CandidateRecord]) -> Vec<ApplicantRow> {
    records
        .iter()
        .map(|r| ApplicantRow {
            program: r.program.clone(),
            comments: r.comments.clone(),
            date_added: parse_date(r.date_added.as_deref()),
            url: r.url.clone(),
            status: r.status.map(|s| s.as_str().to_string()),
            term: r.term.clone(),
            us_or_international: r.citizenship.map(|c| c.as_str().to_string()),
            gpa: parse_float(r.gpa.as_deref(), &GPA_VALUE),
            gre: parse_float(r.gre.as_deref(), &GRE_VALUE),
            gre_v: parse_float(r.gre_v.as_deref(), &GRE_V_VALUE),
            gre_aw: parse_float(r.gre_aw.as_deref(), &GRE_AW_VALUE),
            degree: r.degree.map(|d| d.as_str().to_string()),
            llm_generated_program: r.llm_generated_program.clone(),
            llm_generated_university: r.llm_generated_university.clone(),
        })
        .collect()
}

/// Insert all rows in one transaction. Rows whose url is already stored are
/// skipped silently; returns how many rows were actually inserted.
pub fn insert_rows(conn: &mut Connection, rows: &[ApplicantRow]) -> Result<usize> {
    let sql = format!(
        "INSERT INTO applicants ({}) VALUES ({}) ON CONFLICT(url) DO NOTHING",
        APPLICANT_COLUMNS.join(", "),
        (1..=APPLICANT_COLUMNS.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(&sql)?;
        for row in rows {
            inserted += stmt.execute(params![
                row.program,
                row.comments,
                row.date_added,
                row.url,
                row.status,
                row.term,
                row.us_or_international,
                row.gpa,
                row.gre,
                row.gre_v,
                row.gre_aw,
                row.degree,
                row.llm_generated_program,
                row.llm_generated_university,
            ])?;
        }
    }
    tx.commit()?;

    info!(
        inserted,
        skipped_duplicates = rows.len() - inserted,
        "inserted applicant rows"
    );

    Ok(inserted)
}

/// prepare → open → ensure schema → insert. Returns the prepared rows.
pub fn load_applicants(config: &DbConfig, records: &[CandidateRecord]) -> Result<Vec<ApplicantRow>> {
    let prepared = prepare_rows(records);
    let mut conn = open_connection(config)?;
    setup_database(&conn)?;
    insert_rows(&mut conn, &prepared)?;
    Ok(prepared)
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM applicants", [], |row| row.get(0))?;

    Ok(count)
}

pub fn get_all_applicants(conn: &Connection) -> Result<Vec<StoredApplicant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT p_id, {} FROM applicants ORDER BY p_id",
        APPLICANT_COLUMNS.join(", ")
    ))?;

    let applicants = stmt
        .query_map([], |row| {
            Ok(StoredApplicant {
                p_id: row.get(0)?,
                row: ApplicantRow {
                    program: row.get(1)?,
                    comments: row.get(2)?,
                    date_added: row.get(3)?,
                    url: row.get(4)?,
                    status: row.get(5)?,
                    term: row.get(6)?,
                    us_or_international: row.get(7)?,
                    gpa: row.get(8)?,
                    gre: row.get(9)?,
                    gre_v: row.get(10)?,
                    gre_aw: row.get(11)?,
                    degree: row.get(12)?,
                    llm_generated_program: row.get(13)?,
                    llm_generated_university: row.get(14)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(applicants)
}
