// GradCafe Analytics - Core Library
// Scrape → clean → load → aggregate pipeline, shared by the CLI, the web server and tests

pub mod clean;
pub mod config;
pub mod db;
pub mod harvester;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod scrape;

// Re-export commonly used types
pub use clean::clean_data;
pub use config::{DbConfig, ScrapeLimits};
pub use db::{
    get_all_applicants, insert_rows, load_applicants, open_connection, prepare_rows,
    setup_database, verify_count, ApplicantRow, StoredApplicant,
};
pub use harvester::{HarvestError, HttpHarvester, PageSource};
pub use parser::{extract_page, extract_records, ExtractedPage, RowSource};
pub use pipeline::{Pipeline, PullGuard, PullLease, PullOutcome, RecomputeOutcome};
pub use query::{
    clamp_limit, fetch_analysis, get_analysis, Analysis, AnalysisParams, StatusGpa,
    UniversityCount,
};
pub use record::{load_records, save_records, CandidateRecord, Citizenship, Degree, Status};
pub use scrape::scrape_data;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
