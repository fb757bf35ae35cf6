// Configuration - environment-driven settings for storage and scraping
// Empty environment variables count as unset.

use std::env;
use std::path::PathBuf;

/// Read an environment variable, falling back when it is unset or empty.
pub fn env_or(name: &str, fallback: Option<&str>) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => fallback.map(str::to_string),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    env_or(name, None)
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

// ============================================================================
// DATABASE
// ============================================================================

/// Location of the SQLite database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `DATABASE_URL` wins (`sqlite://path`, `sqlite:path` or a bare path);
    /// otherwise `{DB_DIR}/{DB_NAME}.db` with defaults `.` and `gradcafe`.
    pub fn from_env() -> Self {
        if let Some(url) = env_or("DATABASE_URL", None) {
            return Self::from_url(&url);
        }

        let dir = env_or("DB_DIR", Some(".")).unwrap_or_default();
        let name = env_or("DB_NAME", Some("gradcafe")).unwrap_or_default();
        Self::new(PathBuf::from(dir).join(format!("{}.db", name)))
    }

    pub fn from_url(url: &str) -> Self {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        Self::new(path)
    }
}

// ============================================================================
// SCRAPING
// ============================================================================

/// Termination bounds for one scrape run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeLimits {
    /// Stop once this many records were collected
    pub min_entries: usize,
    /// Never fetch past this page
    pub max_pages: u32,
    /// Results requested per listing page
    pub per_page: u32,
}

impl Default for ScrapeLimits {
    fn default() -> Self {
        Self {
            min_entries: 30_000,
            max_pages: 2_000,
            per_page: 100,
        }
    }
}

impl ScrapeLimits {
    /// Defaults overridden by `SCRAPE_MIN_ENTRIES`, `SCRAPE_MAX_PAGES`, `SCRAPE_PER_PAGE`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_entries: env_parse("SCRAPE_MIN_ENTRIES", defaults.min_entries),
            max_pages: env_parse("SCRAPE_MAX_PAGES", defaults.max_pages),
            per_page: env_parse("SCRAPE_PER_PAGE", defaults.per_page),
        }
    }
}
