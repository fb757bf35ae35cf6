// Field Normalizer - string cleaning and pattern extraction
// Shared by extraction (parser), the cleaning pass and the loader.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

use crate::record::Citizenship;

// ============================================================================
// PATTERNS
// ============================================================================

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static GPA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)GPA\s*([0-4]\.\d{1,2})").unwrap());
static GRE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)GRE\s*(\d{3})").unwrap());
static GRE_V_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)GRE[-\s]*V\s*(\d{2,3})").unwrap());
static GRE_AW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)GRE[-\s]*AW\s*([0-6](?:\.\d)?)").unwrap());

static TERM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(Fall|Spring|Summer|Winter)\s+\d{4}\b").unwrap());

static DECISION_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}\s\w{3}").unwrap());

/// Load-time pattern for the `gpa` column.
pub static GPA_VALUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-4]\.\d{1,2})").unwrap());

/// Load-time pattern for the `gre` column. Only a bare number or one directly
/// after the "GRE" label counts, so "GRE V 160" is never read as a total.
pub static GRE_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|GRE\s*)(\d{3})\b").unwrap());

/// Load-time pattern for the `gre_v` column.
pub static GRE_V_VALUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{2,3})").unwrap());

/// Load-time pattern for the `gre_aw` column.
pub static GRE_AW_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-6](?:\.\d)?)").unwrap());

const DATE_FORMATS: [&str; 2] = ["%B %d, %Y", "%b %d, %Y"];

// ============================================================================
// CLEANING & PARSING
// ============================================================================

/// Collapse every whitespace run to a single space and trim both ends.
pub fn clean(text: Option<&str>) -> Option<String> {
    text.map(|t| WHITESPACE_RE.replace_all(t, " ").trim().to_string())
}

/// Parse a posting date ("January 5, 2026" or "Jan 5, 2026").
///
/// Returns `None` for absent or unparseable input, never an error.
pub fn parse_date(text: Option<&str>) -> Option<NaiveDate> {
    let text = text?.trim();
    if text.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// First capture group of `pattern` in `text`, as a float.
pub fn parse_float(text: Option<&str>, pattern: &Regex) -> Option<f64> {
    let text = text?;
    if text.is_empty() {
        return None;
    }
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

// ============================================================================
// METRIC EXTRACTION
// ============================================================================

fn labelled_capture(pattern: &Regex, text: &str, label: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| format!("{} {}", label, m.as_str()))
}

/// "GPA 3.90" from a metrics blob
pub fn extract_gpa(text: &str) -> Option<String> {
    labelled_capture(&GPA_RE, text, "GPA")
}

/// "GRE 320" from a metrics blob
pub fn extract_gre(text: &str) -> Option<String> {
    labelled_capture(&GRE_RE, text, "GRE")
}

/// "GRE V 160" from a metrics blob
pub fn extract_gre_v(text: &str) -> Option<String> {
    labelled_capture(&GRE_V_RE, text, "GRE V")
}

/// "GRE AW 4.5" from a metrics blob
pub fn extract_gre_aw(text: &str) -> Option<String> {
    labelled_capture(&GRE_AW_RE, text, "GRE AW")
}

/// Admissions term ("Fall 2026") and citizenship from a metrics blob.
///
/// "American" is checked before "International"; a blob mentioning both is American.
pub fn extract_term_and_citizenship(text: &str) -> (Option<String>, Option<Citizenship>) {
    let term = TERM_RE.find(text).map(|m| m.as_str().to_string());

    let citizenship = if text.contains("American") {
        Some(Citizenship::American)
    } else if text.contains("International") {
        Some(Citizenship::International)
    } else {
        None
    };

    (term, citizenship)
}

/// Decision date ("5 Feb") embedded in the decision text, if any.
pub fn extract_decision_date(decision_text: &str) -> Option<String> {
    DECISION_DATE_RE
        .find(decision_text)
        .map(|m| m.as_str().to_string())
}
