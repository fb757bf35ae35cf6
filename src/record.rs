// Candidate Records - scraped admissions results before persistence
// Every field is optional: the survey site omits data freely.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

// ============================================================================
// ENUMS
// ============================================================================

/// Admission decision, as posted on the survey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Accepted,
    Rejected,
    #[serde(rename = "Wait listed", alias = "WaitListed")]
    WaitListed,
    Interview,
}

impl Status {
    /// Classify free decision text.
    ///
    /// Priority: Rejected > Accepted > Wait > anything else (Interview).
    /// A posting that mentions both "Accepted" and "Rejected" is a rejection.
    pub fn classify(decision_text: &str) -> Status {
        if decision_text.contains("Rejected") {
            Status::Rejected
        } else if decision_text.contains("Accepted") {
            Status::Accepted
        } else if decision_text.contains("Wait") {
            Status::WaitListed
        } else {
            Status::Interview
        }
    }

    /// Value stored in the `status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Accepted => "Accepted",
            Status::Rejected => "Rejected",
            Status::WaitListed => "Wait listed",
            Status::Interview => "Interview",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Degree {
    Masters,
    PhD,
}

impl Degree {
    /// Anything that does not say "PhD" is treated as a Masters program.
    pub fn from_program(program: &str) -> Degree {
        if program.contains("PhD") {
            Degree::PhD
        } else {
            Degree::Masters
        }
    }

    /// Exact stored label; anything else is unknown.
    pub fn parse(label: &str) -> Option<Degree> {
        match label.trim() {
            "Masters" => Some(Degree::Masters),
            "PhD" => Some(Degree::PhD),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Degree::Masters => "Masters",
            Degree::PhD => "PhD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Citizenship {
    International,
    American,
}

impl Citizenship {
    pub fn parse(label: &str) -> Option<Citizenship> {
        match label.trim() {
            "International" => Some(Citizenship::International),
            "American" => Some(Citizenship::American),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Citizenship::International => "International",
            Citizenship::American => "American",
        }
    }
}

// ============================================================================
// LENIENT FIELD DECODING
// ============================================================================

// Data files may carry free text (or non-string values) in the enum fields.
// Those decode to a best guess or None; they never fail the whole file.

fn optional_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string))
}

fn status_from_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Status>, D::Error> {
    Ok(optional_text(deserializer)?.map(|text| Status::classify(&text)))
}

fn degree_from_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Degree>, D::Error> {
    Ok(optional_text(deserializer)?.and_then(|text| Degree::parse(&text)))
}

fn citizenship_from_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Citizenship>, D::Error> {
    Ok(optional_text(deserializer)?.and_then(|text| Citizenship::parse(&text)))
}

// ============================================================================
// CANDIDATE RECORD
// ============================================================================

/// One extracted, not-yet-persisted survey entry.
///
/// Serialized with the field names used by the raw/cleaned JSON data files
/// (`applicant_status`, `semester_year_start`, `llm-generated-program`, ...),
/// so files written by earlier pulls load unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateRecord {
    /// "<program name>, <institution>"
    pub program: Option<String>,
    pub program_name: Option<String>,
    pub university: Option<String>,

    #[serde(rename = "masters_or_phd", alias = "degree", deserialize_with = "degree_from_text")]
    pub degree: Option<Degree>,

    pub comments: Option<String>,

    /// Posting date as displayed ("January 5, 2026"); parsed at load time
    pub date_added: Option<String>,

    /// Absolute link to the result's detail page (storage uniqueness key)
    pub url: Option<String>,

    #[serde(rename = "applicant_status", alias = "status", deserialize_with = "status_from_text")]
    pub status: Option<Status>,

    pub decision_date: Option<String>,
    pub acceptance_date: Option<String>,
    pub rejection_date: Option<String>,

    #[serde(rename = "semester_year_start", alias = "term")]
    pub term: Option<String>,

    #[serde(deserialize_with = "citizenship_from_text")]
    pub citizenship: Option<Citizenship>,

    // Labelled metric strings ("GPA 3.90", "GRE V 160"), parsed at load time
    pub gpa: Option<String>,
    pub gre: Option<String>,
    pub gre_v: Option<String>,
    pub gre_aw: Option<String>,

    #[serde(rename = "llm-generated-program", alias = "llm_generated_program")]
    pub llm_generated_program: Option<String>,

    #[serde(rename = "llm-generated-university", alias = "llm_generated_university")]
    pub llm_generated_university: Option<String>,
}

// ============================================================================
// DATA FILES
// ============================================================================

/// Write records as a pretty-printed JSON array.
pub fn save_records(records: &[CandidateRecord], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(records).context("Failed to serialize records")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Read records from a JSON array, or from JSON Lines when the file ends in `.jsonl`.
pub fn load_records(path: &Path) -> Result<Vec<CandidateRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: CandidateRecord = serde_json::from_str(line)
                .with_context(|| format!("Invalid record on line {}", index + 1))?;
            records.push(record);
        }
        return Ok(records);
    }

    serde_json::from_str(&content).context("Failed to deserialize records")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_priority() {
        assert_eq!(Status::classify("Accepted on 5 Feb"), Status::Accepted);
        assert_eq!(Status::classify("Rejected on 1 Mar"), Status::Rejected);
        assert_eq!(Status::classify("Wait listed on 2 Apr"), Status::WaitListed);
        assert_eq!(Status::classify("Interview on 3 Jan"), Status::Interview);
        assert_eq!(Status::classify("Other"), Status::Interview);

        // Higher-priority keyword always wins
        assert_eq!(Status::classify("Accepted then Rejected"), Status::Rejected);
        assert_eq!(Status::classify("Rejected, was Accepted"), Status::Rejected);
        assert_eq!(Status::classify("Wait listed then Accepted"), Status::Accepted);
        assert_eq!(Status::classify("Interview, Wait listed"), Status::WaitListed);
    }

    #[test]
    fn test_degree_from_program() {
        assert_eq!(Degree::from_program("Computer Science PhD, MIT"), Degree::PhD);
        assert_eq!(Degree::from_program("Computer Science, MIT"), Degree::Masters);
    }

    #[test]
    fn test_deserialize_data_file_keys() {
        let json = r#"{
            "program": "Computer Science, Johns Hopkins University",
            "applicant_status": "Accepted",
            "semester_year_start": "Fall 2026",
            "citizenship": "American",
            "gpa": "GPA 3.9",
            "degree": "Masters",
            "url": "https://x/1"
        }"#;

        let record: CandidateRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.status, Some(Status::Accepted));
        assert_eq!(record.term.as_deref(), Some("Fall 2026"));
        assert_eq!(record.citizenship, Some(Citizenship::American));
        assert_eq!(record.degree, Some(Degree::Masters));
        assert_eq!(record.gre, None);
    }

    #[test]
    fn test_load_records_with_free_text_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw_data.json");
        fs::write(
            &path,
            r#"[
                {"applicant_status": "Accepted on 15 Feb", "masters_or_phd": "MFA", "citizenship": "Other", "url": "https://x/1"},
                {"applicant_status": "Accepted", "masters_or_phd": "PhD", "citizenship": " International ", "url": "https://x/2"},
                {"applicant_status": "Wait listed on 2 Apr", "citizenship": null},
                {"applicant_status": 5, "masters_or_phd": "", "url": "https://x/3"}
            ]"#,
        )
        .unwrap();

        let records = load_records(&path).unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(records[0].status, Some(Status::Accepted));
        assert_eq!(records[0].degree, None);
        assert_eq!(records[0].citizenship, None);
        assert_eq!(records[1].status, Some(Status::Accepted));
        assert_eq!(records[1].degree, Some(Degree::PhD));
        assert_eq!(records[1].citizenship, Some(Citizenship::International));
        assert_eq!(records[2].status, Some(Status::WaitListed));
        assert_eq!(records[2].degree, None);
        assert_eq!(records[3].status, None);
        assert_eq!(records[3].url.as_deref(), Some("https://x/3"));
    }

    #[test]
    fn test_saved_enums_load_back() {
        let record = CandidateRecord {
            status: Some(Status::WaitListed),
            degree: Some(Degree::Masters),
            citizenship: Some(Citizenship::American),
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(serde_json::from_str::<CandidateRecord>(&json).unwrap(), record);
    }

    #[test]
    fn test_wait_listed_serializes_with_space() {
        let record = CandidateRecord {
            status: Some(Status::WaitListed),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["applicant_status"], "Wait listed");
    }

    #[test]
    fn test_save_and_load_json_and_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            CandidateRecord {
                program: Some("Physics, Yale University".to_string()),
                url: Some("https://x/2".to_string()),
                ..Default::default()
            },
            CandidateRecord::default(),
        ];

        let json_path = dir.path().join("raw_data.json");
        save_records(&records, &json_path).unwrap();
        assert_eq!(load_records(&json_path).unwrap(), records);

        let jsonl_path = dir.path().join("llm_output.jsonl");
        let lines: Vec<String> = records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect();
        fs::write(&jsonl_path, format!("{}\n\n{}\n", lines[0], lines[1])).unwrap();
        assert_eq!(load_records(&jsonl_path).unwrap(), records);
    }
}
