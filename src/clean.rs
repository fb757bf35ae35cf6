// Cleaner - second normalization pass over extracted records
//
// Re-cleans every text field (records may come from older data files, not
// only from the extractor) and backfills the LLM-labelled fields.

use crate::normalize::clean;
use crate::record::CandidateRecord;

fn clean_field(value: &mut Option<String>) {
    *value = clean(value.as_deref());
}

fn present(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Clean one record in place.
pub fn clean_record(record: &mut CandidateRecord) {
    for field in [
        &mut record.program,
        &mut record.program_name,
        &mut record.university,
        &mut record.comments,
        &mut record.date_added,
        &mut record.url,
        &mut record.decision_date,
        &mut record.acceptance_date,
        &mut record.rejection_date,
        &mut record.term,
        &mut record.gpa,
        &mut record.gre,
        &mut record.gre_v,
        &mut record.gre_aw,
        &mut record.llm_generated_program,
        &mut record.llm_generated_university,
    ] {
        clean_field(field);
    }

    if present(&record.llm_generated_program).is_none() {
        record.llm_generated_program =
            present(&record.program_name).or_else(|| present(&record.program));
    }
    if present(&record.llm_generated_university).is_none() {
        record.llm_generated_university = present(&record.university);
    }
}

/// Clean every record. Applying this twice gives the same output as once.
pub fn clean_data(mut records: Vec<CandidateRecord>) -> Vec<CandidateRecord> {
    for record in &mut records {
        clean_record(record);
    }
    records
}
