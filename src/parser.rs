// Record Extractor - survey listing markup → candidate records
//
// Each result is rendered as two adjacent table rows: a primary row
// (institution, program, date added, decision, link) followed by a
// one-cell metrics row (term, citizenship, GPA/GRE blob). Pairing must be
// exact; a shifted pair corrupts every record after it.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

use crate::harvester::BASE_URL;
use crate::normalize::{
    clean, extract_decision_date, extract_gpa, extract_gre, extract_gre_aw, extract_gre_v,
    extract_term_and_citizenship,
};
use crate::record::{CandidateRecord, Degree, Status};

static TABLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ROW_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static CELL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Minimum cell count of a primary row
const PRIMARY_MIN_CELLS: usize = 4;

// ============================================================================
// ROW SOURCES
// ============================================================================

/// One `<tr>`, reduced to its cleaned cell texts and first link.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub cells: Vec<String>,
    pub link: Option<String>,
}

impl RawRow {
    fn from_element(row: ElementRef) -> Self {
        let cells = row
            .select(&CELL_SELECTOR)
            .map(|cell| {
                let text = cell.text().collect::<Vec<_>>().join(" ");
                clean(Some(&text)).unwrap_or_default()
            })
            .collect();

        let link = row
            .select(&LINK_SELECTOR)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);

        RawRow { cells, link }
    }

    fn cell(&self, index: usize) -> Option<String> {
        self.cells.get(index).filter(|c| !c.is_empty()).cloned()
    }

    fn is_primary(&self) -> bool {
        self.cells.len() >= PRIMARY_MIN_CELLS
            && !(self.cells[0].is_empty() && self.cells[1].is_empty())
    }

    fn is_metrics(&self) -> bool {
        self.cells.len() == 1
    }
}

/// Where rows are read from.
///
/// The listing normally holds a results table; if the markup has none,
/// every row element in the document is scanned instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSource {
    Table,
    FlatScan,
}

impl RowSource {
    pub fn detect(document: &Html) -> RowSource {
        if document.select(&TABLE_SELECTOR).next().is_some() {
            RowSource::Table
        } else {
            RowSource::FlatScan
        }
    }

    /// `document` is `markup` already parsed.
    pub fn rows(&self, markup: &str, document: &Html) -> Vec<RawRow> {
        match self {
            RowSource::Table => document
                .select(&TABLE_SELECTOR)
                .next()
                .map(|table| table.select(&ROW_SELECTOR).map(RawRow::from_element).collect())
                .unwrap_or_default(),
            RowSource::FlatScan => {
                // The document parser drops <tr>/<td> outside a table, so
                // reparse the raw markup in table context.
                let fragment = Html::parse_fragment(&format!("<table>{}</table>", markup));
                fragment
                    .select(&ROW_SELECTOR)
                    .map(RawRow::from_element)
                    .collect()
            }
        }
    }
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Result of extracting one listing page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    /// Row elements found, whether or not they produced a record
    pub row_count: usize,
    pub records: Vec<CandidateRecord>,
}

/// Parse a listing page and pair its rows into records.
pub fn extract_page(markup: &str) -> ExtractedPage {
    let document = Html::parse_document(markup);
    let source = RowSource::detect(&document);
    let rows = source.rows(markup, &document);

    ExtractedPage {
        row_count: rows.len(),
        records: pair_rows(&rows),
    }
}

/// Records only; see [`extract_page`].
pub fn extract_records(markup: &str) -> Vec<CandidateRecord> {
    extract_page(markup).records
}

/// Walk rows, consuming each primary row together with the metrics row
/// directly after it.
pub fn pair_rows(rows: &[RawRow]) -> Vec<CandidateRecord> {
    let mut records = Vec::new();
    let mut index = 0;

    while index < rows.len() {
        let row = &rows[index];
        if !row.is_primary() {
            index += 1;
            continue;
        }

        let metrics = rows.get(index + 1).filter(|next| next.is_metrics());
        records.push(row_to_record(row, metrics));
        index += if metrics.is_some() { 2 } else { 1 };
    }

    records
}

/// Build a candidate record from a primary row and its optional metrics row.
pub fn row_to_record(primary: &RawRow, metrics: Option<&RawRow>) -> CandidateRecord {
    let university = primary.cell(0);
    let program_name = primary.cell(1);
    let program = [program_name.as_deref(), university.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");

    let decision_text = primary.cell(3).unwrap_or_default();
    let status = Status::classify(&decision_text);
    let decision_date = extract_decision_date(&decision_text);

    let metrics_text = metrics.and_then(|m| m.cell(0)).unwrap_or_default();
    let (term, citizenship) = extract_term_and_citizenship(&metrics_text);

    CandidateRecord {
        degree: Some(Degree::from_program(&program)),
        program: Some(program),
        program_name: program_name.clone(),
        university: university.clone(),
        comments: None,
        date_added: primary.cell(2),
        url: primary.link.as_deref().and_then(resolve_link),
        status: Some(status),
        acceptance_date: decision_date.clone().filter(|_| status == Status::Accepted),
        rejection_date: decision_date.clone().filter(|_| status == Status::Rejected),
        decision_date,
        term,
        citizenship,
        gpa: extract_gpa(&metrics_text),
        gre: extract_gre(&metrics_text),
        gre_v: extract_gre_v(&metrics_text),
        gre_aw: extract_gre_aw(&metrics_text),
        llm_generated_program: program_name,
        llm_generated_university: university,
    }
}

/// Absolute url for a result link, resolving relative paths against the site root.
pub fn resolve_link(href: &str) -> Option<String> {
    let href = clean(Some(href))?;
    if href.is_empty() {
        return None;
    }
    Url::parse(BASE_URL)
        .and_then(|base| base.join(&href))
        .map(|url| url.to_string())
        .ok()
}
