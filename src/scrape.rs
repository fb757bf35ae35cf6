// Scrape Driver - page-by-page harvesting until a target is met
//
// Terminates when enough records were collected, the page budget is spent,
// or MAX_EMPTY_PAGES consecutive pages came back without any rows.

use tracing::{debug, info, warn};

use crate::config::ScrapeLimits;
use crate::harvester::{HarvestError, PageSource};
use crate::parser::extract_page;
use crate::record::CandidateRecord;

/// Consecutive row-less pages after which the site is considered exhausted (or blocking us)
pub const MAX_EMPTY_PAGES: u32 = 5;

/// Harvest and extract listing pages, returning every record collected.
///
/// Nothing is returned until the loop ends; a harvester error aborts the
/// whole run and discards what was collected so far.
pub async fn scrape_data(
    source: &dyn PageSource,
    limits: &ScrapeLimits,
) -> Result<Vec<CandidateRecord>, HarvestError> {
    let mut results: Vec<CandidateRecord> = Vec::new();
    let mut page: u32 = 1;
    let mut empty_streak: u32 = 0;

    while page <= limits.max_pages && results.len() < limits.min_entries {
        let markup = source.fetch_page(page, limits.per_page).await?;
        let extracted = extract_page(&markup);

        if extracted.row_count == 0 {
            empty_streak += 1;
            warn!(page, empty_streak, "listing page has no rows");
            if empty_streak >= MAX_EMPTY_PAGES {
                info!(page, "stopping scrape after {} empty pages", MAX_EMPTY_PAGES);
                break;
            }
            page += 1;
            continue;
        }

        empty_streak = 0;
        debug!(
            page,
            rows = extracted.row_count,
            records = extracted.records.len(),
            "extracted listing page"
        );
        results.extend(extracted.records);
        page += 1;
    }

    info!(records = results.len(), last_page = page, "scrape finished");
    Ok(results)
}
