// Pipeline - pull orchestration and the in-flight run guard
//
// One pull (harvest -> extract -> clean -> load) at a time. A second trigger
// while a run is in flight is answered with Busy immediately, never queued.
// Aggregate reads do not take the guard and may see a partially loaded table.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clean::clean_data;
use crate::config::{DbConfig, ScrapeLimits};
use crate::db::load_applicants;
use crate::harvester::PageSource;
use crate::query::{fetch_analysis, Analysis, AnalysisParams};
use crate::scrape::scrape_data;

// ============================================================================
// BUSY GUARD
// ============================================================================

/// Non-reentrant indicator that a pull run is in flight.
#[derive(Debug, Default)]
pub struct PullGuard {
    busy: AtomicBool,
}

impl PullGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the guard. Returns false if a run already holds it.
    pub fn try_start(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the guard, whether or not it was held.
    pub fn end(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the guard for the lifetime of the returned lease.
    pub fn acquire(self: &Arc<Self>) -> Option<PullLease> {
        if self.try_start() {
            Some(PullLease {
                guard: Arc::clone(self),
            })
        } else {
            None
        }
    }
}

/// Held by a running pull; dropping it (success, error or panic) ends the run.
#[derive(Debug)]
pub struct PullLease {
    guard: Arc<PullGuard>,
}

impl Drop for PullLease {
    fn drop(&mut self) {
        self.guard.end();
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    /// Another run is in flight; nothing was started
    Busy,
    /// Run started in the background
    Accepted,
    /// Run finished inline; `rows` records were handed to the loader
    Completed { rows: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeOutcome {
    Busy,
    Ok(Analysis),
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Owns everything a pull needs, plus the guard shared with trigger handlers.
#[derive(Clone)]
pub struct Pipeline {
    source: Arc<dyn PageSource>,
    db: DbConfig,
    limits: ScrapeLimits,
    params: AnalysisParams,
    guard: Arc<PullGuard>,
    run_async: bool,
}

impl Pipeline {
    /// Background runs, default limits and default analysis parameters.
    pub fn new(source: Arc<dyn PageSource>, db: DbConfig) -> Self {
        Self {
            source,
            db,
            limits: ScrapeLimits::default(),
            params: AnalysisParams::default(),
            guard: Arc::new(PullGuard::new()),
            run_async: true,
        }
    }

    pub fn with_limits(mut self, limits: ScrapeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_params(mut self, params: AnalysisParams) -> Self {
        self.params = params;
        self
    }

    /// When false, `trigger_pull` waits for the run and reports its result.
    pub fn run_async(mut self, run_async: bool) -> Self {
        self.run_async = run_async;
        self
    }

    pub fn guard(&self) -> &Arc<PullGuard> {
        &self.guard
    }

    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    pub fn params(&self) -> &AnalysisParams {
        &self.params
    }

    /// Start a pull unless one is already running.
    ///
    /// In async mode the run is spawned and `Accepted` is returned at once;
    /// its failure is only logged. In sync mode a failure is returned here.
    pub async fn trigger_pull(&self) -> Result<PullOutcome> {
        let Some(lease) = self.guard.acquire() else {
            warn!("pull requested while another run is in flight");
            return Ok(PullOutcome::Busy);
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("pull", %run_id);
        let source = Arc::clone(&self.source);
        let db = self.db.clone();
        let limits = self.limits;

        if self.run_async {
            tokio::spawn(
                async move {
                    let _lease = lease;
                    match run_pipeline(source, db, limits).await {
                        Ok(rows) => info!(rows, "pull run finished"),
                        Err(e) => error!(error = %format!("{:#}", e), "pull run failed"),
                    }
                }
                .instrument(span),
            );
            return Ok(PullOutcome::Accepted);
        }

        let result = run_pipeline(source, db, limits).instrument(span).await;
        drop(lease);
        let rows = result?;
        Ok(PullOutcome::Completed { rows })
    }

    /// Recompute aggregates unless a pull is running.
    pub async fn trigger_recompute(&self) -> Result<RecomputeOutcome> {
        if self.guard.is_busy() {
            return Ok(RecomputeOutcome::Busy);
        }
        Ok(RecomputeOutcome::Ok(self.get_aggregates().await?))
    }

    /// Current aggregates, regardless of any run in flight.
    pub async fn get_aggregates(&self) -> Result<Analysis> {
        let db = self.db.clone();
        let params = self.params.clone();
        tokio::task::spawn_blocking(move || fetch_analysis(&db, &params))
            .await
            .context("analysis task panicked")?
    }
}

/// Harvest, clean and load; returns how many records reached the loader.
async fn run_pipeline(
    source: Arc<dyn PageSource>,
    db: DbConfig,
    limits: ScrapeLimits,
) -> Result<usize> {
    info!(
        min_entries = limits.min_entries,
        max_pages = limits.max_pages,
        "pull run started"
    );

    let raw = scrape_data(source.as_ref(), &limits)
        .await
        .context("scrape failed")?;
    let cleaned = clean_data(raw);

    let rows = tokio::task::spawn_blocking(move || load_applicants(&db, &cleaned))
        .await
        .context("loader task panicked")??;

    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvester::HarvestError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    const EMPTY_PAGE: &str = "<html><body></body></html>";

    fn results_page() -> String {
        "<table>\
         <tr><td>Johns Hopkins University</td><td>Computer Science</td><td>Jan 5, 2026</td>\
         <td>Accepted on 5 Jan</td><td><a href=\"/result/1\">x</a></td></tr>\
         <tr><td>Fall 2026 American GPA 3.90</td></tr>\
         <tr><td>Stanford University</td><td>Physics PhD</td><td>Jan 6, 2026</td>\
         <td>Rejected on 6 Jan</td><td><a href=\"/result/2\">x</a></td></tr>\
         <tr><td>Fall 2026 International GPA 3.50</td></tr>\
         </table>"
            .to_string()
    }

    /// Page 1 has results, later pages are empty. Optionally waits on a gate
    /// before answering, or fails every request.
    struct TestSource {
        calls: AtomicU32,
        gate: Option<Semaphore>,
        fail: bool,
    }

    impl TestSource {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                gate: None,
                fail: false,
            }
        }

        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::new()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn open_gate(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(1_000);
            }
        }
    }

    #[async_trait]
    impl PageSource for TestSource {
        async fn fetch_page(&self, page: u32, _per_page: u32) -> Result<String, HarvestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            if self.fail {
                return Err(HarvestError::Status {
                    url: format!("page {}", page),
                    status: 502,
                });
            }
            Ok(if page == 1 {
                results_page()
            } else {
                EMPTY_PAGE.to_string()
            })
        }
    }

    fn test_pipeline(source: Arc<TestSource>, dir: &tempfile::TempDir) -> Pipeline {
        Pipeline::new(source, DbConfig::new(dir.path().join("pipeline.db"))).with_limits(
            ScrapeLimits {
                min_entries: 30_000,
                max_pages: 20,
                per_page: 100,
            },
        )
    }

    async fn wait_until_idle(pipeline: &Pipeline) {
        for _ in 0..500 {
            if !pipeline.is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pull run did not finish");
    }

    #[test]
    fn test_guard_try_start_is_exclusive() {
        let guard = PullGuard::new();

        assert!(guard.try_start());
        assert!(guard.is_busy());
        assert!(!guard.try_start());

        guard.end();
        assert!(!guard.is_busy());
        assert!(guard.try_start());
    }

    #[test]
    fn test_guard_end_is_unconditional() {
        let guard = PullGuard::new();
        guard.end();
        guard.end();
        assert!(guard.try_start());
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let guard = Arc::new(PullGuard::new());

        let lease = guard.acquire().unwrap();
        assert!(guard.acquire().is_none());

        drop(lease);
        assert!(!guard.is_busy());
        assert!(guard.acquire().is_some());
    }

    #[tokio::test]
    async fn test_sync_pull_loads_records() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(TestSource::new());
        let pipeline = test_pipeline(source.clone(), &dir).run_async(false);

        let outcome = pipeline.trigger_pull().await.unwrap();

        assert_eq!(outcome, PullOutcome::Completed { rows: 2 });
        assert!(!pipeline.is_busy());
        // page 1, then five empty pages
        assert_eq!(source.calls(), 6);

        let analysis = pipeline.get_aggregates().await.unwrap();
        assert_eq!(analysis.term_count, 2);
        assert_eq!(analysis.avg_gpa_american_fall, Some(3.9));
        assert_eq!(analysis.jhu_ms_cs, 1);
    }

    #[tokio::test]
    async fn test_repeated_pull_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(Arc::new(TestSource::new()), &dir).run_async(false);

        pipeline.trigger_pull().await.unwrap();
        pipeline.trigger_pull().await.unwrap();

        let analysis = pipeline.get_aggregates().await.unwrap();
        assert_eq!(analysis.term_count, 2);
    }

    #[tokio::test]
    async fn test_busy_pull_does_not_touch_harvester() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(TestSource::gated());
        let pipeline = test_pipeline(source.clone(), &dir);

        assert_eq!(pipeline.trigger_pull().await.unwrap(), PullOutcome::Accepted);
        while source.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(pipeline.trigger_pull().await.unwrap(), PullOutcome::Busy);
        assert_eq!(
            pipeline.trigger_recompute().await.unwrap(),
            RecomputeOutcome::Busy
        );
        assert_eq!(source.calls(), 1);

        source.open_gate();
        wait_until_idle(&pipeline).await;

        assert_eq!(source.calls(), 6);
        assert!(matches!(
            pipeline.trigger_recompute().await.unwrap(),
            RecomputeOutcome::Ok(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_sync_pull_releases_guard() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(Arc::new(TestSource::failing()), &dir).run_async(false);

        let result = pipeline.trigger_pull().await;

        assert!(result.is_err());
        assert!(!pipeline.is_busy());
    }

    #[tokio::test]
    async fn test_failed_async_pull_releases_guard() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(Arc::new(TestSource::failing()), &dir);

        assert_eq!(pipeline.trigger_pull().await.unwrap(), PullOutcome::Accepted);
        wait_until_idle(&pipeline).await;

        assert!(pipeline.guard().try_start());
    }

    #[tokio::test]
    async fn test_recompute_on_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(Arc::new(TestSource::new()), &dir);

        match pipeline.trigger_recompute().await.unwrap() {
            RecomputeOutcome::Ok(analysis) => {
                assert_eq!(analysis.term_count, 0);
                assert_eq!(analysis.avg_gpa, None);
            }
            RecomputeOutcome::Busy => panic!("guard should be free"),
        }
    }
}
