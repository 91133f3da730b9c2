use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::app::ports::{HistoryStore, MediaFetcher, PostSource};
use crate::config::Config;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::candidates::{harvest_dir, PageDriver};
use crate::pipeline::dispatcher::{BoundedDispatcher, ProgressCounter};
use crate::pipeline::sink::fetch_and_store;
use crate::types::{CandidateItem, DownloadHistoryRecord, DownloadOutcome, HarvestReport};

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub max_items: usize,
    pub workers: usize,
    pub page_size: usize,
    pub record_failed_attempts: bool,
    pub images_root: PathBuf,
}

impl HarvestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_items: config.harvest.max_items,
            workers: config.harvest.workers,
            page_size: config.harvest.page_size,
            record_failed_attempts: config.harvest.record_failed_attempts,
            images_root: config.storage.images_root.clone(),
        }
    }
}

/// Search, dedup against history, download with a bounded pool, record history.
pub struct Harvester {
    source: Arc<dyn PostSource>,
    history: Arc<dyn HistoryStore>,
    fetcher: Arc<dyn MediaFetcher>,
    settings: HarvestSettings,
}

impl Harvester {
    pub fn new(
        source: Arc<dyn PostSource>,
        history: Arc<dyn HistoryStore>,
        fetcher: Arc<dyn MediaFetcher>,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            source,
            history,
            fetcher,
            settings,
        }
    }

    /// Harvest one (subreddit, term) pair until `max_items` downloads have been
    /// submitted or the listing runs out. Per-item failures never fail the run.
    /// A failed first search request does; a later one ends the run with the
    /// partial report and `listing_error` set.
    #[instrument(skip(self))]
    pub async fn run(&self, subreddit: &str, term: &str) -> Result<HarvestReport> {
        let started = Instant::now();
        let target_dir = harvest_dir(&self.settings.images_root, subreddit, term);
        tokio::fs::create_dir_all(&target_dir).await?;

        let mut report = HarvestReport {
            subreddit: subreddit.to_string(),
            search_term: term.to_string(),
            ..Default::default()
        };
        let mut driver = PageDriver::new(
            self.source.as_ref(),
            subreddit,
            term,
            self.settings.page_size,
            target_dir,
        );
        let mut dispatcher: BoundedDispatcher<DownloadOutcome> =
            BoundedDispatcher::new(self.settings.workers);

        while report.submitted < self.settings.max_items {
            let page = match driver.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) if report.pages == 0 => return Err(e),
                Err(e) => {
                    // Earlier pages are already downloaded and recorded; keep their totals
                    error!("Search for page {} failed, stopping: {}", report.pages + 1, e);
                    metrics::harvest::listing_failed();
                    report.listing_error = Some(e.to_string());
                    break;
                }
            };
            report.pages += 1;
            report.candidates += page.len();
            metrics::harvest::page_fetched(page.len());

            let page_total = page.len();
            let progress = ProgressCounter::new();
            let mut submitted_urls = HashSet::new();

            for item in page {
                if report.submitted >= self.settings.max_items {
                    info!("Reached the limit of {} downloads", self.settings.max_items);
                    break;
                }
                if !submitted_urls.insert(item.source_url.clone()) {
                    debug!("Duplicate {} within page, ignoring", item.source_url);
                    continue;
                }
                if self.already_seen(&item.source_url).await {
                    info!("Skipping {} as it has already been downloaded.", item.source_url);
                    report.skipped_seen += 1;
                    metrics::harvest::skipped_seen();
                    continue;
                }

                let task = download_task(self.fetcher.clone(), item, page_total, progress.clone());
                dispatcher.submit(task).await;
                report.submitted += 1;
                metrics::harvest::submitted();
            }

            // End-of-page barrier: nothing is recorded until every task has finished
            let outcomes = dispatcher.drain().await;
            debug!(
                "Page {} finished: {}/{} downloads succeeded",
                report.pages,
                progress.get(),
                outcomes.len()
            );
            self.record_page(subreddit, term, &outcomes, &mut report).await;
        }

        report.elapsed = started.elapsed();
        info!(
            "Total execution time: {:.2} seconds",
            report.elapsed.as_secs_f64()
        );
        info!(
            "Total images downloaded: {} ({} submitted, {} failed, {} already seen)",
            report.succeeded, report.submitted, report.failed, report.skipped_seen
        );
        Ok(report)
    }

    /// A failing lookup counts as "not seen" so the run keeps going.
    async fn already_seen(&self, url: &str) -> bool {
        match self.history.exists(url).await {
            Ok(seen) => seen,
            Err(e) => {
                error!("History lookup failed for {}: {}", url, e);
                metrics::harvest::history_error("exists");
                false
            }
        }
    }

    async fn record_page(
        &self,
        subreddit: &str,
        term: &str,
        outcomes: &[DownloadOutcome],
        report: &mut HarvestReport,
    ) {
        for outcome in outcomes {
            match &outcome.result {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    if e.is_transient() {
                        report.transient_failures += 1;
                    }
                }
            }
            if !outcome.succeeded() && !self.settings.record_failed_attempts {
                continue;
            }

            let record = DownloadHistoryRecord {
                search_term: term.to_string(),
                item_title: outcome.item.suggested_title.clone(),
                source_name: subreddit.to_string(),
                source_url: outcome.item.source_url.clone(),
                download_time: Utc::now(),
            };
            match self.history.insert(&record).await {
                Ok(true) => report.history_rows += 1,
                Ok(false) => debug!("History already had {}", record.source_url),
                Err(e) => {
                    error!(
                        "Failed to record history for {} (term '{}', r/{}): {}",
                        record.source_url, record.search_term, record.source_name, e
                    );
                    metrics::harvest::history_error("insert");
                }
            }
        }
    }
}

async fn download_task(
    fetcher: Arc<dyn MediaFetcher>,
    item: CandidateItem,
    total: usize,
    progress: ProgressCounter,
) -> DownloadOutcome {
    let started = Instant::now();
    let result = fetch_and_store(fetcher.as_ref(), &item.source_url, &item.target_path).await;
    match &result {
        Ok(bytes) => {
            let done = progress.increment();
            info!("Downloaded {}/{}: {}", done, total, item.target_path.display());
            metrics::harvest::download_success(started.elapsed().as_secs_f64(), *bytes);
        }
        Err(e) => {
            warn!("An error occurred while downloading {}: {}", item.source_url, e);
            metrics::harvest::download_failure(e.kind());
        }
    }
    DownloadOutcome { item, result }
}
