use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::app::ports::{ImageCompositor, MediaFetcher, ProfileSource, WatermarkStore};
use crate::config::InstagramConfig;
use crate::constants::{CAPTION_FILE, COMPOSITE_FILE, POST_FOLDER_FORMAT};
use crate::error::{HarvestError, Result};
use crate::observability::metrics;
use crate::pipeline::sink::fetch_and_store;
use crate::types::{MediaKind, ProfilePage, ProfilePost, ProfileSyncReport};

#[derive(Debug, Clone)]
pub struct ProfileSyncSettings {
    pub lookback_days: i64,
    pub request_delay: Duration,
    pub rate_limit_sleep: Duration,
    pub page_size: usize,
    pub stitch_min: usize,
    pub stitch_max: usize,
    pub output_root: PathBuf,
}

impl ProfileSyncSettings {
    pub fn from_config(config: &InstagramConfig) -> Self {
        Self {
            lookback_days: config.lookback_days,
            request_delay: Duration::from_millis(config.request_delay_ms),
            rate_limit_sleep: Duration::from_secs(config.rate_limit_sleep_secs),
            page_size: config.page_size,
            stitch_min: config.stitch_min,
            stitch_max: config.stitch_max,
            output_root: config.output_root.clone(),
        }
    }
}

/// Oldest instant still worth fetching: the later of the watermark and the lookback floor.
pub fn compute_cutoff(
    last_fetched: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lookback_days: i64,
) -> DateTime<Utc> {
    let floor = now - chrono::Duration::days(lookback_days);
    match last_fetched {
        Some(last) if last > floor => last,
        _ => floor,
    }
}

/// Folder name for a post, in local time like the profile's own timeline.
pub fn post_stamp(taken_at: &DateTime<Utc>) -> String {
    taken_at.with_timezone(&Local).format(POST_FOLDER_FORMAT).to_string()
}

pub fn caption_text(post: &ProfilePost) -> String {
    format!(
        "{}\nSource: {}",
        post.caption.as_deref().unwrap_or_default(),
        post.permalink
    )
}

fn is_rate_limited(err: &HarvestError) -> bool {
    match err {
        HarvestError::RateLimited { .. } => true,
        HarvestError::Download(e) => e.is_rate_limited(),
        _ => false,
    }
}

/// Pulls a profile's posts newer than its watermark into per-post folders.
pub struct ProfileSyncUseCase {
    source: Arc<dyn ProfileSource>,
    watermarks: Arc<dyn WatermarkStore>,
    fetcher: Arc<dyn MediaFetcher>,
    compositor: Arc<dyn ImageCompositor>,
    settings: ProfileSyncSettings,
}

impl ProfileSyncUseCase {
    pub fn new(
        source: Arc<dyn ProfileSource>,
        watermarks: Arc<dyn WatermarkStore>,
        fetcher: Arc<dyn MediaFetcher>,
        compositor: Arc<dyn ImageCompositor>,
        settings: ProfileSyncSettings,
    ) -> Self {
        Self {
            source,
            watermarks,
            fetcher,
            compositor,
            settings,
        }
    }

    fn should_stitch(&self, post: &ProfilePost) -> bool {
        post.is_carousel()
            && (self.settings.stitch_min..=self.settings.stitch_max).contains(&post.media.len())
            && post.media.iter().all(|m| m.kind == MediaKind::Image)
    }

    #[instrument(skip(self))]
    pub async fn run(&self, profile: &str) -> Result<ProfileSyncReport> {
        let started_at = Utc::now();
        let profile_dir = self.settings.output_root.join(profile);
        tokio::fs::create_dir_all(&profile_dir).await?;

        let last_checked = match self.watermarks.last_fetched(profile).await {
            Ok(last) => last,
            Err(e) => {
                error!("Could not read last fetched time for '{}': {}", profile, e);
                None
            }
        };
        info!("Last checked: {:?}", last_checked);
        let cutoff = compute_cutoff(last_checked, started_at, self.settings.lookback_days);

        let mut report = ProfileSyncReport {
            profile: profile.to_string(),
            ..Default::default()
        };
        let mut cursor: Option<String> = None;

        info!("Starting download...");
        'walk: loop {
            let page = self.fetch_page(profile, cursor.as_deref()).await?;
            for post in &page.posts {
                if post.taken_at <= cutoff {
                    info!("Post on {} is older than the threshold, stopping.", post.taken_at);
                    break 'walk;
                }
                report.posts_seen += 1;

                match self.save_post(&profile_dir, post).await {
                    Ok(stitched) => {
                        report.posts_saved += 1;
                        metrics::profile_sync::post_saved();
                        if stitched {
                            report.composites += 1;
                            metrics::profile_sync::composite_created();
                        }
                    }
                    Err(e) if is_rate_limited(&e) => {
                        warn!(
                            "Rate limit hit, sleeping for {} seconds",
                            self.settings.rate_limit_sleep.as_secs()
                        );
                        report.failures += 1;
                        metrics::profile_sync::rate_limited();
                        tokio::time::sleep(self.settings.rate_limit_sleep).await;
                    }
                    Err(e) => {
                        error!("An error occurred saving post {}: {}", post.id, e);
                        report.failures += 1;
                        metrics::profile_sync::post_failed();
                    }
                }

                if !self.settings.request_delay.is_zero() {
                    tokio::time::sleep(self.settings.request_delay).await;
                }
            }
            cursor = match page.next_cursor {
                Some(next) => Some(next),
                None => break,
            };
        }

        if let Err(e) = self.watermarks.record_fetched(profile, started_at).await {
            error!("Could not record last fetched time for '{}': {}", profile, e);
        }
        info!(
            "All recent posts downloaded: {} saved, {} composites, {} failures",
            report.posts_saved, report.composites, report.failures
        );
        Ok(report)
    }

    /// One retry after the rate-limit pause; any other listing error ends the run.
    async fn fetch_page(&self, profile: &str, cursor: Option<&str>) -> Result<ProfilePage> {
        let page_size = self.settings.page_size;
        match self.source.posts_page(profile, page_size, cursor).await {
            Err(e) if is_rate_limited(&e) => {
                warn!(
                    "Listing rate limited, sleeping for {} seconds",
                    self.settings.rate_limit_sleep.as_secs()
                );
                metrics::profile_sync::rate_limited();
                tokio::time::sleep(self.settings.rate_limit_sleep).await;
                self.source.posts_page(profile, page_size, cursor).await
            }
            other => other,
        }
    }

    /// Download every media node and the caption; returns whether a composite was made.
    async fn save_post(&self, profile_dir: &Path, post: &ProfilePost) -> Result<bool> {
        let stamp = post_stamp(&post.taken_at);
        let folder = profile_dir.join(&stamp);
        tokio::fs::create_dir_all(&folder).await?;

        let mut images = Vec::with_capacity(post.media.len());
        for (i, node) in post.media.iter().enumerate() {
            let name = if post.is_carousel() {
                format!("{}_{}.{}", stamp, i + 1, node.kind.extension())
            } else {
                format!("{}.{}", stamp, node.kind.extension())
            };
            let path = folder.join(name);
            fetch_and_store(self.fetcher.as_ref(), &node.url, &path).await?;
            if node.kind == MediaKind::Image {
                images.push(path);
            }
        }

        tokio::fs::write(folder.join(CAPTION_FILE), caption_text(post)).await?;
        info!("Downloaded post from {}", stamp);

        if !self.should_stitch(post) {
            return Ok(false);
        }
        let output = folder.join(COMPOSITE_FILE);
        let compositor = self.compositor.clone();
        debug!("Stitching {} images into {}", images.len(), output.display());
        tokio::task::spawn_blocking(move || compositor.stack_vertically(&images, &output))
            .await
            .map_err(|e| HarvestError::Api {
                message: format!("compositing task failed: {e}"),
            })??;
        Ok(true)
    }
}
