#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use media_harvester::app::ports::{MediaFetcher, PostSource, ProfileSource, SubmissionTarget};
use media_harvester::error::{DownloadError, HarvestError, Result};
use media_harvester::types::{FlairTemplate, ProfilePage, SourcePost, SubmissionRef};

pub fn post(id: &str, title: &str, url: &str) -> SourcePost {
    SourcePost {
        id: id.to_string(),
        title: title.to_string(),
        url: url.to_string(),
        created_utc: Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap(),
    }
}

/// `count` matching image posts with ids `<prefix>_<n>` and unique titles.
pub fn cat_page(prefix: &str, count: usize) -> Vec<SourcePost> {
    (0..count)
        .map(|i| {
            post(
                &format!("{prefix}_{i}"),
                &format!("Cat picture {prefix} {i}"),
                &format!("https://i.example.com/{prefix}_{i}.jpg"),
            )
        })
        .collect()
}

/// Serves fixed pages; the continuation token is the last id of the previous page.
pub struct PagedSource {
    pages: Vec<Vec<SourcePost>>,
    calls: Mutex<Vec<Option<String>>>,
    fail_from_call: Option<usize>,
}

impl PagedSource {
    pub fn new(pages: Vec<Vec<SourcePost>>) -> Self {
        Self {
            pages,
            calls: Mutex::new(Vec::new()),
            fail_from_call: None,
        }
    }

    /// Search requests numbered `call` (1-based) and later fail.
    pub fn failing_from_call(mut self, call: usize) -> Self {
        self.fail_from_call = Some(call);
        self
    }

    pub fn calls(&self) -> Vec<Option<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostSource for PagedSource {
    async fn search(
        &self,
        _subreddit: &str,
        _term: &str,
        _page_size: usize,
        continuation: Option<&str>,
    ) -> Result<Vec<SourcePost>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(continuation.map(str::to_string));
            calls.len()
        };
        if self.fail_from_call.is_some_and(|from| call >= from) {
            return Err(HarvestError::Api {
                message: "search returned 503".into(),
            });
        }
        let index = match continuation {
            None => 0,
            Some(token) => match self
                .pages
                .iter()
                .position(|p| p.last().map(|last| last.id.as_str()) == Some(token))
            {
                Some(i) => i + 1,
                None => return Ok(Vec::new()),
            },
        };
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }
}

/// Writes a fixed body for every URL except the ones told to fail.
#[derive(Default)]
pub struct FakeFetcher {
    failures: HashMap<String, u16>,
    bodies: HashMap<String, Vec<u8>>,
    fetched: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay_ms: u64,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, url: &str, status: u16) -> Self {
        self.failures.insert(url.to_string(), status);
        self
    }

    pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn fetched_set(&self) -> HashSet<String> {
        self.fetched().into_iter().collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch_into(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> std::result::Result<u64, DownloadError> {
        self.fetched.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(status) = self.failures.get(url) {
            return Err(DownloadError::from_status(url, *status));
        }
        let body = self
            .bodies
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("bytes of {url}").into_bytes());
        sink.write_all(&body).await.map_err(|e| DownloadError::Io {
            path: PathBuf::from(url),
            source: e,
        })?;
        Ok(body.len() as u64)
    }
}

pub fn jpeg_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let mut buf = Vec::new();
    RgbImage::from_pixel(width, height, Rgb(color))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .unwrap();
    buf
}

/// Profile pages served by cursor: page `n` is reached with cursor `"c<n>"`.
pub struct FakeProfileSource {
    pages: Vec<ProfilePage>,
    rate_limited_first: Mutex<bool>,
    calls: AtomicUsize,
}

impl FakeProfileSource {
    pub fn new(pages: Vec<ProfilePage>) -> Self {
        Self {
            pages,
            rate_limited_first: Mutex::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rate_limited_once(self) -> Self {
        *self.rate_limited_first.lock().unwrap() = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileSource for FakeProfileSource {
    async fn posts_page(
        &self,
        _profile: &str,
        _page_size: usize,
        cursor: Option<&str>,
    ) -> Result<ProfilePage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut limited = self.rate_limited_first.lock().unwrap();
            if *limited {
                *limited = false;
                return Err(HarvestError::RateLimited {
                    message: "Application request limit reached".into(),
                });
            }
        }
        let index = match cursor {
            None => 0,
            Some(c) => c.trim_start_matches('c').parse::<usize>().unwrap_or(usize::MAX),
        };
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub subreddit: String,
    pub title: String,
    pub image: PathBuf,
    pub flair_id: Option<String>,
}

#[derive(Default)]
pub struct FakeTarget {
    pub flairs: Vec<FlairTemplate>,
    pub fail_flair_lookup: bool,
    pub fail_titles: HashSet<String>,
    /// Accepted by the site, but no id comes back.
    pub unconfirmed_titles: HashSet<String>,
    pub fail_replies: bool,
    submitted: Mutex<Vec<Submitted>>,
    replies: Mutex<Vec<(String, String)>>,
    flair_lookups: AtomicUsize,
}

impl FakeTarget {
    pub fn with_flairs(flairs: &[(&str, &str)]) -> Self {
        Self {
            flairs: flairs
                .iter()
                .map(|(id, text)| FlairTemplate {
                    id: id.to_string(),
                    text: text.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn flair_lookups(&self) -> usize {
        self.flair_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubmissionTarget for FakeTarget {
    async fn link_flairs(&self, _subreddit: &str) -> Result<Vec<FlairTemplate>> {
        self.flair_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_flair_lookup {
            return Err(HarvestError::Api {
                message: "HTTP 403".into(),
            });
        }
        Ok(self.flairs.clone())
    }

    async fn submit_image(
        &self,
        subreddit: &str,
        title: &str,
        image: &Path,
        flair_id: Option<&str>,
    ) -> Result<SubmissionRef> {
        if self.fail_titles.contains(title) {
            return Err(HarvestError::Api {
                message: "SUBMIT_VALIDATION_BODY_BLACKLISTED".into(),
            });
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(Submitted {
            subreddit: subreddit.to_string(),
            title: title.to_string(),
            image: image.to_path_buf(),
            flair_id: flair_id.map(str::to_string),
        });
        if self.unconfirmed_titles.contains(title) {
            return Err(HarvestError::SubmissionUnconfirmed {
                message: format!("'{title}' not on the account listing"),
            });
        }
        Ok(SubmissionRef {
            name: format!("t3_{}", submitted.len()),
            permalink: None,
        })
    }

    async fn reply(&self, submission: &SubmissionRef, text: &str) -> Result<()> {
        if self.fail_replies {
            return Err(HarvestError::RateLimited {
                message: "you are doing that too much".into(),
            });
        }
        self.replies
            .lock()
            .unwrap()
            .push((submission.name.clone(), text.to_string()));
        Ok(())
    }
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::hours(hours)
}
