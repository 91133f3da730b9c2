use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::app::ports::PostSource;
use crate::constants::{
    ALLOWED_IMAGE_EXTENSIONS, HARVEST_TIMESTAMP_FORMAT, MAX_TITLE_BYTES, TITLE_EXTRA_CHARS,
};
use crate::error::Result;
use crate::types::{CandidateItem, SourcePost};

/// Keep letters, digits and `-_.() `, then turn spaces into underscores and drop parentheses.
/// The result is capped at `MAX_TITLE_BYTES` so the file name stays within filesystem limits.
pub fn sanitize_title(title: &str) -> String {
    let mut sanitized: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || TITLE_EXTRA_CHARS.contains(*c))
        .filter(|c| *c != '(' && *c != ')')
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    if sanitized.len() > MAX_TITLE_BYTES {
        let mut cut = MAX_TITLE_BYTES;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
    }
    sanitized
}

/// File extension of the URL's last path segment, ignoring query and fragment.
pub fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

pub fn is_allowed_image(url: &str) -> bool {
    url_extension(url)
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub fn title_matches(title: &str, term: &str) -> bool {
    title.to_lowercase().contains(&term.to_lowercase())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(HARVEST_TIMESTAMP_FORMAT).to_string()
}

/// `images/<source>/<query>/` for a harvest run.
pub fn harvest_dir(images_root: &Path, subreddit: &str, term: &str) -> PathBuf {
    images_root.join(subreddit).join(term)
}

/// Apply the content filter to one raw post, building its destination path.
pub fn to_candidate(post: &SourcePost, term: &str, target_dir: &Path) -> Option<CandidateItem> {
    if !title_matches(&post.title, term) || !is_allowed_image(&post.url) {
        return None;
    }
    let ext = url_extension(&post.url)?;
    let file_name = format!(
        "{}_{}.{}",
        sanitize_title(&post.title),
        format_timestamp(&post.created_utc),
        ext
    );
    Some(CandidateItem {
        source_url: post.url.clone(),
        suggested_title: post.title.clone(),
        creation_timestamp: post.created_utc,
        target_path: target_dir.join(file_name),
    })
}

/// Fetch one page and filter it. The returned token is the last raw item's id;
/// `None` means the source returned an empty page.
pub async fn produce_candidates(
    source: &dyn PostSource,
    subreddit: &str,
    term: &str,
    page_size: usize,
    page_token: Option<&str>,
    target_dir: &Path,
) -> Result<(Vec<CandidateItem>, Option<String>)> {
    let posts = source.search(subreddit, term, page_size, page_token).await?;
    let next_token = posts.last().map(|p| p.id.clone());
    let items: Vec<CandidateItem> = posts
        .iter()
        .filter_map(|p| to_candidate(p, term, target_dir))
        .collect();
    debug!(
        raw = posts.len(),
        accepted = items.len(),
        "Filtered page for r/{} '{}'",
        subreddit,
        term
    );
    Ok((items, next_token))
}

/// Walks the listing page by page, carrying the continuation token.
pub struct PageDriver<'a> {
    source: &'a dyn PostSource,
    subreddit: String,
    term: String,
    page_size: usize,
    target_dir: PathBuf,
    continuation: Option<String>,
    exhausted: bool,
}

impl<'a> PageDriver<'a> {
    pub fn new(
        source: &'a dyn PostSource,
        subreddit: &str,
        term: &str,
        page_size: usize,
        target_dir: PathBuf,
    ) -> Self {
        Self {
            source,
            subreddit: subreddit.to_string(),
            term: term.to_string(),
            page_size,
            target_dir,
            continuation: None,
            exhausted: false,
        }
    }

    /// Next filtered page, or `None` once the listing is exhausted.
    /// A page may be empty after filtering while the listing continues.
    pub async fn next_page(&mut self) -> Result<Option<Vec<CandidateItem>>> {
        if self.exhausted {
            return Ok(None);
        }
        let (items, next_token) = produce_candidates(
            self.source,
            &self.subreddit,
            &self.term,
            self.page_size,
            self.continuation.as_deref(),
            &self.target_dir,
        )
        .await?;

        match next_token {
            None => {
                info!("Listing for r/{} exhausted", self.subreddit);
                self.exhausted = true;
                Ok(None)
            }
            Some(token) => {
                if self.continuation.as_deref() == Some(token.as_str()) {
                    info!("Continuation token {} repeated, stopping", token);
                    self.exhausted = true;
                    return Ok(None);
                }
                self.continuation = Some(token);
                Ok(Some(items))
            }
        }
    }
}
