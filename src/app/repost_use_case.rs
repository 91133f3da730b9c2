use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::app::ports::SubmissionTarget;
use crate::config::RepostConfig;
use crate::constants::CAPTION_FILE;
use crate::error::{HarvestError, Result};
use crate::observability::metrics;
use crate::types::RepostReport;

#[derive(Debug, Clone)]
pub struct RepostSettings {
    pub base_folder: PathBuf,
    pub subreddit: String,
    pub flair: String,
    pub archive_folder: String,
    pub archive_after_post: bool,
}

impl RepostSettings {
    pub fn from_config(config: &RepostConfig) -> Self {
        Self {
            base_folder: config.base_folder.clone(),
            subreddit: config.subreddit.clone(),
            flair: config.flair.clone(),
            archive_folder: config.archive_folder.clone(),
            archive_after_post: config.archive_after_post,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderVerdict {
    Qualifies { image: PathBuf },
    Archive { jpg_count: usize, mp4_count: usize },
}

/// A post folder qualifies with exactly one `.jpg` and no `.mp4`.
pub async fn inspect_folder(folder: &Path) -> Result<FolderVerdict> {
    let mut jpgs = Vec::new();
    let mut mp4_count = 0;
    let mut entries = tokio::fs::read_dir(folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".jpg") {
            jpgs.push(entry.path());
        } else if name.ends_with(".mp4") {
            mp4_count += 1;
        }
    }
    if jpgs.len() == 1 && mp4_count == 0 {
        Ok(FolderVerdict::Qualifies {
            image: jpgs.remove(0),
        })
    } else {
        Ok(FolderVerdict::Archive {
            jpg_count: jpgs.len(),
            mp4_count,
        })
    }
}

/// Title is the caption's first line, the comment is the whole caption.
pub fn split_caption(caption: &str) -> Option<(String, String)> {
    let title = caption.lines().next()?.trim();
    if title.is_empty() {
        return None;
    }
    Some((title.to_string(), caption.trim().to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FolderResult {
    Posted { archived: bool, replied: bool },
    Archived,
}

/// Republishes qualifying image+caption folders to a subreddit.
pub struct RepostUseCase {
    target: Arc<dyn SubmissionTarget>,
    settings: RepostSettings,
}

impl RepostUseCase {
    pub fn new(target: Arc<dyn SubmissionTarget>, settings: RepostSettings) -> Self {
        Self { target, settings }
    }

    #[instrument(skip(self), fields(base = %self.settings.base_folder.display()))]
    pub async fn run(&self) -> Result<RepostReport> {
        info!("Starting to process folders in {}.", self.settings.base_folder.display());
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.settings.base_folder).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                entries.push(entry.path());
            }
        }
        entries.sort();

        let mut report = RepostReport::default();
        // Looked up on the first qualifying folder only
        let mut flair_id: Option<Option<String>> = None;

        for path in entries {
            let is_archive = path
                .file_name()
                .map(|n| n == self.settings.archive_folder.as_str())
                .unwrap_or(false);
            if is_archive {
                info!("Skipped '{}' folder.", self.settings.archive_folder);
                continue;
            }

            info!("Processing folder {}.", path.display());
            report.processed += 1;
            match self.process_folder(&path, &mut flair_id).await {
                Ok(FolderResult::Posted { archived, replied }) => {
                    report.posted += 1;
                    metrics::repost::posted();
                    if !replied {
                        report.reply_failures += 1;
                        metrics::repost::reply_failed();
                    }
                    if archived {
                        report.archived += 1;
                        metrics::repost::archived();
                    }
                }
                Ok(FolderResult::Archived) => {
                    report.archived += 1;
                    metrics::repost::archived();
                }
                Err(e) => {
                    error!("Error in processing folder {}: {}", path.display(), e);
                    report.failed += 1;
                    metrics::repost::failed();
                }
            }
        }
        info!("Finished processing all folders.");
        Ok(report)
    }

    async fn process_folder(
        &self,
        folder: &Path,
        flair_id: &mut Option<Option<String>>,
    ) -> Result<FolderResult> {
        let image = match inspect_folder(folder).await? {
            FolderVerdict::Qualifies { image } => image,
            FolderVerdict::Archive { jpg_count, mp4_count } => {
                self.archive(folder).await?;
                info!(
                    "Folder {} moved to archived due to file conditions ({} jpg, {} mp4).",
                    folder.display(),
                    jpg_count,
                    mp4_count
                );
                return Ok(FolderResult::Archived);
            }
        };

        let caption = tokio::fs::read_to_string(folder.join(CAPTION_FILE)).await?;
        let (title, comment) = split_caption(&caption)
            .ok_or_else(|| HarvestError::MissingField(format!("{CAPTION_FILE} title line")))?;

        if flair_id.is_none() {
            *flair_id = Some(self.find_flair_id().await);
        }
        let flair = flair_id.as_ref().and_then(|f| f.as_deref());
        if flair.is_none() {
            warn!(
                "No matching flair for text '{}'. Submitting without flair.",
                self.settings.flair
            );
        }

        info!("Posting to Reddit from folder {}.", folder.display());
        let submission = match self
            .target
            .submit_image(&self.settings.subreddit, &title, &image, flair)
            .await
        {
            Ok(submission) => Some(submission),
            Err(HarvestError::SubmissionUnconfirmed { message }) => {
                warn!("Posted from {} without a submission id: {}", folder.display(), message);
                None
            }
            Err(e) => return Err(e),
        };
        info!(
            "Posted to subreddit {} with title {}.",
            self.settings.subreddit, title
        );

        // From here on the post exists; nothing below may leave the folder to be posted again
        let replied = match &submission {
            Some(submission) => match self.target.reply(submission, &comment).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Posted {} but the comment failed: {}", submission.name, e);
                    false
                }
            },
            None => false,
        };

        if !self.settings.archive_after_post {
            return Ok(FolderResult::Posted { archived: false, replied });
        }
        match self.archive(folder).await {
            Ok(()) => Ok(FolderResult::Posted { archived: true, replied }),
            Err(e) => {
                error!("Error in moving folder to archived: {}", e);
                Ok(FolderResult::Posted { archived: false, replied })
            }
        }
    }

    /// Case-insensitive match on the template text; lookup failures mean no flair.
    async fn find_flair_id(&self) -> Option<String> {
        match self.target.link_flairs(&self.settings.subreddit).await {
            Ok(flairs) => flairs
                .into_iter()
                .find(|f| f.text.to_lowercase() == self.settings.flair.to_lowercase())
                .map(|f| f.id),
            Err(e) => {
                error!("Error in find_flair_id: {}", e);
                None
            }
        }
    }

    async fn archive(&self, folder: &Path) -> Result<()> {
        let archive_dir = self.settings.base_folder.join(&self.settings.archive_folder);
        tokio::fs::create_dir_all(&archive_dir).await?;
        let name = folder
            .file_name()
            .ok_or_else(|| HarvestError::MissingField(format!("folder name of {}", folder.display())))?
            .to_string_lossy()
            .to_string();

        let mut dest = archive_dir.join(&name);
        let mut n = 1;
        while tokio::fs::try_exists(&dest).await? {
            dest = archive_dir.join(format!("{name}_{n}"));
            n += 1;
        }
        tokio::fs::rename(folder, &dest).await?;
        info!("Moved {} to {}.", folder.display(), dest.display());
        Ok(())
    }
}
