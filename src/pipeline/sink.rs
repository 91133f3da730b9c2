use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::app::ports::MediaFetcher;
use crate::error::DownloadError;

fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

fn io_error(path: &Path, source: std::io::Error) -> DownloadError {
    DownloadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Download `url` to `path`. The body goes to `<path>.part` first and is renamed
/// into place only after a complete, flushed write; on any failure the partial
/// file is removed and `path` is left untouched.
pub async fn fetch_and_store(
    fetcher: &dyn MediaFetcher,
    url: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }

    let tmp = partial_path(path);
    let result = write_body(fetcher, url, &tmp).await;
    match result {
        Ok(bytes) => {
            fs::rename(&tmp, path).await.map_err(|e| io_error(path, e))?;
            debug!("Stored {} bytes from {} at {}", bytes, url, path.display());
            Ok(bytes)
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(&tmp).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove partial file {}: {}", tmp.display(), rm);
                }
            }
            Err(e)
        }
    }
}

async fn write_body(fetcher: &dyn MediaFetcher, url: &str, tmp: &Path) -> Result<u64, DownloadError> {
    let file = File::create(tmp).await.map_err(|e| io_error(tmp, e))?;
    let mut writer = BufWriter::new(file);
    let bytes = fetcher.fetch_into(url, &mut writer).await?;
    writer.flush().await.map_err(|e| io_error(tmp, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| io_error(tmp, e))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::io::AsyncWrite;

    struct StaticFetcher {
        body: Vec<u8>,
        fail_after_write: bool,
    }

    #[async_trait]
    impl MediaFetcher for StaticFetcher {
        async fn fetch_into(
            &self,
            url: &str,
            sink: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<u64, DownloadError> {
            sink.write_all(&self.body).await.map_err(|e| DownloadError::Io {
                path: PathBuf::from(url),
                source: e,
            })?;
            if self.fail_after_write {
                return Err(DownloadError::Transient {
                    url: url.to_string(),
                    reason: "connection reset".into(),
                });
            }
            Ok(self.body.len() as u64)
        }
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("images/a/b.jpg")),
            PathBuf::from("images/a/b.jpg.part")
        );
    }

    #[tokio::test]
    async fn test_success_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.png");
        let fetcher = StaticFetcher { body: b"pixels".to_vec(), fail_after_write: false };

        let n = fetch_and_store(&fetcher, "https://x/out.png", &path).await.unwrap();
        assert_eq!(n, 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"pixels");
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn test_failure_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let fetcher = StaticFetcher { body: b"half".to_vec(), fail_after_write: true };

        let err = fetch_and_store(&fetcher, "https://x/out.png", &path).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }
}
