//! Asset Download - lädt MP4-Assets für die Wiedergabe von der Platte

use super::pipeline::PlaybackError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Lädt Assets in ein Cache-Verzeichnis.
///
/// Halbfertige Dateien (`.part`) werden bei Fehler oder Abbruch gelöscht.
#[derive(Debug, Clone)]
pub struct AssetDownloader {
    client: reqwest::Client,
    cache_dir: PathBuf,
    timeout: Duration,
}

impl AssetDownloader {
    pub fn new(client: reqwest::Client, cache_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            client,
            cache_dir,
            timeout,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Lädt `url` vollständig herunter und gibt den lokalen Pfad zurück
    pub async fn download(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PlaybackError> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| PlaybackError::DownloadFailed(e.to_string()))?;

        let target = self.cache_dir.join(Self::file_name_for(url));
        let partial = target.with_extension("part");

        tracing::info!("Downloading asset {} -> {}", url, target.display());

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(PlaybackError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.fetch_to(url, &partial)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(PlaybackError::DownloadFailed(format!(
                    "download timed out after {:?}",
                    self.timeout
                ))),
            },
        };

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            if e != PlaybackError::Cancelled {
                tracing::warn!("Asset download failed: {}", e);
            }
            return Err(e);
        }

        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| PlaybackError::DownloadFailed(e.to_string()))?;

        // Abbruch kurz vor dem Umbenennen
        if cancel.is_cancelled() {
            let _ = tokio::fs::remove_file(&target).await;
            return Err(PlaybackError::Cancelled);
        }

        Ok(target)
    }

    async fn fetch_to(&self, url: &str, partial: &Path) -> Result<(), PlaybackError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlaybackError::DownloadFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlaybackError::DownloadFailed(format!(
                "{} answered with status {}",
                url,
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| PlaybackError::DownloadFailed(e.to_string()))?;

        let mut written: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| PlaybackError::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| PlaybackError::DownloadFailed(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| PlaybackError::DownloadFailed(e.to_string()))?;

        if written == 0 {
            return Err(PlaybackError::DownloadFailed(format!("{} is empty", url)));
        }

        tracing::debug!("Downloaded {} bytes from {}", written, url);
        Ok(())
    }

    /// Eindeutiger Dateiname aus dem letzten Pfadsegment
    fn file_name_for(url: &str) -> String {
        let stem = url::Url::parse(url)
            .ok()
            .and_then(|u| u.path_segments().and_then(|s| s.last().map(str::to_string)))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "asset.mp4".to_string());

        let safe: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        format!("{}-{}", uuid::Uuid::new_v4().simple(), safe)
    }
}
