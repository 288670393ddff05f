//! Medien-Referenzen und Fallback-Reihenfolge

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// MEDIA REFERENCE
// ============================================================================

/// Zeiger auf abspielbaren Inhalt oder einen extern gehosteten Raum
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum MediaReference {
    /// Direkt streambar (z.B. HLS)
    StreamUrl(String),
    /// Vollständige Datei (z.B. MP4), wird vor dem Abspielen geladen
    DownloadableAsset(String),
    /// Raum-URL, die der Client selbst einbettet
    ExternalRoom(String),
}

impl MediaReference {
    pub fn url(&self) -> &str {
        match self {
            MediaReference::StreamUrl(url)
            | MediaReference::DownloadableAsset(url)
            | MediaReference::ExternalRoom(url) => url,
        }
    }

    /// Leitet aus einer HLS-Playlist (`.m3u8`) das MP4-Asset daneben ab
    pub fn derive_asset(&self) -> Option<MediaReference> {
        let MediaReference::StreamUrl(url) = self else {
            return None;
        };
        let mut parsed = url::Url::parse(url).ok()?;
        let path = parsed.path().strip_suffix(".m3u8")?.to_string();
        parsed.set_path(&format!("{}.mp4", path));
        Some(MediaReference::DownloadableAsset(parsed.to_string()))
    }
}

impl fmt::Display for MediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaReference::StreamUrl(url) => write!(f, "stream({})", url),
            MediaReference::DownloadableAsset(url) => write!(f, "asset({})", url),
            MediaReference::ExternalRoom(url) => write!(f, "room({})", url),
        }
    }
}

// ============================================================================
// MEDIA PLAN
// ============================================================================

/// Primäre Referenz plus optionale Alternative
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPlan {
    pub primary: MediaReference,
    pub fallback: Option<MediaReference>,
}

impl MediaPlan {
    pub fn new(primary: MediaReference) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: MediaReference) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Reihenfolge der Versuche.
    ///
    /// Stream zuerst, danach das mitgelieferte oder abgeleitete Asset.
    /// Räume und Assets haben keinen Fallback.
    pub fn attempts(&self, derive_asset: bool) -> Vec<MediaReference> {
        let mut attempts = vec![self.primary.clone()];

        if let MediaReference::StreamUrl(_) = self.primary {
            let alternative = match &self.fallback {
                Some(fallback @ MediaReference::DownloadableAsset(_)) => Some(fallback.clone()),
                Some(_) => None,
                None if derive_asset => self.primary.derive_asset(),
                None => None,
            };
            attempts.extend(alternative);
        }

        attempts
    }
}

impl From<MediaReference> for MediaPlan {
    fn from(primary: MediaReference) -> Self {
        Self::new(primary)
    }
}

// ============================================================================
// PLAYBACK
// ============================================================================

/// Was der Renderer tatsächlich lädt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSource {
    Stream(String),
    File(PathBuf),
    Room(String),
}

/// Ergebnis eines erfolgreichen `present()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackHandle {
    pub generation: u64,
    /// Die Referenz, die tatsächlich abgespielt wird
    pub reference: MediaReference,
    pub source: PlaybackSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_plan_uses_supplied_asset() {
        let plan = MediaPlan::new(MediaReference::StreamUrl("https://cdn/x.m3u8".into()))
            .with_fallback(MediaReference::DownloadableAsset("https://cdn/other.mp4".into()));

        assert_eq!(
            plan.attempts(true),
            vec![
                MediaReference::StreamUrl("https://cdn/x.m3u8".into()),
                MediaReference::DownloadableAsset("https://cdn/other.mp4".into()),
            ]
        );
    }

    #[test]
    fn test_stream_plan_derives_asset_when_enabled() {
        let plan: MediaPlan =
            MediaReference::StreamUrl("https://cdn.example/v/abc/playlist.m3u8?sig=1".into())
                .into();

        assert_eq!(plan.attempts(false).len(), 1);
        assert_eq!(
            plan.attempts(true)[1],
            MediaReference::DownloadableAsset(
                "https://cdn.example/v/abc/playlist.mp4?sig=1".into()
            )
        );
    }

    #[test]
    fn test_non_playlist_stream_has_no_derived_asset() {
        let stream = MediaReference::StreamUrl("https://cdn.example/live".into());
        assert_eq!(stream.derive_asset(), None);
    }

    #[test]
    fn test_room_has_no_fallback() {
        let plan = MediaPlan::new(MediaReference::ExternalRoom("https://example/room/42".into()))
            .with_fallback(MediaReference::DownloadableAsset("https://cdn/a.mp4".into()));

        assert_eq!(plan.attempts(true).len(), 1);
    }

    #[test]
    fn test_reference_serializes_tagged() {
        let json = serde_json::to_value(MediaReference::ExternalRoom("u".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "external_room", "url": "u"}));
    }
}
