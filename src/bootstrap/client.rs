//! Session Bootstrap Client
//!
//! Ein Request, eine Antwort, begrenzt durch ein Timeout des Aufrufers.
//! Kein Retry, darüber entscheidet der Aufrufer anhand von
//! [`BootstrapError::is_retryable`].

use super::payloads::{AudioStreamFormat, AudioStreamRequest, SessionRequest, SessionResponse};
use crate::call_engine::CallParameters;
use crate::media::{MediaPlan, MediaReference};
use base64::Engine as _;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("Network error: {reason}")]
    Network { reason: String, timed_out: bool },

    #[error("Bootstrap endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Response contains neither a media URL nor a room URL")]
    MalformedResponse,
}

impl BootstrapError {
    /// Lohnt sich ein erneuter Versuch?
    pub fn is_retryable(&self) -> bool {
        match self {
            BootstrapError::Network { .. } => true,
            BootstrapError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            BootstrapError::Decode(_) | BootstrapError::MalformedResponse => false,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        BootstrapError::Network {
            timed_out: e.is_timeout(),
            reason: e.to_string(),
        }
    }
}

// ============================================================================
// SESSION BOOTSTRAPPER
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionBootstrapper {
    client: reqwest::Client,
    session_url: String,
    audio_stream_url: String,
    format: AudioStreamFormat,
}

impl SessionBootstrapper {
    pub fn new(
        client: reqwest::Client,
        session_url: impl Into<String>,
        audio_stream_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            session_url: session_url.into(),
            audio_stream_url: audio_stream_url.into(),
            format: AudioStreamFormat::default(),
        }
    }

    pub fn with_format(mut self, format: AudioStreamFormat) -> Self {
        self.format = format;
        self
    }

    /// Startet eine Avatar-Session und liefert die abspielbare Referenz
    pub async fn start_session(
        &self,
        params: &CallParameters,
        timeout: Duration,
    ) -> Result<MediaPlan, BootstrapError> {
        let request = SessionRequest {
            api_key: &params.api_key,
            face_id: &params.face_id,
            voice_id: &params.voice_id,
            first_message: &params.first_message,
            system_prompt: &params.system_prompt,
        };

        tracing::info!(
            url = %self.session_url,
            "Starting session for {}",
            params.display_name
        );
        self.post(&self.session_url, &request, timeout).await
    }

    /// Startet den Audio-zu-Video-Stream einer ausgehandelten Session.
    ///
    /// `pcm` sind rohe Samples im konfigurierten Format, darf leer sein.
    pub async fn start_audio_stream(
        &self,
        params: &CallParameters,
        pcm: &[u8],
        timeout: Duration,
    ) -> Result<MediaPlan, BootstrapError> {
        let request = AudioStreamRequest {
            api_key: &params.api_key,
            face_id: &params.face_id,
            audio_format: &self.format.audio_format,
            audio_sample_rate: self.format.sample_rate,
            audio_channel_count: self.format.channel_count,
            video_starting_frame: self.format.video_starting_frame,
            audio_base64: base64::engine::general_purpose::STANDARD.encode(pcm),
        };

        tracing::info!(
            url = %self.audio_stream_url,
            "Starting audio stream ({} bytes of initial audio)",
            pcm.len()
        );
        self.post(&self.audio_stream_url, &request, timeout).await
    }

    /// Wählt die Referenz aus einer Antwort.
    ///
    /// Reihenfolge: Raum, HLS-Stream (mit MP4 als Fallback), MP4.
    pub fn parse_response(body: &[u8]) -> Result<MediaPlan, BootstrapError> {
        let response: SessionResponse =
            serde_json::from_slice(body).map_err(|e| BootstrapError::Decode(e.to_string()))?;

        let non_empty = |url: Option<String>| url.filter(|u| !u.trim().is_empty());
        let room = non_empty(response.room_url);
        let hls = non_empty(response.hls_url);
        let mp4 = non_empty(response.mp4_url);

        match (room, hls, mp4) {
            (Some(room), _, _) => Ok(MediaPlan::new(MediaReference::ExternalRoom(room))),
            (None, Some(hls), mp4) => {
                let plan = MediaPlan::new(MediaReference::StreamUrl(hls));
                Ok(match mp4 {
                    Some(mp4) => plan.with_fallback(MediaReference::DownloadableAsset(mp4)),
                    None => plan,
                })
            }
            (None, None, Some(mp4)) => Ok(MediaPlan::new(MediaReference::DownloadableAsset(mp4))),
            (None, None, None) => Err(BootstrapError::MalformedResponse),
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<MediaPlan, BootstrapError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(BootstrapError::from_reqwest)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(BootstrapError::from_reqwest)?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).chars().take(512).collect();
            tracing::warn!("Bootstrap request to {} failed with {}", url, status);
            return Err(BootstrapError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let plan = Self::parse_response(&bytes)?;
        tracing::debug!("Bootstrap resolved {}", plan.primary);
        Ok(plan)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params() -> CallParameters {
        CallParameters {
            display_name: "Kareem".into(),
            face_id: "123".into(),
            voice_id: "voice-1".into(),
            first_message: "Hey".into(),
            system_prompt: "Be brief".into(),
            api_key: "secret".into(),
        }
    }

    fn bootstrapper(server: &MockServer) -> SessionBootstrapper {
        SessionBootstrapper::new(
            reqwest::Client::new(),
            format!("{}/startE2ESession", server.uri()),
            format!("{}/audioToVideoStream", server.uri()),
        )
    }

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_server_error_is_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = bootstrapper(&server)
            .start_session(&params(), TIMEOUT)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BootstrapError::HttpStatus {
                status: 500,
                body: "boom".into()
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_object_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let err = bootstrapper(&server)
            .start_session(&params(), TIMEOUT)
            .await
            .unwrap_err();

        assert_eq!(err, BootstrapError::MalformedResponse);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out_as_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"roomUrl": "https://room"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = bootstrapper(&server)
            .start_session(&params(), Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::Network {
                timed_out: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_session_request_shape_and_room_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/startE2ESession"))
            .and(body_json(json!({
                "apiKey": "secret",
                "faceId": "123",
                "voiceId": "voice-1",
                "firstMessage": "Hey",
                "systemPrompt": "Be brief"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"roomUrl": "https://room/42"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let plan = bootstrapper(&server)
            .start_session(&params(), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(
            plan,
            MediaPlan::new(MediaReference::ExternalRoom("https://room/42".into()))
        );
    }

    #[tokio::test]
    async fn test_audio_stream_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audioToVideoStream"))
            .and(body_json(json!({
                "simliAPIKey": "secret",
                "faceId": "123",
                "audioFormat": "pcm16",
                "audioSampleRate": 16000,
                "audioChannelCount": 1,
                "videoStartingFrame": 0,
                "audioBase64": "AAE="
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"mp4_url": "https://cdn/a.mp4"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let plan = bootstrapper(&server)
            .start_audio_stream(&params(), &[0x00, 0x01], TIMEOUT)
            .await
            .unwrap();

        assert_eq!(
            plan.primary,
            MediaReference::DownloadableAsset("https://cdn/a.mp4".into())
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let bootstrapper = SessionBootstrapper::new(
            reqwest::Client::new(),
            format!("http://{}/startE2ESession", addr),
            format!("http://{}/audioToVideoStream", addr),
        );
        let err = bootstrapper
            .start_session(&params(), TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::Network {
                timed_out: false,
                ..
            }
        ));
    }

    #[test]
    fn test_hls_response_carries_mp4_fallback() {
        let plan = SessionBootstrapper::parse_response(
            br#"{"hls_url": "https://cdn/x.m3u8", "mp4_url": "https://cdn/x.mp4", "extra": 1}"#,
        )
        .unwrap();

        assert_eq!(plan.primary, MediaReference::StreamUrl("https://cdn/x.m3u8".into()));
        assert_eq!(
            plan.fallback,
            Some(MediaReference::DownloadableAsset("https://cdn/x.mp4".into()))
        );
    }

    #[test]
    fn test_room_wins_over_media_urls() {
        let plan = SessionBootstrapper::parse_response(
            br#"{"mp4_url": "https://cdn/x.mp4", "room_url": "https://room/1"}"#,
        )
        .unwrap();
        assert_eq!(plan.primary, MediaReference::ExternalRoom("https://room/1".into()));
    }

    #[test]
    fn test_invalid_json_is_decode_error() {
        assert!(matches!(
            SessionBootstrapper::parse_response(b"<html>"),
            Err(BootstrapError::Decode(_))
        ));
        assert_eq!(
            SessionBootstrapper::parse_response(br#"{"roomUrl": ""}"#),
            Err(BootstrapError::MalformedResponse)
        );
    }
}
