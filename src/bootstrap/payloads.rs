//! JSON-Payloads der Session-Endpunkte

use serde::{Deserialize, Serialize};

/// Body für `startE2ESession`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest<'a> {
    pub api_key: &'a str,
    pub face_id: &'a str,
    pub voice_id: &'a str,
    pub first_message: &'a str,
    pub system_prompt: &'a str,
}

/// Body für `audioToVideoStream`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioStreamRequest<'a> {
    #[serde(rename = "simliAPIKey")]
    pub api_key: &'a str,
    #[serde(rename = "faceId")]
    pub face_id: &'a str,
    #[serde(rename = "audioFormat")]
    pub audio_format: &'a str,
    #[serde(rename = "audioSampleRate")]
    pub audio_sample_rate: u32,
    #[serde(rename = "audioChannelCount")]
    pub audio_channel_count: u16,
    #[serde(rename = "videoStartingFrame")]
    pub video_starting_frame: u32,
    #[serde(rename = "audioBase64")]
    pub audio_base64: String,
}

/// Antwort beider Endpunkte. Unbekannte Felder werden ignoriert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionResponse {
    #[serde(rename = "roomUrl", alias = "room_url", default)]
    pub room_url: Option<String>,
    #[serde(default)]
    pub hls_url: Option<String>,
    #[serde(default)]
    pub mp4_url: Option<String>,
}

/// Format des Audio-Streams, mit dem die Antwort erzeugt wird
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioStreamFormat {
    pub audio_format: String,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub video_starting_frame: u32,
}

impl Default for AudioStreamFormat {
    fn default() -> Self {
        Self {
            audio_format: "pcm16".to_string(),
            sample_rate: 16_000,
            channel_count: 1,
            video_starting_frame: 0,
        }
    }
}
