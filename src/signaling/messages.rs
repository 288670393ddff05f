//! Message Types für das Signaling-Protokoll
//!
//! Jede Nachricht ist ein JSON-Objekt mit einem `type`-Feld, das die
//! Dekodierung steuert: `offer`, `answer` oder `ice-candidate`.
//! Unbekannte Typen werden abgelehnt, sind aber kein fataler Fehler.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed signaling message: {0}")]
    Malformed(String),

    #[error("Signaling message has no 'type' field")]
    MissingType,

    #[error("Unknown signaling message type: {0}")]
    UnknownType(String),

    #[error("Invalid '{msg_type}' payload: {reason}")]
    InvalidPayload { msg_type: String, reason: String },
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// ICE Candidate wie er vom Peer gesendet wird.
///
/// Felder, die wir nicht kennen, landen in `extra` und werden beim
/// erneuten Kodieren unverändert mitgeschickt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            extra: Map::new(),
        }
    }
}

// ============================================================================
// SIGNALING MESSAGE
// ============================================================================

/// Alle Nachrichten, die über den Signaling-Kanal laufen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalingMessage {
    #[serde(rename = "offer")]
    Offer { sdp: String },

    #[serde(rename = "answer")]
    Answer { sdp: String },

    // Ältere Gegenstellen schicken "candidate"
    #[serde(rename = "ice-candidate", alias = "candidate")]
    IceCandidate(IceCandidate),
}

const TYPE_OFFER: &str = "offer";
const TYPE_ANSWER: &str = "answer";
const TYPE_ICE_CANDIDATE: &str = "ice-candidate";
const KNOWN_TYPES: [&str; 4] = [TYPE_OFFER, TYPE_ANSWER, TYPE_ICE_CANDIDATE, "candidate"];

impl SignalingMessage {
    /// Wert des `type`-Felds auf der Leitung
    pub fn type_name(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => TYPE_OFFER,
            SignalingMessage::Answer { .. } => TYPE_ANSWER,
            SignalingMessage::IceCandidate(_) => TYPE_ICE_CANDIDATE,
        }
    }

    /// Kodiert die Nachricht als JSON-String
    pub fn encode(&self) -> String {
        // Strings und JSON-Maps lassen sich immer serialisieren
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Dekodiert eine Nachricht. Das `type`-Feld bestimmt den Payload.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let msg_type = match value.as_object().map(|object| object.get("type")) {
            None => return Err(DecodeError::Malformed("expected a JSON object".to_string())),
            Some(None) => return Err(DecodeError::MissingType),
            Some(Some(Value::String(t))) => t.clone(),
            Some(Some(_)) => {
                return Err(DecodeError::Malformed(
                    "'type' must be a string".to_string(),
                ))
            }
        };
        if !KNOWN_TYPES.contains(&msg_type.as_str()) {
            return Err(DecodeError::UnknownType(msg_type));
        }

        serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
            msg_type,
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_round_trip() {
        let offer = SignalingMessage::Offer {
            sdp: "v=0\r\no=- 46117317 2 IN IP4 127.0.0.1\r\n".to_string(),
        };

        let decoded = SignalingMessage::decode(&offer.encode()).unwrap();
        assert_eq!(decoded, offer);
    }

    #[test]
    fn test_encoded_offer_has_wire_shape() {
        let offer = SignalingMessage::Offer {
            sdp: "v=0".to_string(),
        };
        let value: Value = serde_json::from_str(&offer.encode()).unwrap();

        assert_eq!(value["type"], "offer");
        assert_eq!(value["sdp"], "v=0");
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_decode_answer_from_server() {
        let text = r#"{"type":"answer","sdp":"v=0\r\ns=-\r\n"}"#;
        let decoded = SignalingMessage::decode(text).unwrap();

        assert_eq!(
            decoded,
            SignalingMessage::Answer {
                sdp: "v=0\r\ns=-\r\n".to_string()
            }
        );
    }

    #[test]
    fn test_missing_type_is_parse_error() {
        let result = SignalingMessage::decode(r#"{"sdp":"v=0"}"#);
        assert_eq!(result, Err(DecodeError::MissingType));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = SignalingMessage::decode(r#"{"type":"bye"}"#);
        assert_eq!(result, Err(DecodeError::UnknownType("bye".to_string())));
    }

    #[test]
    fn test_answer_without_sdp_is_invalid() {
        let result = SignalingMessage::decode(r#"{"type":"answer"}"#);
        assert!(matches!(
            result,
            Err(DecodeError::InvalidPayload { ref msg_type, .. }) if msg_type == "answer"
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            SignalingMessage::decode("not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            SignalingMessage::decode("[1,2]"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_ice_candidate_keeps_opaque_fields() {
        let text = r#"{
            "type": "ice-candidate",
            "candidate": "candidate:1 1 UDP 2130706431 10.0.0.1 5000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
            "usernameFragment": "abcd",
            "x-vendor": {"hops": 2}
        }"#;

        let decoded = SignalingMessage::decode(text).unwrap();
        let SignalingMessage::IceCandidate(ref candidate) = decoded else {
            panic!("expected ice candidate, got {:?}", decoded);
        };
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.extra["usernameFragment"], "abcd");

        let reencoded: Value = serde_json::from_str(&decoded.encode()).unwrap();
        assert_eq!(reencoded["x-vendor"]["hops"], 2);
        assert_eq!(reencoded["type"], "ice-candidate");
    }

    #[test]
    fn test_legacy_candidate_type_is_accepted() {
        let decoded = SignalingMessage::decode(r#"{"type":"candidate","candidate":"c"}"#).unwrap();
        assert_eq!(
            decoded,
            SignalingMessage::IceCandidate(IceCandidate::new("c"))
        );
    }
}
