use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::audio::pcm;
use crate::error::EnvelopeError;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PCM: &str = "audio/pcm";

/// Form the agent should answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    #[default]
    Text,
    Audio,
}

impl ResponseModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseModality::Text => "text",
            ResponseModality::Audio => "audio",
        }
    }
}

impl fmt::Display for ResponseModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseModality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ResponseModality::Text),
            "audio" => Ok(ResponseModality::Audio),
            other => Err(format!("unknown response modality: {}", other)),
        }
    }
}

/// Payload keyed by `mime_type`. Any other mime type fails to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mime_type")]
pub enum Payload {
    #[serde(rename = "text/plain")]
    Text { data: String },
    /// base64 of little-endian 16-bit PCM
    #[serde(rename = "audio/pcm")]
    Audio { data: String },
}

/// 收发双方共用的消息信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_modality: Option<ResponseModality>,
    /// Filled in by the server; never sent by us.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Envelope {
    pub fn text(data: impl Into<String>, modality: ResponseModality) -> Self {
        Self {
            payload: Payload::Text { data: data.into() },
            response_modality: Some(modality),
            session_id: None,
            metadata: None,
        }
    }

    pub fn audio(samples: &[i16], modality: ResponseModality) -> Self {
        Self {
            payload: Payload::Audio {
                data: pcm::encode_base64(samples),
            },
            response_modality: Some(modality),
            session_id: None,
            metadata: None,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn mime_type(&self) -> &'static str {
        match self.payload {
            Payload::Text { .. } => MIME_TEXT,
            Payload::Audio { .. } => MIME_PCM,
        }
    }

    /// Server handshake notice (`metadata.type == "connection"`).
    pub fn is_connection_notice(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("type"))
            .and_then(Value::as_str)
            == Some("connection")
    }

    /// Decode an audio payload into samples.
    pub fn pcm_samples(&self) -> Result<Vec<i16>, EnvelopeError> {
        match &self.payload {
            Payload::Audio { data } => pcm::decode_base64(data),
            Payload::Text { .. } => Err(EnvelopeError::NotAudio(MIME_TEXT)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_envelope_wire_shape() {
        let env = Envelope::text("hello", ResponseModality::Audio);
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"mime_type": "text/plain", "data": "hello", "response_modality": "audio"})
        );
    }

    #[test]
    fn audio_envelope_carries_base64_pcm() {
        let samples = [0i16, 1, -1, i16::MAX];
        let env = Envelope::audio(&samples, ResponseModality::Text);
        assert_eq!(env.mime_type(), MIME_PCM);

        let parsed = Envelope::parse(&env.to_json().unwrap()).unwrap();
        assert_eq!(parsed.pcm_samples().unwrap(), samples.to_vec());
    }

    #[test]
    fn server_frame_parses_with_extra_fields() {
        let raw = r#"{"session_id":"s-1","mime_type":"text/plain","data":"Connected successfully!","metadata":{"source":"system","type":"connection"}}"#;
        let env = Envelope::parse(raw).unwrap();
        assert_eq!(env.session_id.as_deref(), Some("s-1"));
        assert_eq!(env.response_modality, None);
        assert!(env.is_connection_notice());
    }

    #[test]
    fn unknown_mime_type_is_rejected() {
        let raw = r#"{"mime_type":"image/png","data":"abc"}"#;
        assert!(matches!(Envelope::parse(raw), Err(EnvelopeError::Json(_))));
    }

    #[test]
    fn missing_mime_type_is_rejected() {
        assert!(Envelope::parse(r#"{"data":"abc"}"#).is_err());
        assert!(Envelope::parse("not json").is_err());
    }

    #[test]
    fn text_has_no_samples() {
        let env = Envelope::text("hi", ResponseModality::Text);
        assert!(matches!(env.pcm_samples(), Err(EnvelopeError::NotAudio(_))));
        assert!(!env.is_connection_notice());
    }

    #[test]
    fn modality_parsing() {
        assert_eq!("Audio".parse::<ResponseModality>(), Ok(ResponseModality::Audio));
        assert_eq!(" text ".parse::<ResponseModality>(), Ok(ResponseModality::Text));
        assert!("video".parse::<ResponseModality>().is_err());
    }
}
