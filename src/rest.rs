//! One-shot HTTP requests to the agent, outside the streaming session.

use anyhow::{Context, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audio::pcm;
use crate::error::EnvelopeError;
use crate::protocol::{Envelope, MIME_PCM, MIME_TEXT, Payload, ResponseModality};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperienceResponse {
    pub session_id: String,
    pub mime_type: String,
    pub data: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExperienceResponse {
    pub fn into_envelope(self) -> Result<Envelope, EnvelopeError> {
        let payload = match self.mime_type.as_str() {
            MIME_TEXT => Payload::Text { data: self.data },
            MIME_PCM => Payload::Audio { data: self.data },
            other => return Err(EnvelopeError::UnknownMime(other.to_string())),
        };
        Ok(Envelope {
            payload,
            response_modality: None,
            session_id: Some(self.session_id),
            metadata: Some(self.metadata),
        })
    }
}

#[derive(Serialize)]
struct TextRequest<'a> {
    session_id: &'a str,
    text: &'a str,
    response_modality: ResponseModality,
}

#[derive(Serialize)]
struct AudioRequest<'a> {
    session_id: &'a str,
    audio_base64: String,
    response_modality: ResponseModality,
}

pub struct ExperienceClient {
    client: Client,
    base: String,
}

impl ExperienceClient {
    pub fn new(http_base: &str) -> anyhow::Result<Self> {
        let base = http_base.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            bail!("HTTP base URL must use http:// or https://, got '{}'", http_base);
        }
        Ok(Self {
            client: Client::new(),
            base: base.to_string(),
        })
    }

    pub async fn send_text(
        &self,
        session_id: &str,
        text: &str,
        modality: ResponseModality,
    ) -> anyhow::Result<ExperienceResponse> {
        if session_id.is_empty() || text.is_empty() {
            bail!("session_id and text must not be empty");
        }
        let body = TextRequest {
            session_id,
            text,
            response_modality: modality,
        };
        self.post("/experience/v1/messages:text", &body).await
    }

    pub async fn send_audio(
        &self,
        session_id: &str,
        samples: &[i16],
        modality: ResponseModality,
    ) -> anyhow::Result<ExperienceResponse> {
        if session_id.is_empty() || samples.is_empty() {
            bail!("session_id and audio must not be empty");
        }
        let body = AudioRequest {
            session_id,
            audio_base64: pcm::encode_base64(samples),
            response_modality: modality,
        };
        self.post("/experience/v1/messages:audio", &body).await
    }

    pub async fn health(&self) -> anyhow::Result<Value> {
        let url = format!("{}/health", self.base);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        if !resp.status().is_success() {
            bail!("GET {}: HTTP {}", url, resp.status());
        }
        Ok(resp.json::<Value>().await?)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<ExperienceResponse> {
        let url = format!("{}{}", self.base, path);
        log::debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        if !resp.status().is_success() {
            bail!("POST {}: HTTP {}", url, resp.status());
        }
        resp.json::<ExperienceResponse>()
            .await
            .with_context(|| format!("POST {}: unexpected response body", url))
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::serve_once;
    use super::*;

    #[tokio::test]
    async fn text_request_round_trip() {
        let (base, req_rx) = serve_once(
            "200 OK",
            r#"{"session_id":"s-1","mime_type":"text/plain","data":"echo: hi","metadata":{"source":"experience"}}"#,
        )
        .await;
        let client = ExperienceClient::new(&base).unwrap();

        let resp = client.send_text("s-1", "hi", ResponseModality::Text).await.unwrap();
        assert_eq!(resp.data, "echo: hi");
        assert_eq!(resp.metadata.get("source"), Some(&Value::from("experience")));

        let request = req_rx.await.unwrap();
        assert!(request.starts_with("POST /experience/v1/messages:text "));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let body: Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["session_id"], "s-1");
        assert_eq!(body["text"], "hi");
        assert_eq!(body["response_modality"], "text");
    }

    #[tokio::test]
    async fn audio_request_sends_base64_pcm() {
        let (base, req_rx) = serve_once(
            "200 OK",
            r#"{"session_id":"s-1","mime_type":"audio/pcm","data":"AQACAA=="}"#,
        )
        .await;
        let client = ExperienceClient::new(&format!("{}/", base)).unwrap();

        let resp = client.send_audio("s-1", &[7, -7], ResponseModality::Audio).await.unwrap();
        let envelope = resp.into_envelope().unwrap();
        assert_eq!(envelope.pcm_samples().unwrap(), vec![1, 2]);

        let request = req_rx.await.unwrap();
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let body: Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["audio_base64"], pcm::encode_base64(&[7, -7]));
        assert_eq!(body["response_modality"], "audio");
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let (base, _req_rx) = serve_once("500 Internal Server Error", "{}").await;
        let client = ExperienceClient::new(&base).unwrap();
        let err = client.send_text("s-1", "hi", ResponseModality::Text).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn empty_input_is_rejected_locally() {
        let client = ExperienceClient::new("http://127.0.0.1:9").unwrap();
        assert!(client.send_text("", "hi", ResponseModality::Text).await.is_err());
        assert!(client.send_text("s", "", ResponseModality::Text).await.is_err());
        assert!(client.send_audio("s", &[], ResponseModality::Text).await.is_err());
        assert!(ExperienceClient::new("ws://nope").is_err());
    }

    #[test]
    fn unknown_mime_in_response() {
        let resp = ExperienceResponse {
            session_id: "s".into(),
            mime_type: "video/mp4".into(),
            data: String::new(),
            metadata: Map::new(),
        };
        assert!(matches!(resp.into_envelope(), Err(EnvelopeError::UnknownMime(_))));
    }
}
