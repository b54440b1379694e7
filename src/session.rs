//! One conversational session: its identifier, reply modality and the
//! connection that carries it.

use anyhow::{Context, anyhow};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::net_link::{NetCommand, NetEvent, NetLink, RetryPolicy};
use crate::protocol::{Envelope, ResponseModality};

const COMMAND_QUEUE: usize = 100;

pub fn generate_session_id() -> String {
    format!("session-{}", Uuid::new_v4().simple())
}

/// Use the configured id, or mint one when it is blank.
pub fn resolve_session_id(configured: &str) -> String {
    let trimmed = configured.trim();
    if trimmed.is_empty() {
        generate_session_id()
    } else {
        trimmed.to_string()
    }
}

/// `{base}/{session_id}?response_modality={modality}`
pub fn endpoint_url(base: &str, session_id: &str, modality: ResponseModality) -> anyhow::Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid WebSocket base URL '{}'", base))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(anyhow!("WebSocket base URL must use ws:// or wss://, got '{}'", base));
    }
    url.path_segments_mut()
        .map_err(|_| anyhow!("WebSocket base URL '{}' cannot take a path", base))?
        .pop_if_empty()
        .push(session_id);
    url.query_pairs_mut()
        .clear()
        .append_pair("response_modality", modality.as_str());
    Ok(url)
}

/// An open session. Dropping it cancels the connection; `close` also waits
/// for the link task to finish.
pub struct Session {
    id: String,
    modality: ResponseModality,
    cmd_tx: mpsc::Sender<NetCommand>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Spawn the connection task. Must be called inside a tokio runtime.
    pub fn open(
        ws_base: &str,
        id: String,
        modality: ResponseModality,
        policy: RetryPolicy,
        events: mpsc::Sender<NetEvent>,
    ) -> anyhow::Result<Self> {
        let url = endpoint_url(ws_base, &id, modality)?;
        let (cmd_tx, cmd_rx) = mpsc::channel::<NetCommand>(COMMAND_QUEUE);
        let cancel = CancellationToken::new();

        let link = NetLink::new(url.to_string(), policy, events, cmd_rx, cancel.clone());
        let task = tokio::spawn(link.run());
        log::info!("Session {} opened ({} replies)", id, modality);

        Ok(Self {
            id,
            modality,
            cmd_tx,
            cancel,
            task: Some(task),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn modality(&self) -> ResponseModality {
        self.modality
    }

    /// Queue an envelope. Envelopes queued while disconnected go out after
    /// the next successful reconnect.
    pub fn send(&self, envelope: Envelope) -> anyhow::Result<()> {
        self.cmd_tx
            .try_send(NetCommand::Send(envelope))
            .map_err(|e| anyhow!("session {}: cannot queue envelope: {}", self.id, e))
    }

    pub fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.send(Envelope::text(text, self.modality))
    }

    pub fn send_audio(&self, samples: &[i16]) -> anyhow::Result<()> {
        self.send(Envelope::audio(samples, self.modality))
    }

    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Session {} link task failed: {}", self.id, e);
            }
        }
        log::info!("Session {} closed", self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::Message;

    #[test]
    fn url_carries_session_and_modality() {
        let url = endpoint_url("ws://localhost:8000/experience/ws", "s-1", ResponseModality::Audio)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/experience/ws/s-1?response_modality=audio"
        );
    }

    #[test]
    fn url_handles_trailing_slash_and_escaping() {
        let url = endpoint_url("wss://agent.example/ws/", "a b/c", ResponseModality::Text).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://agent.example/ws/a%20b%2Fc?response_modality=text"
        );
    }

    #[test]
    fn url_rejects_non_websocket_base() {
        assert!(endpoint_url("http://localhost/ws", "s", ResponseModality::Text).is_err());
        assert!(endpoint_url("not a url", "s", ResponseModality::Text).is_err());
    }

    #[test]
    fn blank_id_is_generated() {
        assert_eq!(resolve_session_id(" fixed "), "fixed");
        let a = resolve_session_id("");
        let b = resolve_session_id("   ");
        assert!(a.starts_with("session-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn close_finishes_while_server_is_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("ws://{}/ws", listener.local_addr().unwrap());
        drop(listener);

        let (ev_tx, _ev_rx) = mpsc::channel(16);
        let session = Session::open(
            &base,
            "s-2".into(),
            ResponseModality::Text,
            RetryPolicy::fixed(Duration::from_secs(60)),
            ev_tx,
        )
        .unwrap();
        assert_eq!(session.id(), "s-2");
        session.send_text("queued while offline").unwrap();

        tokio::time::timeout(Duration::from_secs(2), session.close())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn close_finishes_with_undrained_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("ws://{}/ws", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for n in 0..10 {
                let frame = Envelope::text(&format!("chunk {}", n), ResponseModality::Text)
                    .to_json()
                    .unwrap();
                if ws.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (ev_tx, ev_rx) = mpsc::channel(4);
        let session = Session::open(
            &base,
            "s-3".into(),
            ResponseModality::Text,
            RetryPolicy::fixed(Duration::from_secs(60)),
            ev_tx,
        )
        .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while ev_rx.len() < 4 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(3), session.close())
            .await
            .unwrap();
    }
}
