use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

use crate::protocol::Envelope;

#[derive(Debug)]
pub enum NetEvent {
    Connected,
    Envelope(Envelope),
    Disconnected,
}

#[derive(Debug)]
pub enum NetCommand {
    Send(Envelope),
}

/// Fixed-interval reconnect schedule. The delay never grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// Consecutive failed reconnects allowed; `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Delay before reconnect number `attempt` (1-based), or `None` once the
    /// attempt budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.delay),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Self::DEFAULT_DELAY)
    }
}

pub struct NetLink {
    url: String,
    policy: RetryPolicy,
    tx: mpsc::Sender<NetEvent>,
    rx_cmd: mpsc::Receiver<NetCommand>,
    cancel: CancellationToken,
}

impl NetLink {
    pub fn new(
        url: String,
        policy: RetryPolicy,
        tx: mpsc::Sender<NetEvent>,
        rx_cmd: mpsc::Receiver<NetCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            url,
            policy,
            tx,
            rx_cmd,
            cancel,
        }
    }

    // 连接断开后按固定间隔重连，直到取消或超过最大次数
    pub async fn run(mut self) {
        let mut attempt = 0u32;
        loop {
            let mut connected = false;
            match self.connect_and_loop(&mut connected).await {
                // 取消或命令通道关闭，正常退出
                Ok(()) => break,
                Err(e) => {
                    if connected {
                        attempt = 0;
                    }
                    log::warn!("Connection to {} lost: {}", self.url, e);
                    if !matches!(self.emit(NetEvent::Disconnected).await, Ok(true)) {
                        break;
                    }
                }
            }

            attempt += 1;
            let Some(delay) = self.policy.next_delay(attempt) else {
                log::error!(
                    "Giving up on {} after {} reconnect attempts",
                    self.url,
                    attempt - 1
                );
                break;
            };
            log::info!("Reconnecting in {:?} (attempt {})", delay, attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        log::info!("NetLink stopped");
    }

    /// Forward an event unless cancelled first. `Ok(false)` means cancelled.
    async fn emit(&self, event: NetEvent) -> anyhow::Result<bool> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(false),
            sent = self.tx.send(event) => {
                sent?;
                Ok(true)
            }
        }
    }

    /// Returns `Ok` when asked to stop, `Err` when the connection failed or
    /// the server went away.
    async fn connect_and_loop(&mut self, connected: &mut bool) -> anyhow::Result<()> {
        log::info!("Connecting to {}...", self.url);
        let (ws_stream, _) = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            result = connect_async(self.url.as_str()) => result?,
        };
        *connected = true;
        log::info!("Connected!");

        let (mut write, mut read) = ws_stream.split();
        if !self.emit(NetEvent::Connected).await? {
            let _ = write.send(Message::Close(None)).await;
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match Envelope::parse(text.as_str()) {
                            Ok(envelope) => {
                                log::debug!("Received {} envelope", envelope.mime_type());
                                if !self.emit(NetEvent::Envelope(envelope)).await? {
                                    let _ = write.send(Message::Close(None)).await;
                                    return Ok(());
                                }
                            }
                            Err(e) => log::warn!("Dropping frame: {} ({})", e, text.as_str()),
                        },
                        Some(Ok(Message::Binary(data))) => {
                            log::warn!("Ignoring {} byte binary frame", data.len());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            return Err(anyhow::anyhow!("Connection closed"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(anyhow::anyhow!("Connection closed")),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::Send(envelope)) => {
                            let json = envelope.to_json()?;
                            write.send(Message::Text(json.into())).await?;
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
