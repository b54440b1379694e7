use std::io::Write;
use tokio::sync::mpsc;

use crate::audio::AudioSystem;
use crate::error::AudioError;
use crate::net_link::{NetEvent, RetryPolicy};
use crate::protocol::{Envelope, Payload, ResponseModality};
use crate::rest::ExperienceClient;
use crate::session::Session;

/// Some agents tag every streamed chunk with this.
const AGENT_PREFIX: &str = "[experience] ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub role: Role,
    pub text: String,
}

/// Chat history. Streamed assistant chunks grow the open message until a
/// user turn or a disconnect closes it.
#[derive(Debug, Default)]
pub struct Transcript {
    lines: Vec<ChatLine>,
    open: Option<usize>,
}

impl Transcript {
    pub fn lines(&self) -> &[ChatLine] {
        &self.lines
    }

    pub fn has_open_message(&self) -> bool {
        self.open.is_some()
    }

    pub fn push_user(&mut self, text: &str) {
        self.close_message();
        self.push(Role::User, text);
    }

    pub fn push_system(&mut self, text: &str) {
        self.push(Role::System, text);
    }

    /// Returns true when the chunk started a new assistant message.
    pub fn append_assistant_chunk(&mut self, chunk: &str) -> bool {
        match self.open {
            Some(idx) => {
                self.lines[idx].text.push_str(chunk);
                false
            }
            None => {
                self.push(Role::Assistant, chunk);
                self.open = Some(self.lines.len() - 1);
                true
            }
        }
    }

    pub fn close_message(&mut self) {
        self.open = None;
    }

    fn push(&mut self, role: Role, text: &str) {
        self.lines.push(ChatLine {
            role,
            text: text.to_string(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ws_base: String,
    pub session_id: String,
    pub modality: ResponseModality,
    pub policy: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub const HELP: &str =
    "commands: /rec  /stop  /postrec  /modality text|audio  /post <text>  /health  /status  /quit";

pub struct CoreController<W: Write> {
    settings: SessionSettings,
    events: mpsc::Sender<NetEvent>,
    session: Option<Session>,
    audio: AudioSystem,
    rest: Option<ExperienceClient>,
    transcript: Transcript,
    connected: bool,
    out: W,
}

impl<W: Write> CoreController<W> {
    pub fn new(
        settings: SessionSettings,
        events: mpsc::Sender<NetEvent>,
        audio: AudioSystem,
        rest: Option<ExperienceClient>,
        out: W,
    ) -> Self {
        Self {
            settings,
            events,
            session: None,
            audio,
            rest,
            transcript: Transcript::default(),
            connected: false,
            out,
        }
    }

    #[cfg(test)]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[cfg(test)]
    pub fn audio(&self) -> &AudioSystem {
        &self.audio
    }

    /// Open the session if none is open. Must run inside a tokio runtime.
    pub fn open_session(&mut self) -> anyhow::Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = Session::open(
            &self.settings.ws_base,
            self.settings.session_id.clone(),
            self.settings.modality,
            self.settings.policy,
            self.events.clone(),
        )?;
        self.say(&format!(
            "[session {}, {} replies] connecting...",
            session.id(),
            session.modality()
        ));
        self.session = Some(session);
        Ok(())
    }

    pub async fn shutdown(mut self) {
        self.finish_stream();
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.audio.stop();
    }

    pub fn handle_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Connected => {
                self.connected = true;
                self.say("[connected]");
            }
            NetEvent::Disconnected => {
                let was_connected = std::mem::replace(&mut self.connected, false);
                self.finish_stream();
                if was_connected {
                    self.transcript.push_system("Connection closed.");
                    self.say("[connection closed, reconnecting]");
                }
            }
            NetEvent::Envelope(envelope) => self.handle_envelope(envelope),
        }
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        if envelope.is_connection_notice() {
            log::info!("Server confirmed session {:?}", envelope.session_id);
            return;
        }

        match &envelope.payload {
            Payload::Text { data } => {
                let chunk = data.strip_prefix(AGENT_PREFIX).unwrap_or(data.as_str());
                if chunk.is_empty() {
                    return;
                }
                let started = self.transcript.append_assistant_chunk(chunk);
                let written = if started {
                    write!(self.out, "assistant> {}", chunk)
                } else {
                    write!(self.out, "{}", chunk)
                };
                if let Err(e) = written.and_then(|_| self.out.flush()) {
                    log::warn!("Failed to write chat output: {}", e);
                }
            }
            Payload::Audio { .. } => match envelope.pcm_samples() {
                Ok(samples) if samples.is_empty() => {}
                Ok(samples) => {
                    log::debug!("Playing {} samples", samples.len());
                    if let Err(e) = self.audio.play(samples) {
                        log::error!("Audio playback error: {}", e);
                    }
                }
                Err(e) => log::warn!("Dropping audio envelope: {}", e),
            },
        }
    }

    pub async fn handle_line(&mut self, line: &str) -> Flow {
        let line = line.trim();
        if line.is_empty() {
            return Flow::Continue;
        }

        let (cmd, arg) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };

        match cmd {
            "/quit" | "/exit" => return Flow::Quit,
            "/help" => self.say(HELP),
            "/rec" => self.start_recording(),
            "/stop" => self.stop_recording(),
            "/modality" => self.switch_modality(arg).await,
            "/post" => self.post_text(arg).await,
            "/postrec" => self.post_recording().await,
            "/health" => self.check_health().await,
            "/status" => self.show_status(),
            _ if cmd.starts_with('/') => self.say(&format!("unknown command {}. {}", cmd, HELP)),
            _ => self.send_text(line),
        }
        Flow::Continue
    }

    fn show_status(&mut self) {
        let session = match &self.session {
            Some(s) => format!("{} ({} replies)", s.id(), s.modality()),
            None => "none".to_string(),
        };
        let status = format!(
            "[session {}, {}, {}, speaker {}, {} chat lines]",
            session,
            if self.is_connected() { "connected" } else { "offline" },
            if self.audio.is_recording() { "recording" } else { "idle" },
            if self.audio.is_playing() { "open" } else { "closed" },
            self.transcript.lines().len(),
        );
        self.say(&status);
    }

    fn send_text(&mut self, text: &str) {
        self.finish_stream();
        self.transcript.push_user(text);
        let Some(session) = &self.session else {
            self.say("[not connected]");
            return;
        };
        if let Err(e) = session.send_text(text) {
            log::error!("Failed to send text: {}", e);
            self.say("[send failed]");
        }
    }

    fn start_recording(&mut self) {
        match self.audio.start_recording() {
            Ok(()) => self.say("[recording, /stop to send]"),
            Err(AudioError::PermissionDenied { device }) => {
                self.say(&format!("[microphone access denied: {}]", device))
            }
            Err(AudioError::AlreadyRecording) => self.say("[already recording]"),
            Err(e) => self.say(&format!("[cannot record: {}]", e)),
        }
    }

    /// Stop the recording and hand back what it captured, if anything.
    fn take_recording(&mut self) -> Option<Vec<i16>> {
        if !self.audio.is_recording() {
            self.say("[not recording]");
            return None;
        }
        log::debug!("Stopping recording after {} blocks", self.audio.captured_blocks());
        let samples = self.audio.stop_recording();
        if samples.is_empty() {
            self.say("[no audio captured]");
            return None;
        }

        self.finish_stream();
        self.transcript.push_user(&format!("[audio: {} samples]", samples.len()));
        Some(samples)
    }

    fn stop_recording(&mut self) {
        let Some(samples) = self.take_recording() else {
            return;
        };
        let Some(session) = &self.session else {
            self.say("[not connected]");
            return;
        };
        match session.send_audio(&samples) {
            Ok(()) => self.say(&format!("[sent {} samples]", samples.len())),
            Err(e) => {
                log::error!("Failed to send audio: {}", e);
                self.say("[send failed]");
            }
        }
    }

    // 录音通过 REST 一次性上传，不经过 WebSocket 会话
    async fn post_recording(&mut self) {
        if self.rest.is_none() {
            self.say("[REST endpoint not configured]");
            return;
        }
        let Some(samples) = self.take_recording() else {
            return;
        };
        let Some(rest) = &self.rest else {
            return;
        };
        let result = rest
            .send_audio(&self.settings.session_id, &samples, self.settings.modality)
            .await;
        match result.and_then(|resp| Ok(resp.into_envelope()?)) {
            Ok(envelope) => {
                self.handle_envelope(envelope);
                self.finish_stream();
            }
            Err(e) => self.say(&format!("[request failed: {}]", e)),
        }
    }

    // 回复模态是连接 URL 的一部分，切换时需要重新建立会话
    async fn switch_modality(&mut self, arg: &str) {
        let modality = match arg.parse::<ResponseModality>() {
            Ok(m) => m,
            Err(e) => {
                self.say(&format!("[{}]", e));
                return;
            }
        };
        if modality == self.settings.modality && self.session.is_some() {
            return;
        }

        self.settings.modality = modality;
        self.finish_stream();
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.connected = false;
        if let Err(e) = self.open_session() {
            log::error!("Failed to reopen session: {}", e);
            self.say("[reconnect failed]");
        }
    }

    async fn post_text(&mut self, text: &str) {
        let Some(rest) = &self.rest else {
            self.say("[REST endpoint not configured]");
            return;
        };
        let result = rest
            .send_text(&self.settings.session_id, text, self.settings.modality)
            .await;
        match result.and_then(|resp| Ok(resp.into_envelope()?)) {
            Ok(envelope) => {
                self.transcript.push_user(text);
                self.handle_envelope(envelope);
                self.finish_stream();
            }
            Err(e) => self.say(&format!("[request failed: {}]", e)),
        }
    }

    async fn check_health(&mut self) {
        let Some(rest) = &self.rest else {
            self.say("[REST endpoint not configured]");
            return;
        };
        match rest.health().await {
            Ok(status) => self.say(&format!("[health] {}", status)),
            Err(e) => self.say(&format!("[health check failed: {}]", e)),
        }
    }

    /// End the streamed assistant line, if any.
    fn finish_stream(&mut self) {
        if self.transcript.has_open_message() {
            self.transcript.close_message();
            if let Err(e) = writeln!(self.out).and_then(|_| self.out.flush()) {
                log::warn!("Failed to write chat output: {}", e);
            }
        }
    }

    fn say(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            log::warn!("Failed to write chat output: {}", e);
        }
    }
}
