//! Typed errors for the audio path and the wire envelope.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    /// The OS refused access to the microphone or speaker device.
    #[error("permission denied opening audio device '{device}'")]
    PermissionDenied { device: String },

    #[error("a recording session is already active")]
    AlreadyRecording,

    #[error("audio device error: {0}")]
    Device(String),
}

impl From<alsa::Error> for AudioError {
    fn from(err: alsa::Error) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::Device(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM payload has odd byte length {0}")]
    OddLength(usize),

    #[error("envelope carries {0}, not audio")]
    NotAudio(&'static str),

    #[error("unsupported mime type '{0}'")]
    UnknownMime(String),
}
