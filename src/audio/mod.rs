//! audio - Microphone capture, PCM conversion and playback
//!
//! Uses ALSA for audio I/O. Capture reads float samples and quantizes them
//! to 16-bit PCM; playback writes 16-bit PCM straight to the device.

mod alsa_device;
mod audio_system;
pub mod capture;
pub mod pcm;
pub mod playback;

pub use audio_system::{AudioConfig, AudioSystem};
#[cfg(test)]
pub use capture::Recorder;
#[cfg(test)]
pub use playback::Playback;
