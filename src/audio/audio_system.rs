//! The AudioSystem pairs the recorder and the playback queue.
//!
//! Both use std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with async network tasks.

use super::capture::Recorder;
use super::pcm::SAMPLE_RATE;
use super::playback::Playback;
use crate::error::AudioError;

/// Audio system configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Sample rate for both directions
    pub sample_rate: u32,
    /// Channel count requested from ALSA; only the first is used
    pub channels: u32,
    /// Samples per capture block
    pub block_size: usize,
}

pub struct AudioSystem {
    recorder: Recorder,
    playback: Playback,
}

impl AudioSystem {
    pub fn new(recorder: Recorder, playback: Playback) -> Self {
        Self { recorder, playback }
    }

    pub fn alsa(config: &AudioConfig) -> Self {
        log::info!(
            "AudioSystem: capture \"{}\", playback \"{}\", rate {}Hz, block {}",
            config.capture_device,
            config.playback_device,
            config.sample_rate,
            config.block_size,
        );
        if config.sample_rate != SAMPLE_RATE {
            log::warn!(
                "AudioSystem: configured rate {}Hz, the agent expects {}Hz",
                config.sample_rate,
                SAMPLE_RATE
            );
        }
        Self::new(Recorder::alsa(config), Playback::alsa(config))
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn captured_blocks(&self) -> usize {
        self.recorder.captured_blocks()
    }

    /// True once the playback device has been opened.
    pub fn is_playing(&self) -> bool {
        self.playback.is_started()
    }

    pub fn start_recording(&mut self) -> Result<(), AudioError> {
        self.recorder.start()
    }

    pub fn stop_recording(&mut self) -> Vec<i16> {
        self.recorder.stop()
    }

    pub fn play(&mut self, samples: Vec<i16>) -> Result<(), AudioError> {
        self.playback.enqueue(samples)
    }

    /// Signal threads to stop and wait for them to finish.
    pub fn stop(&mut self) {
        self.recorder.stop();
        self.playback.shutdown();
    }
}
