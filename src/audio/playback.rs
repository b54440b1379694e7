use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use alsa::pcm::PCM;

use super::alsa_device;
use super::audio_system::AudioConfig;
use crate::error::AudioError;

/// Consecutive failed recoveries before the rest of a chunk is dropped.
const MAX_WRITE_RETRIES: u32 = 3;

/// Output for mono 16-bit PCM.
pub trait PcmSink {
    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError>;
}

pub trait PlaybackDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn PcmSink>, AudioError>;
}

/// Queue of PCM chunks rendered in arrival order by a dedicated thread.
///
/// Nothing touches the output device until the first chunk is enqueued.
pub struct Playback {
    device: Arc<dyn PlaybackDevice>,
    tx: Option<mpsc::UnboundedSender<Vec<i16>>>,
    handle: Option<JoinHandle<()>>,
}

impl Playback {
    pub fn new(device: Arc<dyn PlaybackDevice>) -> Self {
        Self {
            device,
            tx: None,
            handle: None,
        }
    }

    pub fn alsa(config: &AudioConfig) -> Self {
        Self::new(Arc::new(AlsaPlaybackDevice {
            device: config.playback_device.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
        }))
    }

    pub fn is_started(&self) -> bool {
        self.tx.is_some()
    }

    pub fn enqueue(&mut self, samples: Vec<i16>) -> Result<(), AudioError> {
        if samples.is_empty() {
            return Ok(());
        }
        if self.tx.is_none() {
            self.start()?;
        }

        let Some(tx) = &self.tx else {
            return Err(AudioError::Device("playback not started".into()));
        };
        if tx.send(samples).is_err() {
            // thread died; next enqueue reopens the device
            self.shutdown();
            return Err(AudioError::Device("playback thread stopped".into()));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        let (tx, rx) = mpsc::unbounded_channel::<Vec<i16>>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), AudioError>>(1);
        let device = self.device.clone();

        let handle = thread::Builder::new()
            .name("audio-play".into())
            .spawn(move || {
                let sink = match device.open() {
                    Ok(sink) => {
                        let _ = ready_tx.send(Ok(()));
                        sink
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                play_loop(sink, rx);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Playback started");
                self.tx = Some(tx);
                self.handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                log::error!("Failed to start playback: {}", e);
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Device(
                    "playback thread exited before opening the device".into(),
                ))
            }
        }
    }

    /// Let queued audio drain, then release the device.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn play_loop(mut sink: Box<dyn PcmSink>, mut rx: mpsc::UnboundedReceiver<Vec<i16>>) {
    while let Some(chunk) = rx.blocking_recv() {
        if let Err(e) = sink.write(&chunk) {
            log::error!("Audio playback error: {}", e);
        }
    }
    log::info!("Playback stopped");
}

// ======================== ALSA sink ========================

struct AlsaPlaybackDevice {
    device: String,
    sample_rate: u32,
    channels: u32,
}

impl PlaybackDevice for AlsaPlaybackDevice {
    fn open(&self) -> Result<Box<dyn PcmSink>, AudioError> {
        let (pcm, params) =
            alsa_device::open_playback(&self.device, self.sample_rate, self.channels)?;
        log::info!(
            "Playback ready: {}Hz, {} channel(s), period {} frames",
            params.sample_rate,
            params.channels,
            params.period_size
        );
        Ok(Box::new(AlsaSink {
            pcm,
            channels: params.channels.max(1) as usize,
        }))
    }
}

struct AlsaSink {
    pcm: PCM,
    channels: usize,
}

impl PcmSink for AlsaSink {
    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        // Duplicate mono into every channel the device insisted on
        let interleaved: Vec<i16> = if self.channels == 1 {
            samples.to_vec()
        } else {
            samples
                .iter()
                .flat_map(|&s| std::iter::repeat_n(s, self.channels))
                .collect()
        };

        let io = self.pcm.io_i16()?;
        let total_frames = samples.len();
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            let offset = frames_written * self.channels;
            match io.writei(&interleaved[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    self.pcm.prepare()?;

                    if retry_count >= MAX_WRITE_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
