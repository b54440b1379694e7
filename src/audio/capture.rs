//! Microphone capture into an in-memory recording session.
//!
//! A recording runs on its own OS thread: the device is opened there, one
//! block of float samples is read per iteration, quantized to 16-bit PCM and
//! appended to the shared [`CaptureSession`]. `stop` joins the thread, which
//! drops the device handle, and returns every captured block in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;

use super::alsa_device;
use super::audio_system::AudioConfig;
use super::pcm::{BLOCK_SIZE, concat_blocks, float_to_pcm16};
use crate::error::AudioError;

fn block_size_or_default(block_size: usize) -> usize {
    if block_size == 0 { BLOCK_SIZE } else { block_size }
}

/// Something that yields mono float samples one block at a time.
pub trait CaptureSource {
    /// Blocks until up to `buf.len()` samples are available and returns how
    /// many were written. `Ok(0)` means nothing arrived this round.
    fn read_block(&mut self, buf: &mut [f32]) -> Result<usize, AudioError>;
}

/// Opens a fresh [`CaptureSource`]. Called on the capture thread so the
/// source itself never has to cross threads.
pub trait CaptureDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureSource>, AudioError>;
}

/// Blocks captured during one recording.
#[derive(Debug, Default)]
pub struct CaptureSession {
    blocks: Vec<Vec<i16>>,
}

impl CaptureSession {
    pub fn push_block(&mut self, input: &[f32]) {
        self.blocks.push(float_to_pcm16(input));
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn finish(self) -> Vec<i16> {
        concat_blocks(&self.blocks)
    }
}

struct ActiveRecording {
    running: Arc<AtomicBool>,
    session: Arc<Mutex<CaptureSession>>,
    handle: JoinHandle<()>,
}

pub struct Recorder {
    device: Arc<dyn CaptureDevice>,
    block_size: usize,
    active: Option<ActiveRecording>,
}

impl Recorder {
    /// A zero `block_size` falls back to [`BLOCK_SIZE`].
    pub fn new(device: Arc<dyn CaptureDevice>, block_size: usize) -> Self {
        Self {
            device,
            block_size: block_size_or_default(block_size),
            active: None,
        }
    }

    /// Recorder backed by the configured ALSA capture device.
    pub fn alsa(config: &AudioConfig) -> Self {
        Self::new(
            Arc::new(AlsaCaptureDevice {
                device: config.capture_device.clone(),
                sample_rate: config.sample_rate,
                channels: config.channels,
                block_size: block_size_or_default(config.block_size),
            }),
            config.block_size,
        )
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn captured_blocks(&self) -> usize {
        self.active
            .as_ref()
            .map(|a| lock_session(&a.session).block_count())
            .unwrap_or(0)
    }

    /// Open the device and begin a new recording session. Fails without
    /// side effects if the device cannot be opened or a session is live.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.active.is_some() {
            return Err(AudioError::AlreadyRecording);
        }

        let running = Arc::new(AtomicBool::new(true));
        let session = Arc::new(Mutex::new(CaptureSession::default()));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), AudioError>>(1);

        let handle = {
            let device = self.device.clone();
            let running = running.clone();
            let session = session.clone();
            let block_size = self.block_size;
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    let source = match device.open() {
                        Ok(source) => {
                            let _ = ready_tx.send(Ok(()));
                            source
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    capture_loop(source, block_size, &session, &running);
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Recording started (block size {})", self.block_size);
                self.active = Some(ActiveRecording {
                    running,
                    session,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                log::error!("Failed to start recording: {}", e);
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Device(
                    "capture thread exited before opening the device".into(),
                ))
            }
        }
    }

    /// End the session and return all captured samples. Returns an empty
    /// buffer when nothing is recording.
    pub fn stop(&mut self) -> Vec<i16> {
        let Some(active) = self.active.take() else {
            return Vec::new();
        };

        active.running.store(false, Ordering::SeqCst);
        if active.handle.join().is_err() {
            log::error!("Capture thread panicked; returning blocks captured so far");
        }

        let session = std::mem::take(&mut *lock_session(&active.session));
        let blocks = session.block_count();
        let samples = session.finish();
        log::info!(
            "Recording stopped: {} blocks, {} samples",
            blocks,
            samples.len()
        );
        samples
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_session(session: &Mutex<CaptureSession>) -> std::sync::MutexGuard<'_, CaptureSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn capture_loop(
    mut source: Box<dyn CaptureSource>,
    block_size: usize,
    session: &Mutex<CaptureSession>,
    running: &AtomicBool,
) {
    let mut buf = vec![0f32; block_size];

    while running.load(Ordering::Relaxed) {
        match source.read_block(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                // stop() may land while a read is blocked; that block still counts
                lock_session(session).push_block(&buf[..n]);
            }
            Err(e) => {
                log::error!("Capture failed, ending session early: {}", e);
                break;
            }
        }
    }
    // source dropped here, releasing the device
}

// ======================== ALSA source ========================

struct AlsaCaptureDevice {
    device: String,
    sample_rate: u32,
    channels: u32,
    block_size: usize,
}

impl CaptureDevice for AlsaCaptureDevice {
    fn open(&self) -> Result<Box<dyn CaptureSource>, AudioError> {
        let (pcm, params) = alsa_device::open_capture(
            &self.device,
            self.sample_rate,
            self.channels,
            self.block_size,
        )?;
        let channels = params.channels.max(1) as usize;
        if params.period_size != self.block_size {
            log::debug!(
                "Capture period is {} frames, reading {} per block at {}Hz",
                params.period_size,
                self.block_size,
                params.sample_rate
            );
        }
        Ok(Box::new(AlsaCaptureSource {
            pcm,
            channels,
            interleaved: vec![0f32; self.block_size * channels],
        }))
    }
}

struct AlsaCaptureSource {
    pcm: PCM,
    channels: usize,
    interleaved: Vec<f32>,
}

impl CaptureSource for AlsaCaptureSource {
    fn read_block(&mut self, buf: &mut [f32]) -> Result<usize, AudioError> {
        let wanted = buf.len().min(self.interleaved.len() / self.channels);
        let io = self.pcm.io_f32()?;
        match io.readi(&mut self.interleaved[..wanted * self.channels]) {
            Ok(frames) => {
                // Only the first channel is kept
                for (i, out) in buf.iter_mut().take(frames).enumerate() {
                    *out = self.interleaved[i * self.channels];
                }
                Ok(frames)
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                self.pcm.prepare()?;
                Ok(0)
            }
        }
    }
}
