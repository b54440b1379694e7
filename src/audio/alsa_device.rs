//! ALSA PCM device wrappers for microphone capture and speaker playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use std::io::ErrorKind;

use crate::error::AudioError;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Open a PCM device for capture. Samples are read as `f32` so the
/// 16-bit quantization stays in our hands.
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
) -> Result<(PCM, AlsaParams), AudioError> {
    open_pcm(
        device,
        Direction::Capture,
        Format::FloatLE,
        sample_rate,
        channels,
        Some(period_size),
        "Capture",
    )
}

/// Open a PCM device for 16-bit playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
) -> Result<(PCM, AlsaParams), AudioError> {
    open_pcm(
        device,
        Direction::Playback,
        Format::S16LE,
        sample_rate,
        channels,
        None,
        "Playback",
    )
}

/// EACCES/EPERM from the driver means the user may not use the device,
/// which callers handle differently from a missing or busy card.
fn map_open_error(device: &str, err: alsa::Error) -> AudioError {
    let kind = std::io::Error::from_raw_os_error(err.errno()).kind();
    if kind == ErrorKind::PermissionDenied {
        AudioError::PermissionDenied {
            device: device.to_string(),
        }
    } else {
        AudioError::Device(format!("failed to open PCM device '{}': {}", device, err))
    }
}

fn open_pcm(
    device: &str,
    direction: Direction,
    format: Format,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams), AudioError> {
    let pcm = PCM::new(device, direction, false).map_err(|e| map_open_error(device, e))?;

    {
        let hwp = HwParams::any(&pcm)?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(format)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    if actual_rate != sample_rate {
        log::warn!(
            "ALSA {}: requested {}Hz but device runs at {}Hz, remote will mis-pitch",
            dir_name,
            sample_rate,
            actual_rate,
        );
    }

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((
        pcm,
        AlsaParams {
            sample_rate: actual_rate,
            channels: actual_channels,
            period_size,
        },
    ))
}
