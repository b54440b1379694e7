use crate::audio::AudioConfig;
use crate::net_link::RetryPolicy;
use crate::protocol::ResponseModality;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // 音频配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub sample_rate: u32,
    pub channels: u32,
    pub block_size: usize,

    // 网络配置（静态部分）
    pub ws_base: &'static str,
    pub http_base: &'static str,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,

    // 会话参数（动态部分，可在运行时修改）
    pub session_id: String,
    pub response_modality: ResponseModality,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            sample_rate: env!("AUDIO_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            channels: env!("AUDIO_CHANNELS")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_CHANNELS")?,
            block_size: env!("AUDIO_BLOCK_SIZE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_BLOCK_SIZE")?,

            ws_base: env!("WS_BASE"),
            http_base: env!("HTTP_BASE"),
            reconnect_delay_ms: env!("RECONNECT_DELAY_MS")
                .parse()
                .map_err(|_| "Failed to parse RECONNECT_DELAY_MS")?,
            max_reconnect_attempts: env!("MAX_RECONNECT_ATTEMPTS")
                .parse()
                .map_err(|_| "Failed to parse MAX_RECONNECT_ATTEMPTS")?,

            session_id: env!("SESSION_ID").to_string(),
            response_modality: env!("RESPONSE_MODALITY")
                .parse()
                .map_err(|_| "Failed to parse RESPONSE_MODALITY")?,
        })
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            capture_device: self.capture_device.to_string(),
            playback_device: self.playback_device.to_string(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            block_size: self.block_size,
        }
    }

    /// 0 次表示无限重试，直到会话被关闭
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.reconnect_delay_ms),
            max_attempts: match self.max_reconnect_attempts {
                0 => None,
                n => Some(n),
            },
        }
    }
}
