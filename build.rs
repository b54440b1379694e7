use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    network: Network,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    sample_rate: u32,
    channels: u32,
    block_size: usize,
}

#[derive(Deserialize)]
struct Network {
    ws_base: String,
    http_base: String,
    reconnect_delay_ms: u64,
    max_reconnect_attempts: u32,
    session_id: String,
    response_modality: String,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    match config.network.response_modality.as_str() {
        "text" | "audio" => {}
        other => panic!("network.response_modality must be \"text\" or \"audio\", got {:?}", other),
    }

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_BLOCK_SIZE={}", config.audio.block_size);

    // 网络配置
    println!("cargo:rustc-env=WS_BASE={}", config.network.ws_base);
    println!("cargo:rustc-env=HTTP_BASE={}", config.network.http_base);
    println!("cargo:rustc-env=RECONNECT_DELAY_MS={}", config.network.reconnect_delay_ms);
    println!("cargo:rustc-env=MAX_RECONNECT_ATTEMPTS={}", config.network.max_reconnect_attempts);
    println!("cargo:rustc-env=SESSION_ID={}", config.network.session_id);
    println!("cargo:rustc-env=RESPONSE_MODALITY={}", config.network.response_modality);
}
