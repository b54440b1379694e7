mod audio;
mod config;
mod controller;
mod error;
mod net_link;
mod protocol;
mod rest;
mod session;

use audio::AudioSystem;
use config::Config;
use controller::{CoreController, Flow, SessionSettings};
use net_link::NetEvent;
use rest::ExperienceClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载编译期配置
    let mut config = Config::new().map_err(anyhow::Error::msg)?;

    // 会话ID为空时生成新的，重连时复用同一个
    config.session_id = session::resolve_session_id(&config.session_id);
    log::info!(
        "{} {} starting, session {}",
        env!("APP_NAME"),
        env!("APP_VERSION"),
        config.session_id
    );

    // 网络事件通道
    let (tx_net_event, mut rx_net_event) = mpsc::channel::<NetEvent>(100);

    let audio = AudioSystem::alsa(&config.audio_config());

    let rest = match ExperienceClient::new(config.http_base) {
        Ok(client) => Some(client),
        Err(e) => {
            log::warn!("REST commands disabled: {}", e);
            None
        }
    };

    let settings = SessionSettings {
        ws_base: config.ws_base.to_string(),
        session_id: config.session_id.clone(),
        modality: config.response_modality,
        policy: config.retry_policy(),
    };
    let mut controller = CoreController::new(settings, tx_net_event, audio, rest, std::io::stdout());
    println!("{}", controller::HELP);
    controller.open_session()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // 主事件循环：用户输入、网络事件、Ctrl+C
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if controller.handle_line(&line).await == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }

            Some(event) = rx_net_event.recv() => {
                controller.handle_net_event(event);
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}
