//! EchoLink - P2P Audio Call Client
//!
//! Ein Konsolen-Client für P2P Audio-Anrufe mit:
//! - WebSocket-Relay als Signaling-Server
//! - WebRTC (PCMU) für P2P Audio-Kommunikation
//! - cpal für Mikrofon und Lautsprecher

pub mod call_engine;
pub mod config;
pub mod console;
pub mod signaling;

use anyhow::Context;
use call_engine::{CallController, CpalMediaSource, WebRtcTransportFactory};
use config::Config;
use console::{Command, StatusView};
use signaling::{SignalingClient, SignalingEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// LOGGING
// ============================================================================

/// Installiert den tracing Subscriber (überschreibbar über `RUST_LOG`)
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("echolink=debug,webrtc=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// APP RUNNER
// ============================================================================

/// Verbindet mit dem Relay und führt die Event-Loop bis `quit` aus
pub async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting EchoLink...");

    let url = config.websocket_url()?;
    let mut client = SignalingClient::new(url, config.keepalive());

    // Vor dem Verbinden abonnieren, sonst geht `connected` verloren
    let mut signaling_rx = client.subscribe();
    let local_id = client
        .connect()
        .await
        .context("Failed to connect to signaling server")?;
    println!("Connected as {local_id}. Type 'help' for commands.");

    let client = Arc::new(client);
    let (mut controller, mut transport_rx) = CallController::new(
        client.clone(),
        Arc::new(CpalMediaSource),
        Arc::new(WebRtcTransportFactory::from_config(&config)),
    );

    let mut lines = console::spawn_stdin_reader();
    let mut view = StatusView::default();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut was_active = false;

    loop {
        tokio::select! {
            event = signaling_rx.recv() => match event {
                Ok(event) => {
                    let disconnected = matches!(event, SignalingEvent::Disconnected);
                    controller.handle_signaling_event(event).await;
                    if disconnected {
                        view.refresh(&controller);
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Dropped {} signaling events", n);
                }
                Err(RecvError::Closed) => {
                    controller.handle_signaling_event(SignalingEvent::Disconnected).await;
                    view.refresh(&controller);
                    break;
                }
            },

            Some((call_id, event)) = transport_rx.recv() => {
                controller.handle_transport_event(call_id, event).await;
            }

            line = lines.recv() => match line {
                Some(line) => match Command::parse(&line) {
                    Ok(Some(command)) => {
                        if !console::execute(&mut controller, command).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                },
                None => {
                    tracing::info!("Input closed");
                    break;
                }
            },

            _ = ticker.tick() => controller.tick(),
        }

        // Sekundentakt ab Gesprächsbeginn
        let active = controller.session().is_active();
        if active && !was_active {
            ticker.reset();
        }
        was_active = active;

        view.refresh(&controller);
    }

    controller.shutdown().await;
    drop(controller);

    // Wartet, bis ein abschließendes `end-call` gesendet ist
    if let Ok(mut client) = Arc::try_unwrap(client) {
        client.disconnect().await;
    }

    tracing::info!("EchoLink stopped");
    Ok(())
}
