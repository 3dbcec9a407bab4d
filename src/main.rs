//! voicechat-daemon: turn-taking core for a voice-driven chat client
//!
//! The daemon owns the turn-taking controller: microphone-session
//! lifecycle, draft accumulation, user/assistant arbitration, and recovery
//! from recognizer faults. Everything else is a collaborator behind a
//! narrow seam:
//! - the platform speech engines connect as an IPC client, receiving
//!   engine commands and pushing recognizer/playback events
//! - user gestures arrive as IPC requests from UI clients
//! - committed utterances go to a chat proxy over HTTP, and replies come
//!   back to be spoken

mod chat;
mod config;
mod events;
mod ipc;
mod lifecycle;
mod speech;
mod turn;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::chat::ProxyChatSink;
use crate::config::Config;
use crate::events::TurnEvent;
use crate::ipc::{ClientContext, Server};
use crate::lifecycle::ShutdownSignal;
use crate::speech::bridge::{EngineCommand, IpcRecognizer, IpcSynthesizer};
use crate::turn::{ControllerEvent, TurnController, TurnStatus};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voicechat-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, proxy = %config.proxy.base_url, "configuration loaded");

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Create channels for inter-component communication
    // Everything the controller reacts to goes through one queue
    let (controller_tx, controller_rx) = mpsc::channel::<ControllerEvent>(64);
    // Turn events fan out to subscribed IPC clients
    let (event_tx, _event_rx) = broadcast::channel::<TurnEvent>(64);
    // Engine commands fan out to the companion engine client
    let (command_tx, _command_rx) = broadcast::channel::<EngineCommand>(32);
    // Status snapshot served to get_status requests
    let (status_tx, status_rx) = watch::channel(TurnStatus {
        speak_replies: config.turn.speak_replies,
        ..TurnStatus::default()
    });

    // Wire the collaborators: IPC-bridged speech engines, HTTP chat sink
    let recognizer = Arc::new(IpcRecognizer::new(command_tx.clone()));
    let synthesizer = Arc::new(IpcSynthesizer::new(command_tx.clone()));
    let sink = Arc::new(ProxyChatSink::new(config.proxy.clone()));

    let mut controller = TurnController::new(
        config.turn.clone(),
        recognizer,
        synthesizer,
        sink,
        event_tx.clone(),
        status_tx,
        controller_tx.clone(),
    );

    // Create IPC server
    let server = Server::new(
        &config.socket_path,
        ClientContext {
            controller_tx,
            status_rx,
            turn_events: event_tx,
            engine_commands: command_tx,
        },
    )?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the controller (processes gestures, engine events, timers)
        _ = controller.run(controller_rx) => {
            info!("turn controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        reason = shutdown.wait() => {
            info!(%reason, "shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    controller.shutdown().await;
    server.shutdown().await;

    info!("voicechat-daemon stopped");

    Ok(())
}
