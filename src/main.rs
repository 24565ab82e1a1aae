//! speech-match-daemon: listening sessions over a Unix socket
//!
//! The daemon keeps one listening session at a time and provides:
//! - `listen` requests that wait for the session's accepted utterance
//! - a feed for raw transcription service messages
//! - listen events for subscribed clients (e.g. the audio bridge)
//!
//! Audio capture and the connection to the transcription service live in a
//! separate bridge process.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use speech_match::config::Config;
use speech_match::events::ListenEvent;
use speech_match::ipc::Server;
use speech_match::lifecycle::ShutdownSignal;
use speech_match::session::Listener;

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
        "speech-match-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        threshold = config.matching.threshold,
        stability = config.stability_threshold,
        "configuration loaded"
    );

    // Listener -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<ListenEvent>(64);
    let listener = Arc::new(Listener::new(config.policy(), event_tx));

    // Cancels the in-flight session when a signal arrives
    let shutdown = ShutdownSignal::new(Arc::clone(&listener));

    let server = Server::new(&config.socket_path, Arc::clone(&listener), config.timeouts)?;

    info!("daemon initialized, entering main loop");

    let run = server.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
            server.shutdown().await;
        }

        result = shutdown.wait() => {
            match result {
                Ok(cause) => info!(?cause, "shutdown signal received"),
                Err(e) => error!(?e, "signal handling failed"),
            }

            // Cleanup: the server keeps running until its clients have
            // their final replies.
            info!("shutting down...");
            let (result, ()) = tokio::join!(run, server.shutdown());
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }
    }

    info!("speech-match-daemon stopped");

    Ok(())
}
