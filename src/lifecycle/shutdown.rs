//! Graceful shutdown
//!
//! Waits for SIGTERM, SIGINT or an in-process request, then cancels the
//! listening session in flight so its waiters are released before the
//! server goes away.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::session::Listener;

/// Why the daemon is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    Terminate,
    Interrupt,
    Requested,
}

/// Handles shutdown signals for one listener
pub struct ShutdownSignal {
    listener: Arc<Listener>,
    requested: Notify,
}

impl ShutdownSignal {
    pub fn new(listener: Arc<Listener>) -> Self {
        Self {
            listener,
            requested: Notify::new(),
        }
    }

    /// Ask [`wait`](Self::wait) to return, as if a signal arrived
    pub fn request(&self) {
        self.requested.notify_one();
    }

    /// Wait for a shutdown trigger, then cancel any in-flight session
    pub async fn wait(&self) -> Result<ShutdownCause> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

        let cause = tokio::select! {
            _ = sigterm.recv() => ShutdownCause::Terminate,
            _ = sigint.recv() => ShutdownCause::Interrupt,
            _ = self.requested.notified() => ShutdownCause::Requested,
        };
        debug!(?cause, "shutdown triggered");

        if self.listener.cancel() {
            info!("in-flight listening session cancelled");
        }
        Ok(cause)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;

    use super::*;
    use crate::admission::AdmissionPolicy;
    use crate::session::{NoResultReason, SessionOutcome};

    #[tokio::test]
    async fn test_request_cancels_session() {
        let (tx, _rx) = broadcast::channel(8);
        let listener = Arc::new(Listener::new(AdmissionPolicy::default(), tx));
        let handle = listener.start_session(vec!["cat".to_string()]);
        let shutdown = ShutdownSignal::new(Arc::clone(&listener));

        shutdown.request();
        let cause = shutdown.wait().await.unwrap();

        assert_eq!(cause, ShutdownCause::Requested);
        assert!(!listener.is_listening());
        assert_eq!(
            listener.await_result(handle).await,
            SessionOutcome::NoResult {
                reason: NoResultReason::Cancelled
            }
        );
    }

    #[tokio::test]
    async fn test_request_without_session() {
        let (tx, _rx) = broadcast::channel(8);
        let listener = Arc::new(Listener::new(AdmissionPolicy::default(), tx));
        let shutdown = ShutdownSignal::new(listener);

        shutdown.request();
        assert_eq!(shutdown.wait().await.unwrap(), ShutdownCause::Requested);
    }
}
