//! Driving a session from its external collaborators
//!
//! The listener itself never waits on I/O. This module reads transcription
//! messages from a channel, enforces the listen window and the grace period
//! for the final result, and resolves the session on time-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use super::listener::{Listener, SessionHandle, SessionOutcome};

/// How long a session listens before asking for the final result
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_millis(10_000);

/// How long to wait for the final result after asking for it
pub const DEFAULT_FINAL_RESPONSE_TIMEOUT: Duration = Duration::from_millis(3_000);

/// A message from the transcription service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// Raw text as sent by the service
    Record(String),
    /// The service ended the session
    SessionEnded,
}

/// Stream of transcription messages for one session
#[async_trait]
pub trait TranscriptionChannel: Send {
    /// Next message, or `None` once the service has gone away.
    ///
    /// Must be cancel safe: the future may be dropped when the session
    /// resolves or a deadline fires.
    async fn next(&mut self) -> Option<ChannelMessage>;

    /// Ask the service to stop transcribing and send its final result
    async fn stop(&mut self) {}
}

/// Supplies the phrases a session listens for
pub trait PhraseSource {
    fn snapshot(&self) -> Vec<String>;
}

impl<S: AsRef<str>> PhraseSource for [S] {
    fn snapshot(&self) -> Vec<String> {
        self.iter().map(|phrase| phrase.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>> PhraseSource for Vec<S> {
    fn snapshot(&self) -> Vec<String> {
        self.as_slice().snapshot()
    }
}

/// Deadlines for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Listen window
    pub listen: Duration,
    /// Grace period for the final result after the window closes
    pub final_response: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_TIMEOUT,
            final_response: DEFAULT_FINAL_RESPONSE_TIMEOUT,
        }
    }
}

/// Feed `channel` into `handle`'s session until it resolves.
///
/// When the listen window closes the channel is asked to stop; if nothing
/// qualifying arrives within the grace period the session times out. The
/// session may also be resolved from elsewhere, e.g. by [`Listener::cancel`].
pub async fn run_session<C>(
    listener: &Listener,
    handle: SessionHandle,
    channel: &mut C,
    timeouts: SessionTimeouts,
) -> SessionOutcome
where
    C: TranscriptionChannel + ?Sized,
{
    let outcome = listener.await_result(handle);
    tokio::pin!(outcome);

    let mut deadline = Instant::now() + timeouts.listen;
    let mut stopping = false;

    loop {
        tokio::select! {
            biased;

            outcome = &mut outcome => return outcome,

            message = channel.next() => match message {
                Some(ChannelMessage::Record(raw)) => {
                    if let Err(err) = listener.handle_message(&raw) {
                        error!(
                            session = handle.id(),
                            error = %err,
                            "transcription record rejected"
                        );
                    }
                }
                Some(ChannelMessage::SessionEnded) | None => {
                    debug!(session = handle.id(), "transcription channel ended");
                    listener.end_session(handle);
                }
            },

            _ = time::sleep_until(deadline) => {
                if stopping {
                    listener.time_out(handle);
                } else {
                    listener.request_stop(handle);
                    channel.stop().await;
                    stopping = true;
                    deadline = Instant::now() + timeouts.final_response;
                }
            }
        }
    }
}

/// Time out `handle`'s session unless it resolves first.
///
/// For callers that feed records through [`Listener::handle_message`]
/// themselves: a `StopRequested` event marks the end of the listen window.
pub async fn enforce_deadline(
    listener: Arc<Listener>,
    handle: SessionHandle,
    timeouts: SessionTimeouts,
) {
    time::sleep(timeouts.listen).await;
    if !listener.request_stop(handle) {
        return;
    }

    time::sleep(timeouts.final_response).await;
    if listener.time_out(handle) {
        info!(session = handle.id(), "no final result before deadline");
    }
}

/// Spawn [`enforce_deadline`] on the current runtime
pub fn spawn_deadline(
    listener: Arc<Listener>,
    handle: SessionHandle,
    timeouts: SessionTimeouts,
) -> JoinHandle<()> {
    tokio::spawn(enforce_deadline(listener, handle, timeouts))
}
