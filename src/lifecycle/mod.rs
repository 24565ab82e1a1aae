//! Daemon lifecycle: shutdown on SIGTERM/SIGINT

mod shutdown;

pub use shutdown::{ShutdownCause, ShutdownSignal};
