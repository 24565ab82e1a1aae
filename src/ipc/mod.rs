//! IPC module for daemon-client communication

mod protocol;
mod server;

pub use protocol::{DaemonStatus, Request, Response};
pub use server::{read_frame, read_message, write_frame, Server};
