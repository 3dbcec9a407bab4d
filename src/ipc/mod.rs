//! IPC module for daemon-client communication

mod protocol;
mod server;

pub use protocol::{DaemonStatus, Notification, Phase, Request, Response};
pub use server::{ClientContext, Server};
