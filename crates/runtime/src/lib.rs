//! Lifecycle supervision: component wiring, the worker pool, graceful
//! shutdown, and the Unix-socket control surface.

mod client;
mod commands;
mod server;
mod supervisor;

pub use client::ControlClient;
pub use commands::{ControlCommand, ControlResponse, SupervisorStatus};
pub use server::run_daemon;
pub use supervisor::{ReplyEvent, Supervisor};
