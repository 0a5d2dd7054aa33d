//! Command layer: typed engine commands, the run/attach bridge, and the
//! daemon that serves them to remote clients.

mod attach;
pub mod bridge;
pub mod client;
pub mod commands;
mod daemon;
mod run;

pub use client::run_remote;
pub use commands::{ClientInput, ClientOutput, Command, Request, dispatch, execute};
pub use daemon::{Daemon, handle_connection};
