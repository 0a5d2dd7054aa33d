//! Skiff shared code
//!
//! Error taxonomy, constants and the client/daemon wire protocol used by
//! both the engine (`skiff`) and the command-line client (`skiff-cli`).

pub mod constants;
pub mod errors;
pub mod protocol;
pub mod transport;

pub use errors::{SkiffError, SkiffResult};
pub use protocol::{CommandRequest, Frame, FrameKind};
pub use transport::Transport;
