//! Skiff: container process lifecycle and stream attachment engine.
//!
//! A [`Runtime`] owns the containers of one home directory. Each
//! [`Container`] moves `Created → Running → Exited` once, exposes its
//! standard streams before it starts, and keeps them alive across client
//! attachments. The [`server`] module bridges external clients to those
//! streams and serves the engine over a local socket.

pub mod container;
pub mod executor;
pub mod images;
pub mod isolation;
pub mod logs;
pub mod runtime;
pub mod server;
pub mod util;

pub use container::{
    Container, ContainerConfig, ContainerId, ContainerStatus, MountConfig, NetworkConfig,
    OutputPipe, State, StdinPipe,
};
pub use images::{Image, ImageStore, LocalImageStore};
pub use logs::{FileLogStore, LogStore, LogStream};
pub use runtime::{Runtime, RuntimeOptions};
pub use skiff_shared::errors::{SkiffError, SkiffResult};
