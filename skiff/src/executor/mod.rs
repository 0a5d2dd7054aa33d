//! Executor trait and implementations.
//!
//! An executor turns a fully resolved [`LaunchSpec`] into a running OS
//! process. Isolation is described by the launch spec; how much of
//! it is enforced is up to the executor.

mod host;

pub use host::HostExecutor;

use crate::isolation::{MountSpec, NetworkSpec};
use async_trait::async_trait;
use skiff_shared::errors::SkiffResult;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;

/// Process-side stdin handed to the stdin pump.
pub type ProcessStdin = Box<dyn AsyncWrite + Send + Unpin>;
/// Process-side stdout/stderr handed to an output pump.
pub type ProcessOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Everything an executor needs to launch one container process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Short container id, for logging.
    pub container_id: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub hostname: Option<String>,
    pub tty: bool,
    /// Memory limit in bytes.
    pub memory: Option<u64>,
    pub rootfs: PathBuf,
    pub mounts: MountSpec,
    pub network: Option<NetworkSpec>,
}

/// A launched process and its standard streams.
pub struct SpawnedProcess {
    pub child: Child,
    pub stdin: ProcessStdin,
    pub stdout: ProcessOutput,
    /// `None` when stderr shares stdout (terminal mode).
    pub stderr: Option<ProcessOutput>,
}

/// Executor spawns container processes.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Launch the process. Failures are [`SkiffError::Launch`](skiff_shared::SkiffError::Launch).
    async fn spawn(&self, spec: &LaunchSpec) -> SkiffResult<SpawnedProcess>;
}
