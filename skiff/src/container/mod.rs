//! Container entity: configuration, lifecycle state and standard streams.
//!
//! A container moves `Created → Running → Exited` exactly once. Its state is
//! written by `start()` and by its [`Monitor`](monitor::Monitor); everyone
//! else reads snapshots.

mod config;
mod id;
mod monitor;
mod pipes;
mod state;

pub use config::{ContainerConfig, MountConfig, NetworkConfig, parse_memory};
pub use id::ContainerId;
pub use pipes::{OutputCloser, OutputPipe, StdinPipe};
pub use state::{ContainerStatus, State};

use crate::executor::{Executor, LaunchSpec, SpawnedProcess};
use crate::images::Image;
use crate::isolation::{build_mount_spec, build_network_spec};
use crate::logs::{LogReader, LogStore, LogStream};
use crate::runtime::layout::ContainerLayout;
use crate::util::{Closeable, close_all};
use monitor::Monitor;
use nix::sys::signal::Signal;
use parking_lot::{Mutex, RwLock};
use pipes::{Pipes, pump_output, pump_stdin};
use serde::{Deserialize, Serialize};
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};

/// What gets written to `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedConfig {
    pub id: ContainerId,
    pub config: ContainerConfig,
    pub image: Image,
}

/// Collaborators a container calls into.
#[derive(Clone)]
pub(crate) struct ContainerDeps {
    pub log_store: Arc<dyn LogStore>,
    pub executor: Arc<dyn Executor>,
    pub drain_timeout: Duration,
}

/// One isolated process with its configuration, state and standard streams.
///
/// Containers are created through [`Runtime::create`](crate::Runtime::create)
/// and shared as `Arc<Container>`; every method takes `&self`.
pub struct Container {
    id: ContainerId,
    config: ContainerConfig,
    image: Image,
    state: RwLock<State>,
    pipes: Pipes,
    layout: ContainerLayout,
    deps: ContainerDeps,
    /// Flips to true once, after the terminal state is recorded.
    exited: watch::Sender<bool>,
    /// Signal channel to the monitor while running.
    signals: Mutex<Option<mpsc::UnboundedSender<Signal>>>,
    start_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("image", &self.image.name)
            .field("cmd", &self.config.cmd)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl Container {
    pub(crate) fn new(
        id: ContainerId,
        config: ContainerConfig,
        image: Image,
        state: State,
        layout: ContainerLayout,
        deps: ContainerDeps,
    ) -> Arc<Self> {
        let exited = state.status.is_exited();
        let pipes = if exited {
            Pipes::released()
        } else {
            Pipes::new(config.open_stdin)
        };
        Arc::new(Self {
            id,
            config,
            image,
            state: RwLock::new(state),
            pipes,
            layout,
            deps,
            exited: watch::Sender::new(exited),
            signals: Mutex::new(None),
            start_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Full 64-character hex identifier.
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// First 12 characters of the id, as shown by `ps`.
    pub fn short_id(&self) -> &str {
        self.id.short()
    }

    /// The configuration the container was created with. Never changes.
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// The image resolved at create time.
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Consistent snapshot of the mutable state.
    pub fn state(&self) -> State {
        self.state.read().clone()
    }

    /// Whether the process is currently alive.
    pub fn is_running(&self) -> bool {
        self.state.read().running()
    }

    pub(crate) fn pipes(&self) -> &Pipes {
        &self.pipes
    }

    pub(crate) fn layout(&self) -> &ContainerLayout {
        &self.layout
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Launch the process and arm its monitor. Returns once launched.
    ///
    /// On failure the container stays `Created`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The container was already started (`InvalidState`)
    /// - Its log files cannot be opened
    /// - The executor fails to spawn the process (`Launch`)
    pub async fn start(self: &Arc<Self>) -> SkiffResult<()> {
        let _guard = self.start_lock.lock().await;

        let status = self.state.read().status;
        if !status.can_start() {
            return Err(SkiffError::InvalidState(format!(
                "container {} is {}, only created containers can start",
                self.short_id(),
                status
            )));
        }

        let stdout_log = Arc::new(self.deps.log_store.writer(&self.id, LogStream::Stdout).await?);
        let stderr_log = Arc::new(self.deps.log_store.writer(&self.id, LogStream::Stderr).await?);

        let stdin_rx = self.pipes.take_stdin_receiver().ok_or_else(|| {
            SkiffError::Internal(format!("container {} stdin already taken", self.short_id()))
        })?;

        let spec = self.launch_spec();
        let spawned = match self.deps.executor.spawn(&spec).await {
            Ok(spawned) => spawned,
            Err(e) => {
                self.pipes.restore_stdin_receiver(stdin_rx);
                let _ = close_all(&[&*stdout_log as &dyn Closeable, &*stderr_log]).await;
                tracing::warn!(container_id = %self.short_id(), error = %e, "container failed to launch");
                return Err(match e {
                    SkiffError::Launch(_) => e,
                    other => SkiffError::Launch(other.to_string()),
                });
            }
        };

        let SpawnedProcess {
            child,
            stdin,
            stdout,
            stderr,
        } = spawned;
        let pid = child.id();

        // The signal channel exists before anyone can observe Running
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        *self.signals.lock() = Some(signal_tx);
        if let Err(e) = self.state.write().mark_running(pid) {
            self.signals.lock().take();
            return Err(e);
        }
        self.persist_state().await;

        tokio::spawn(pump_stdin(stdin_rx, stdin, self.config.tty));
        let mut pumps = vec![tokio::spawn(pump_output(
            stdout,
            self.pipes.stdout_hub(),
            Arc::clone(&stdout_log),
        ))];
        match stderr {
            Some(stderr) => pumps.push(tokio::spawn(pump_output(
                stderr,
                self.pipes.stderr_hub(),
                Arc::clone(&stderr_log),
            ))),
            None => self.pipes.stderr_hub().finish(),
        }

        Monitor::new(
            Arc::clone(self),
            child,
            signal_rx,
            pumps,
            vec![stdout_log, stderr_log],
            self.deps.drain_timeout,
        )
        .spawn();

        tracing::info!(
            container_id = %self.short_id(),
            pid = ?pid,
            cmd = ?self.config.cmd,
            "container started"
        );
        Ok(())
    }

    /// Start, then wait for exit. The exit code is in the returned state.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub async fn run(self: &Arc<Self>) -> SkiffResult<State> {
        self.start().await?;
        self.wait().await
    }

    /// SIGKILL the process. A no-op when it is not running.
    ///
    /// Does not wait; follow with [`wait`](Self::wait) to observe the exit.
    pub fn kill(&self) -> SkiffResult<()> {
        self.signal(Signal::SIGKILL)
    }

    /// Deliver `signal` to the process. A no-op when it is not running.
    pub fn signal(&self, signal: Signal) -> SkiffResult<()> {
        if !self.state.read().status.can_kill() {
            tracing::debug!(container_id = %self.short_id(), %signal, "not running, signal ignored");
            return Ok(());
        }
        if let Some(tx) = self.signals.lock().as_ref() {
            // A closed channel means the monitor already saw the exit
            let _ = tx.send(signal);
        }
        Ok(())
    }

    /// Block until the container has exited. Returns immediately if it already has.
    pub async fn wait(&self) -> SkiffResult<State> {
        let mut rx = self.exited.subscribe();
        rx.wait_for(|exited| *exited)
            .await
            .map_err(|_| SkiffError::Internal("exit notifier dropped".into()))?;
        Ok(self.state())
    }

    /// [`wait`](Self::wait) with a deadline. Elapsing does not touch the process.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the container is still running at the deadline.
    pub async fn wait_timeout(&self, timeout: Duration) -> SkiffResult<State> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| {
                SkiffError::Timeout(format!(
                    "container {} still running after {:?}",
                    self.short_id(),
                    timeout
                ))
            })?
    }

    /// Run to completion with stdin closed and return everything written to stdout.
    ///
    /// Stdin is closed only once the process is running, so a failed launch
    /// leaves the container `Created` with its stdin intact.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The container is not `Created`
    /// - The process cannot be launched
    /// - Reading stdout fails
    pub async fn output(self: &Arc<Self>) -> SkiffResult<Vec<u8>> {
        let mut stdout = self.stdout_pipe();
        self.start().await?;
        self.pipes.close_stdin();

        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await?;
        self.wait().await?;
        Ok(buf)
    }

    // ========================================================================
    // STREAMS
    // ========================================================================

    /// A writer for the process's stdin.
    ///
    /// Every call returns a view of the same stream. Dropping a view leaves
    /// stdin open; closing any view closes it for all of them. Writes wait
    /// while the process is not reading.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the container was created without `open_stdin`.
    pub fn stdin_pipe(&self) -> SkiffResult<StdinPipe> {
        if !self.config.open_stdin {
            return Err(SkiffError::InvalidState(format!(
                "container {} was not created with an open stdin",
                self.short_id()
            )));
        }
        Ok(self.pipes.stdin())
    }

    /// A new reader of the process's stdout.
    ///
    /// It sees output written after this call and EOF once the process has
    /// exited. Hold it only while reading: an unread pipe eventually stalls
    /// the process. For earlier output use [`read_log`](Self::read_log).
    pub fn stdout_pipe(&self) -> OutputPipe {
        self.pipes.stdout()
    }

    /// A new reader of the process's stderr. Same rules as
    /// [`stdout_pipe`](Self::stdout_pipe); on a tty container it reads EOF.
    pub fn stderr_pipe(&self) -> OutputPipe {
        self.pipes.stderr()
    }

    /// Replay everything the process wrote to a stream.
    pub async fn read_log(&self, stream: LogStream) -> SkiffResult<LogReader> {
        self.deps.log_store.read_log(&self.id, stream).await
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            container_id: self.short_id().to_string(),
            program: self.config.program().to_string(),
            args: self.config.args().to_vec(),
            env: self.config.env.clone(),
            working_dir: self.config.working_dir.clone(),
            hostname: self.config.hostname.clone(),
            tty: self.config.tty,
            memory: self.config.memory,
            rootfs: self.image.rootfs.clone(),
            mounts: build_mount_spec(&self.config),
            network: self.config.network.as_ref().map(build_network_spec),
        }
    }

    /// Record the terminal state, then release every waiter.
    pub(crate) async fn finish(&self, exit_code: i32) {
        if let Err(e) = self.state.write().mark_exited(exit_code) {
            tracing::warn!(container_id = %self.short_id(), error = %e, "unexpected exit transition");
        }
        self.signals.lock().take();
        self.persist_state().await;
        self.exited.send_replace(true);

        tracing::info!(container_id = %self.short_id(), exit_code, "container exited");
    }

    pub(crate) fn persisted_config(&self) -> PersistedConfig {
        PersistedConfig {
            id: self.id.clone(),
            config: self.config.clone(),
            image: self.image.clone(),
        }
    }

    /// Best effort: a failed write is logged, never fatal to the lifecycle.
    async fn persist_state(&self) {
        let state = self.state();
        let path = self.layout.state_path();
        let result = match serde_json::to_vec_pretty(&state) {
            Ok(bytes) => tokio::fs::write(&path, bytes).await.map_err(SkiffError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(
                container_id = %self.short_id(),
                path = %path.display(),
                error = %e,
                "failed to persist container state"
            );
        }
    }
}
