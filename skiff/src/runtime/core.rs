//! Runtime registry: owns the live containers of one home directory.

use crate::container::{Container, ContainerConfig, ContainerDeps, ContainerId, PersistedConfig, State};
use crate::executor::{Executor, HostExecutor};
use crate::images::{ImageStore, LocalImageStore};
use crate::logs::{FileLogStore, LogStore};
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::lock::RuntimeLock;
use crate::runtime::options::RuntimeOptions;
use parking_lot::RwLock;
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Container registry and lifecycle owner.
///
/// Cheaply cloneable; clones share the same registry. Only one runtime can
/// use a given home directory at a time.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    containers: RwLock<HashMap<ContainerId, Arc<Container>>>,
    layout: FilesystemLayout,
    options: RuntimeOptions,
    images: Arc<dyn ImageStore>,
    deps: ContainerDeps,
    lock: RuntimeLock,
}

impl Runtime {
    /// Open the runtime at `options.home_dir` with the host executor and
    /// file-backed images and logs, restoring persisted containers.
    ///
    /// # Errors
    ///
    /// Same as [`with_components`](Self::with_components).
    pub async fn open(options: RuntimeOptions) -> SkiffResult<Self> {
        let layout = FilesystemLayout::new(options.home_dir.clone());
        let images = Arc::new(LocalImageStore::new(layout.images_dir()));
        let logs = Arc::new(FileLogStore::new(layout.containers_dir()));
        Self::with_components(options, images, logs, Arc::new(HostExecutor::new())).await
    }

    /// **Custom Collaborators**: open a runtime with caller-supplied image
    /// store, log store and executor. Tests use this to swap in fakes.
    ///
    /// Containers found under the home directory are restored; any that
    /// were running when the previous runtime died come back `Exited` with
    /// exit code -1.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `home_dir` is not absolute (`Config`)
    /// - The home directory cannot be created
    /// - Another runtime holds the home lock (`AlreadyExists`)
    pub async fn with_components(
        options: RuntimeOptions,
        images: Arc<dyn ImageStore>,
        log_store: Arc<dyn LogStore>,
        executor: Arc<dyn Executor>,
    ) -> SkiffResult<Self> {
        if !options.home_dir.is_absolute() {
            return Err(SkiffError::Config(format!(
                "home_dir must be absolute path, got: {}",
                options.home_dir.display()
            )));
        }

        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare()?;
        let lock = RuntimeLock::acquire(layout.home_dir())?;

        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                containers: RwLock::new(HashMap::new()),
                deps: ContainerDeps {
                    log_store,
                    executor,
                    drain_timeout: options.drain_timeout,
                },
                layout,
                options,
                images,
                lock,
            }),
        };
        runtime.restore().await;

        tracing::debug!(
            home = %runtime.inner.layout.home_dir().display(),
            lock = %runtime.inner.lock.path().display(),
            containers = runtime.inner.containers.read().len(),
            "initialized runtime"
        );
        Ok(runtime)
    }

    /// On-disk layout of this runtime's home directory.
    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    /// Allocate and register a container. It is not started.
    ///
    /// The container's directory and `config.json` are written before it
    /// becomes visible to [`get`](Self::get) and [`list`](Self::list).
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configuration is invalid (`Config`)
    /// - The image is unknown (`Image`)
    /// - The container directory cannot be written
    pub async fn create(&self, config: ContainerConfig) -> SkiffResult<Arc<Container>> {
        config.validate()?;
        let image = self.inner.images.resolve(&config.image).await?;

        let id = loop {
            let id = ContainerId::generate();
            if !self.inner.containers.read().contains_key(&id) {
                break id;
            }
        };

        let layout = self.inner.layout.container_layout(id.as_str());
        layout.prepare()?;
        let container = Container::new(
            id.clone(),
            config,
            image,
            State::new(),
            layout.clone(),
            self.inner.deps.clone(),
        );

        let persisted = serde_json::to_vec_pretty(&container.persisted_config())?;
        let state = serde_json::to_vec_pretty(&container.state())?;
        let written = async {
            tokio::fs::write(layout.config_path(), persisted).await?;
            tokio::fs::write(layout.state_path(), state).await
        }
        .await;
        if let Err(e) = written {
            let _ = layout.cleanup();
            return Err(SkiffError::Storage(format!(
                "failed to persist container {}: {}",
                id.short(),
                e
            )));
        }

        self.inner
            .containers
            .write()
            .insert(id.clone(), Arc::clone(&container));

        tracing::debug!(
            container_id = %id.short(),
            image = %container.image().name,
            image_id = %container.image().short_id(),
            cmd = ?container.config().cmd,
            "Created container"
        );
        Ok(container)
    }

    /// Look up by full id or by a unique id prefix.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `id_or_prefix` is empty or matches several containers (`InvalidArgument`)
    /// - Nothing matches (`NotFound`)
    pub fn get(&self, id_or_prefix: &str) -> SkiffResult<Arc<Container>> {
        if id_or_prefix.is_empty() {
            return Err(SkiffError::InvalidArgument("empty container id".into()));
        }
        let containers = self.inner.containers.read();
        if let Ok(id) = ContainerId::parse(id_or_prefix)
            && let Some(container) = containers.get(&id)
        {
            return Ok(Arc::clone(container));
        }

        let mut matches = containers
            .iter()
            .filter(|(id, _)| id.starts_with(id_or_prefix))
            .map(|(_, c)| c);
        match (matches.next(), matches.next()) {
            (Some(container), None) => Ok(Arc::clone(container)),
            (None, _) => Err(SkiffError::NotFound(format!(
                "no such container: {id_or_prefix}"
            ))),
            (Some(_), Some(_)) => Err(SkiffError::InvalidArgument(format!(
                "container id prefix '{id_or_prefix}' is ambiguous"
            ))),
        }
    }

    /// Snapshot of every registered container, newest first.
    pub fn list(&self) -> Vec<Arc<Container>> {
        let mut containers: Vec<_> = self.inner.containers.read().values().cloned().collect();
        containers.sort_by(|a, b| {
            b.state()
                .created_at
                .cmp(&a.state().created_at)
                .then_with(|| a.id().cmp(b.id()))
        });
        containers
    }

    /// Stop the container if needed, unregister it and delete its files.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The process outlives the stop timeout after SIGKILL (`Timeout`)
    /// - Its logs or directory cannot be removed
    pub async fn destroy(&self, container: &Arc<Container>) -> SkiffResult<()> {
        if container.is_running() {
            container.kill()?;
            container
                .wait_timeout(self.inner.options.stop_timeout)
                .await?;
        }

        self.inner.containers.write().remove(container.id());
        self.inner.deps.log_store.remove(container.id()).await?;
        container.layout().cleanup()?;

        tracing::info!(container_id = %container.short_id(), "Destroyed container");
        Ok(())
    }

    /// Kill every running container and wait for each to exit.
    ///
    /// Created and exited containers are left alone.
    ///
    /// # Errors
    ///
    /// Returns `AggregateClose` with one entry per container that failed to
    /// stop in time; the others are still stopped.
    pub async fn shutdown(&self) -> SkiffResult<()> {
        let running: Vec<_> = self
            .list()
            .into_iter()
            .filter(|c| c.is_running())
            .collect();
        if running.is_empty() {
            return Ok(());
        }
        tracing::info!(count = running.len(), "Stopping running containers");

        let stop_timeout = self.inner.options.stop_timeout;
        let results = futures::future::join_all(running.iter().map(|container| async move {
            container.kill()?;
            container.wait_timeout(stop_timeout).await.map(|_| ())
        }))
        .await;

        SkiffError::aggregate(results.into_iter().filter_map(Result::err).collect())
    }

    /// Load containers persisted by a previous runtime on this home.
    async fn restore(&self) {
        let containers_dir = self.inner.layout.containers_dir();
        let mut entries = match tokio::fs::read_dir(&containers_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %containers_dir.display(), error = %e, "cannot scan containers");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.restore_one(&name).await {
                Ok(container) => {
                    tracing::debug!(
                        container_id = %container.short_id(),
                        status = %container.state().status,
                        "Restored container"
                    );
                    self.inner
                        .containers
                        .write()
                        .insert(container.id().clone(), container);
                }
                Err(e) => tracing::warn!(entry = %name, error = %e, "skipping unreadable container"),
            }
        }
    }

    async fn restore_one(&self, name: &str) -> SkiffResult<Arc<Container>> {
        let id = ContainerId::parse(name)?;
        let layout = self.inner.layout.container_layout(id.as_str());

        let persisted: PersistedConfig =
            serde_json::from_slice(&tokio::fs::read(layout.config_path()).await?)?;
        if persisted.id != id {
            return Err(SkiffError::Storage(format!(
                "config.json belongs to {}",
                persisted.id.short()
            )));
        }

        let mut state: State = match tokio::fs::read(layout.state_path()).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::new(),
            Err(e) => return Err(e.into()),
        };
        let was_running = state.running();
        state.reset_for_restore();
        if was_running {
            tokio::fs::write(layout.state_path(), serde_json::to_vec_pretty(&state)?).await?;
        }

        Ok(Container::new(
            id,
            persisted.config,
            persisted.image,
            state,
            layout,
            self.inner.deps.clone(),
        ))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("home_dir", &self.inner.layout.home_dir())
            .field("containers", &self.inner.containers.read().len())
            .finish()
    }
}
