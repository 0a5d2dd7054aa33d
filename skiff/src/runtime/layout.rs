use skiff_shared::constants::daemon::SOCKET_NAME;
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::path::{Path, PathBuf};

/// Directory structure constants
pub mod dirs {
    /// Base directory name under the user's home
    pub const SKIFF_DIR: &str = ".skiff";

    /// Subdirectory holding one directory per container
    pub const CONTAINERS_DIR: &str = "containers";

    /// Subdirectory holding one rootfs directory per image name
    pub const IMAGES_DIR: &str = "images";

    /// Subdirectory for daemon log files
    pub const LOGS_DIR: &str = "logs";

    pub const CONFIG_FILE: &str = "config.json";

    pub const STATE_FILE: &str = "state.json";
}

/// Filesystem layout under the runtime home.
///
/// ```text
/// ~/.skiff/
/// ├── containers/{id}/    # ContainerLayout
/// ├── images/{name}/      # image rootfs directories
/// ├── logs/               # daemon logs
/// └── skiff.sock          # daemon socket
/// ```
#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::CONTAINERS_DIR)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::IMAGES_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS_DIR)
    }

    /// Default daemon socket: ~/.skiff/skiff.sock
    pub fn socket_path(&self) -> PathBuf {
        self.home_dir.join(SOCKET_NAME)
    }

    /// Initialize the filesystem structure.
    pub fn prepare(&self) -> SkiffResult<()> {
        std::fs::create_dir_all(&self.home_dir)
            .map_err(|e| SkiffError::Storage(format!("failed to create home: {e}")))?;

        std::fs::create_dir_all(self.containers_dir())
            .map_err(|e| SkiffError::Storage(format!("failed to create containers dir: {e}")))?;

        std::fs::create_dir_all(self.images_dir())
            .map_err(|e| SkiffError::Storage(format!("failed to create images dir: {e}")))?;

        std::fs::create_dir_all(self.logs_dir())
            .map_err(|e| SkiffError::Storage(format!("failed to create logs dir: {e}")))?;

        Ok(())
    }

    pub fn container_layout(&self, id: &str) -> ContainerLayout {
        ContainerLayout::new(self.containers_dir().join(id))
    }
}

/// Per-container directory: `config.json`, `state.json` and the stream logs.
#[derive(Clone, Debug)]
pub struct ContainerLayout {
    container_dir: PathBuf,
}

impl ContainerLayout {
    pub fn new(container_dir: PathBuf) -> Self {
        Self { container_dir }
    }

    pub fn root(&self) -> &Path {
        &self.container_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.container_dir.join(dirs::CONFIG_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.container_dir.join(dirs::STATE_FILE)
    }

    pub fn prepare(&self) -> SkiffResult<()> {
        std::fs::create_dir_all(&self.container_dir)
            .map_err(|e| SkiffError::Storage(format!("failed to create container dir: {e}")))
    }

    pub fn cleanup(&self) -> SkiffResult<()> {
        if self.container_dir.exists() {
            std::fs::remove_dir_all(&self.container_dir).map_err(|e| {
                SkiffError::Storage(format!("failed to cleanup container dir: {e}"))
            })?;
        }
        Ok(())
    }
}
