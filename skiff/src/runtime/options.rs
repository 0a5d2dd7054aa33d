//! Runtime configuration.

use crate::runtime::layout::dirs as const_dirs;
use dirs::home_dir;
use skiff_shared::constants::envs as const_envs;
use skiff_shared::constants::timeouts;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    /// Root of all runtime state (`$SKIFF_HOME`, default `~/.skiff`).
    pub home_dir: PathBuf,
    /// How long destroy/shutdown waits for a killed container to exit.
    pub stop_timeout: Duration,
    /// How long the monitor waits for output to drain after exit.
    pub drain_timeout: Duration,
}

impl RuntimeOptions {
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let home_dir = std::env::var(const_envs::SKIFF_HOME)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
                path.push(const_dirs::SKIFF_DIR);
                path
            });

        Self {
            home_dir,
            stop_timeout: Duration::from_secs(timeouts::STOP_TIMEOUT_SECS),
            drain_timeout: Duration::from_millis(timeouts::DRAIN_TIMEOUT_MILLIS),
        }
    }
}
