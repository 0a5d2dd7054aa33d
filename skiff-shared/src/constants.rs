//! Shared constants between the daemon and its clients.

/// Container identity constants
pub mod container {
    /// Random bytes behind a container id (hex encoded to 64 chars)
    pub const ID_BYTES: usize = 32;

    /// Length of the short id printed by `run -d` and `ps`
    pub const SHORT_ID_LEN: usize = 12;

    /// Exit code recorded before a container has exited
    pub const UNKNOWN_EXIT_CODE: i32 = -1;

    /// Base added to a signal number when a process dies from a signal
    pub const SIGNAL_EXIT_BASE: i32 = 128;
}

/// Standard stream names, as used by `run -a` and the log store
pub mod streams {
    pub const STDIN: &str = "stdin";
    pub const STDOUT: &str = "stdout";
    pub const STDERR: &str = "stderr";
}

/// Timeouts
pub mod timeouts {
    /// How long `rm`/shutdown waits for a killed container to exit
    pub const STOP_TIMEOUT_SECS: u64 = 10;

    /// How long the monitor lets output pumps drain after exit
    pub const DRAIN_TIMEOUT_MILLIS: u64 = 2000;
}

/// Environment variables
pub mod envs {
    /// Overrides the runtime home directory (default `~/.skiff`)
    pub const SKIFF_HOME: &str = "SKIFF_HOME";

    /// Overrides the daemon address (`unix://...` or `tcp://host:port`)
    pub const SKIFF_HOST: &str = "SKIFF_HOST";
}

/// Daemon socket
pub mod daemon {
    /// Socket file name inside the home directory
    pub const SOCKET_NAME: &str = "skiff.sock";

    /// Daemon log file name inside `<home>/logs`
    pub const LOG_FILE_NAME: &str = "skiffd.log";
}
