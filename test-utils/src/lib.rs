//! Shared fixtures for skiff integration tests.

use skiff::{Runtime, RuntimeOptions};
use std::future::Future;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};

/// Image every test runtime provides.
pub const TEST_IMAGE: &str = "base";

/// A runtime on a throwaway home that already holds [`TEST_IMAGE`].
pub struct TestRuntime {
    pub runtime: Runtime,
    home: TempDir,
}

impl TestRuntime {
    pub async fn new() -> Self {
        let home = TempDir::new().expect("failed to create temp home");
        Self::open_at(home).await
    }

    /// Open on an existing home, e.g. to exercise restore.
    pub async fn open_at(home: TempDir) -> Self {
        std::fs::create_dir_all(home.path().join("images").join(TEST_IMAGE))
            .expect("failed to create test image");
        let options = RuntimeOptions {
            stop_timeout: Duration::from_secs(5),
            ..RuntimeOptions::with_home(home.path())
        };
        let runtime = Runtime::open(options)
            .await
            .expect("failed to open runtime");
        Self { runtime, home }
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    /// Drop the runtime (releasing its lock) but keep the home.
    pub fn into_home(self) -> TempDir {
        self.home
    }
}

/// Await `fut`, failing the test with `msg` if it takes longer than `limit`.
pub async fn with_timeout<F: Future>(msg: &str, limit: Duration, fut: F) -> F::Output {
    match tokio::time::timeout(limit, fut).await {
        Ok(output) => output,
        Err(_) => panic!("{}", msg),
    }
}

/// Two in-memory duplex pairs standing in for a client connection.
pub struct ClientPipes {
    /// What the client types; handed to the command as its input.
    pub stdin_writer: DuplexStream,
    pub stdin_reader: DuplexStream,
    /// Where the command writes; the client reads it back.
    pub stdout_writer: DuplexStream,
    pub stdout_reader: DuplexStream,
}

pub fn client_pipes() -> ClientPipes {
    let (stdin_writer, stdin_reader) = tokio::io::duplex(64 * 1024);
    let (stdout_writer, stdout_reader) = tokio::io::duplex(64 * 1024);
    ClientPipes {
        stdin_writer,
        stdin_reader,
        stdout_writer,
        stdout_reader,
    }
}

/// Write `input` `count` times, reading one line back after each write and
/// comparing it (trimmed) to `expected`.
pub async fn assert_pipe<R, W>(
    input: &str,
    expected: &str,
    reader: &mut BufReader<R>,
    writer: &mut W,
    count: usize,
) -> Result<(), String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for i in 0..count {
        writer
            .write_all(input.as_bytes())
            .await
            .map_err(|e| format!("write {} failed: {}", i, e))?;
        writer
            .flush()
            .await
            .map_err(|e| format!("flush {} failed: {}", i, e))?;
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| format!("read {} failed: {}", i, e))?;
        if line.trim_matches(|c| c == ' ' || c == '\r' || c == '\n') != expected {
            return Err(format!(
                "unexpected output: expected [{}], received [{}]",
                expected, line
            ));
        }
    }
    Ok(())
}

/// Whether this host lets an unprivileged child enter a new UTS namespace,
/// which `-h/--hostname` needs.
pub fn hostname_isolation_available() -> bool {
    let mut flags = libc::CLONE_NEWUTS;
    // SAFETY: geteuid has no preconditions.
    if unsafe { libc::geteuid() } != 0 {
        flags |= libc::CLONE_NEWUSER;
    }
    let mut cmd = std::process::Command::new("true");
    // SAFETY: unshare is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            if libc::unshare(flags) == 0 {
                Ok(())
            } else {
                Err(std::io::Error::last_os_error())
            }
        });
    }
    cmd.status().map(|s| s.success()).unwrap_or(false)
}
