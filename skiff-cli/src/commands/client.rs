use crate::cli::GlobalFlags;
use nix::sys::termios::{self, SetArg, Termios};
use std::io::IsTerminal;
use std::os::fd::AsFd;

/// Forward `args` to the daemon with this process's stdin and stdout.
///
/// Returns the exit code the process should exit with.
pub async fn execute(args: Vec<String>, tty: bool, global: &GlobalFlags) -> anyhow::Result<i32> {
    let transport = global.transport()?;
    tracing::debug!(uri = %transport.to_uri(), ?args, "forwarding command");

    let _raw = if tty { RawMode::enable() } else { None };
    let code = skiff::server::run_remote(
        &transport,
        args,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await?;
    Ok(code)
}

/// Puts the local terminal in raw mode while a `-t` session runs.
struct RawMode {
    original: Termios,
}

impl RawMode {
    fn enable() -> Option<Self> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return None;
        }
        let original = termios::tcgetattr(stdin.as_fd()).ok()?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        if let Err(e) = termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw) {
            tracing::debug!(error = %e, "cannot switch terminal to raw mode");
            return None;
        }
        Some(Self { original })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(std::io::stdin().as_fd(), SetArg::TCSANOW, &self.original);
    }
}
