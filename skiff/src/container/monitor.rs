//! Process monitor.
//!
//! One monitor per started process. It owns the only wait on the child and
//! is the only place that delivers signals to it, so a signal can never hit
//! a reaped (and possibly reused) pid.

use super::Container;
use crate::logs::LogWriter;
use crate::util::{Closeable, close_all};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use skiff_shared::constants::container::{SIGNAL_EXIT_BASE, UNKNOWN_EXIT_CODE};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

pub(crate) struct Monitor {
    container: Arc<Container>,
    child: Child,
    signals: UnboundedReceiver<Signal>,
    /// Output pumps; they end at EOF once the process is gone.
    pumps: Vec<JoinHandle<()>>,
    logs: Vec<Arc<LogWriter>>,
    drain_timeout: Duration,
}

impl Monitor {
    pub(crate) fn new(
        container: Arc<Container>,
        child: Child,
        signals: UnboundedReceiver<Signal>,
        pumps: Vec<JoinHandle<()>>,
        logs: Vec<Arc<LogWriter>>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            container,
            child,
            signals,
            pumps,
            logs,
            drain_timeout,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let pid = self.child.id();
        let short_id = self.container.short_id().to_string();

        let status = loop {
            tokio::select! {
                status = self.child.wait() => break status,
                Some(signal) = self.signals.recv() => deliver(pid, signal, &short_id),
            }
        };

        let exit_code = match status {
            Ok(status) => exit_code(status),
            Err(e) => {
                tracing::error!(container_id = %short_id, error = %e, "failed to wait for container process");
                UNKNOWN_EXIT_CODE
            }
        };
        tracing::debug!(container_id = %short_id, exit_code, "container process exited");

        // Output written just before exit is still in flight
        let aborts: Vec<_> = self.pumps.iter().map(|p| p.abort_handle()).collect();
        let drained = tokio::time::timeout(
            self.drain_timeout,
            futures::future::join_all(std::mem::take(&mut self.pumps)),
        )
        .await;
        if drained.is_err() {
            tracing::warn!(
                container_id = %short_id,
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "output still open after exit, abandoning it"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        let logs: Vec<&dyn Closeable> = self.logs.iter().map(|l| &**l as &dyn Closeable).collect();
        if let Err(e) = close_all(&logs).await {
            tracing::warn!(container_id = %short_id, error = %e, "failed to close container logs");
        }

        self.container.pipes().release();
        self.container.finish(exit_code).await;
    }
}

fn deliver(pid: Option<u32>, signal: Signal, short_id: &str) {
    let Some(pid) = pid else {
        return;
    };
    match nix::sys::signal::kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => tracing::debug!(container_id = %short_id, pid, %signal, "signal delivered"),
        // Already gone; the wait branch will observe the exit
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => {
            tracing::warn!(container_id = %short_id, pid, %signal, error = %e, "failed to signal container")
        }
    }
}

/// Exit code as a shell reports it: the status, or 128 + signal number.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => SIGNAL_EXIT_BASE + signal,
        (None, None) => UNKNOWN_EXIT_CODE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code() {
        // Raw wait statuses: exit code in the high byte, signal in the low bits
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(1 << 8)), 1);
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
        assert_eq!(exit_code(ExitStatus::from_raw(15)), 143);
    }
}
