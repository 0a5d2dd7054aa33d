//! Host executor: runs the container command as a direct child process.

use super::{Executor, LaunchSpec, SpawnedProcess};
use async_trait::async_trait;
use nix::sched::{CloneFlags, unshare};
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Terminal size given to a new pseudo-terminal.
const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

/// Spawns processes on the host.
///
/// - hostname: applied in a fresh UTS namespace (plus a user namespace when
///   not running as root)
/// - memory: enforced as an address-space rlimit
/// - rootfs, mounts and network: passed through, not applied
#[derive(Debug, Default, Clone, Copy)]
pub struct HostExecutor;

impl HostExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for HostExecutor {
    async fn spawn(&self, spec: &LaunchSpec) -> SkiffResult<SpawnedProcess> {
        tracing::debug!(
            container_id = %spec.container_id,
            program = %spec.program,
            tty = spec.tty,
            rootfs = %spec.rootfs.display(),
            mounts = spec.mounts.mounts.len(),
            network = ?spec.network.as_ref().map(|n| n.network_type.as_str()),
            "Spawning container process"
        );
        if spec.tty {
            spawn_with_pty(spec)
        } else {
            spawn_with_pipes(spec)
        }
    }
}

fn command(spec: &LaunchSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .env_clear()
        .env("PATH", DEFAULT_PATH)
        .kill_on_drop(true);
    if let Some(hostname) = &spec.hostname {
        cmd.env("HOSTNAME", hostname);
    }
    if spec.tty {
        cmd.env("TERM", "xterm");
    }
    cmd.envs(&spec.env);
    cmd.current_dir(spec.working_dir.as_deref().unwrap_or(Path::new("/")));
    install_limits(&mut cmd, spec);
    cmd
}

/// Hostname and memory limit are applied in the child between fork and exec.
fn install_limits(cmd: &mut Command, spec: &LaunchSpec) {
    let hostname = spec.hostname.clone();
    let memory = spec.memory;
    if hostname.is_none() && memory.is_none() {
        return;
    }
    let rootless = !nix::unistd::geteuid().is_root();

    unsafe {
        cmd.pre_exec(move || {
            if let Some(limit) = memory {
                let rlimit = libc::rlimit {
                    rlim_cur: limit as libc::rlim_t,
                    rlim_max: limit as libc::rlim_t,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &rlimit) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            if let Some(name) = &hostname {
                let mut flags = CloneFlags::CLONE_NEWUTS;
                if rootless {
                    flags |= CloneFlags::CLONE_NEWUSER;
                }
                unshare(flags)?;
                nix::unistd::sethostname(name)?;
            }
            Ok(())
        });
    }
}

fn launch_error(spec: &LaunchSpec, err: io::Error) -> SkiffError {
    SkiffError::Launch(format!("failed to spawn '{}': {}", spec.program, err))
}

/// Spawn process with pipes (standard mode).
fn spawn_with_pipes(spec: &LaunchSpec) -> SkiffResult<SpawnedProcess> {
    let mut cmd = command(spec);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| launch_error(spec, e))?;

    let missing = |name: &str| SkiffError::Launch(format!("{name} was not captured"));
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    Ok(SpawnedProcess {
        child,
        stdin: Box::new(stdin),
        stdout: Box::new(stdout),
        stderr: Some(Box::new(stderr)),
    })
}

/// Spawn process with a pseudo-terminal (tty mode).
///
/// stdout and stderr both arrive on the terminal, so there is no separate
/// stderr stream.
fn spawn_with_pty(spec: &LaunchSpec) -> SkiffResult<SpawnedProcess> {
    use nix::pty::{OpenptyResult, Winsize, openpty};

    let winsize = Winsize {
        ws_row: DEFAULT_ROWS,
        ws_col: DEFAULT_COLS,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let OpenptyResult { master, slave } = openpty(Some(&winsize), None)
        .map_err(|e| SkiffError::Launch(format!("failed to create pty: {e}")))?;

    let slave_stdio = || -> SkiffResult<Stdio> {
        let fd = slave
            .try_clone()
            .map_err(|e| SkiffError::Launch(format!("failed to dup pty: {e}")))?;
        Ok(Stdio::from(fd))
    };

    let mut cmd = command(spec);
    cmd.stdin(slave_stdio()?)
        .stdout(slave_stdio()?)
        .stderr(slave_stdio()?);

    // New session with the terminal (now fd 0) as controlling tty
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()?;
            if libc::ioctl(0, libc::TIOCSCTTY, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|e| launch_error(spec, e))?;

    // The parent must not keep the slave open, or reads never see EOF/EIO
    drop(cmd);
    drop(slave);

    let master = std::fs::File::from(master);
    let reader = master
        .try_clone()
        .map_err(|e| SkiffError::Launch(format!("failed to dup pty master: {e}")))?;

    Ok(SpawnedProcess {
        child,
        stdin: Box::new(tokio::fs::File::from_std(master)),
        stdout: Box::new(tokio::fs::File::from_std(reader)),
        stderr: None,
    })
}
