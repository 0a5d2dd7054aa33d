#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const TEST_IMAGE: &str = "base";

pub struct TestContext {
    pub cmd: Command,
    pub home: TempDir,
    daemon: Option<Child>,
}

impl TestContext {
    /// A fresh command pointed at this context's home.
    pub fn new_cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_skiff"));
        cmd.timeout(Duration::from_secs(30));
        cmd.arg("--home").arg(self.home.path());
        cmd.env_remove("SKIFF_HOST");
        cmd
    }

    pub fn home_path(&self) -> &Path {
        self.home.path()
    }

    pub fn socket_path(&self) -> PathBuf {
        self.home.path().join("skiff.sock")
    }

    /// Start a daemon on this home and wait for its socket.
    pub fn start_daemon(&mut self) {
        let child = std::process::Command::new(env!("CARGO_BIN_EXE_skiff"))
            .arg("--home")
            .arg(self.home.path())
            .arg("daemon")
            .env_remove("SKIFF_HOST")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn daemon");
        self.daemon = Some(child);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.socket_path().exists() {
            assert!(Instant::now() < deadline, "daemon socket never appeared");
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(mut daemon) = self.daemon.take() {
            let _ = daemon.kill();
            let _ = daemon.wait();
        }
    }
}

/// Context with an isolated home that already holds the test image.
pub fn skiff() -> TestContext {
    let home = TempDir::new().expect("failed to create temp home");
    std::fs::create_dir_all(home.path().join("images").join(TEST_IMAGE))
        .expect("failed to create test image");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_skiff"));
    cmd.timeout(Duration::from_secs(30));
    cmd.arg("--home").arg(home.path());
    cmd.env_remove("SKIFF_HOST");

    TestContext {
        cmd,
        home,
        daemon: None,
    }
}
