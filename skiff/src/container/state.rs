//! Container lifecycle status and state machine.
//!
//! Defines the possible states of a container and valid transitions between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skiff_shared::constants::container::UNKNOWN_EXIT_CODE;
use skiff_shared::errors::{SkiffError, SkiffResult};

/// Lifecycle status of a container.
///
/// ```text
/// create() → Created (config persisted, no process)
/// start()  → Running (process launched, monitor armed)
/// exit     → Exited  (process reaped, exit code recorded)
/// ```
///
/// Exited is terminal: a new run needs a fresh container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Exited,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    pub fn is_exited(&self) -> bool {
        matches!(self, ContainerStatus::Exited)
    }

    /// Only a never-started container can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, ContainerStatus::Created)
    }

    /// Signals are only delivered to a live process.
    pub fn can_kill(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    pub fn can_remove(&self) -> bool {
        !self.is_running()
    }

    pub fn can_transition_to(&self, target: ContainerStatus) -> bool {
        use ContainerStatus::*;
        matches!((self, target), (Created, Running) | (Running, Exited))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Exited => "exited",
        }
    }
}

impl std::str::FromStr for ContainerStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ContainerStatus::Created),
            "running" => Ok(ContainerStatus::Running),
            "exited" => Ok(ContainerStatus::Exited),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable container state. Written only by start and the process monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub status: ContainerStatus,
    /// Only meaningful once `status` is `Exited`.
    pub exit_code: i32,
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl State {
    pub fn new() -> Self {
        Self {
            status: ContainerStatus::Created,
            exit_code: UNKNOWN_EXIT_CODE,
            pid: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn running(&self) -> bool {
        self.status.is_running()
    }

    pub fn transition_to(&mut self, new_status: ContainerStatus) -> SkiffResult<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(SkiffError::InvalidState(format!(
                "cannot transition from {} to {}",
                self.status, new_status
            )));
        }
        self.status = new_status;
        Ok(())
    }

    pub fn mark_running(&mut self, pid: Option<u32>) -> SkiffResult<()> {
        self.transition_to(ContainerStatus::Running)?;
        self.pid = pid;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_exited(&mut self, exit_code: i32) -> SkiffResult<()> {
        self.transition_to(ContainerStatus::Exited)?;
        self.exit_code = exit_code;
        self.pid = None;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Reset state loaded from disk after the owning runtime restarted.
    ///
    /// No process survives a restart, so a container recorded as running
    /// becomes exited with an unknown exit code.
    pub fn reset_for_restore(&mut self) {
        if self.status.is_running() {
            self.status = ContainerStatus::Exited;
            self.exit_code = UNKNOWN_EXIT_CODE;
            self.finished_at = Some(Utc::now());
        }
        self.pid = None;
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_can_start() {
        assert!(ContainerStatus::Created.can_start());
        assert!(!ContainerStatus::Running.can_start());
        assert!(!ContainerStatus::Exited.can_start());
    }

    #[test]
    fn test_status_can_kill() {
        assert!(!ContainerStatus::Created.can_kill());
        assert!(ContainerStatus::Running.can_kill());
        assert!(!ContainerStatus::Exited.can_kill());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(ContainerStatus::Created.can_transition_to(ContainerStatus::Running));
        assert!(!ContainerStatus::Created.can_transition_to(ContainerStatus::Exited));
        assert!(ContainerStatus::Running.can_transition_to(ContainerStatus::Exited));
        assert!(!ContainerStatus::Running.can_transition_to(ContainerStatus::Created));

        // Exited is terminal
        assert!(!ContainerStatus::Exited.can_transition_to(ContainerStatus::Running));
        assert!(!ContainerStatus::Exited.can_transition_to(ContainerStatus::Created));
    }

    #[test]
    fn test_state_lifecycle() {
        let mut state = State::new();
        assert_eq!(state.status, ContainerStatus::Created);
        assert_eq!(state.exit_code, UNKNOWN_EXIT_CODE);

        state.mark_running(Some(4242)).unwrap();
        assert!(state.running());
        assert_eq!(state.pid, Some(4242));
        assert!(state.started_at.is_some());

        state.mark_exited(1).unwrap();
        assert!(!state.running());
        assert_eq!(state.exit_code, 1);
        assert_eq!(state.pid, None);
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn test_exit_is_recorded_once() {
        let mut state = State::new();
        state.mark_running(None).unwrap();
        state.mark_exited(0).unwrap();

        assert!(state.mark_exited(2).is_err());
        assert_eq!(state.exit_code, 0);
        assert!(state.mark_running(Some(1)).is_err());
    }

    #[test]
    fn test_reset_for_restore() {
        let mut state = State::new();
        state.mark_running(Some(12345)).unwrap();

        state.reset_for_restore();
        assert_eq!(state.status, ContainerStatus::Exited);
        assert_eq!(state.exit_code, UNKNOWN_EXIT_CODE);
        assert_eq!(state.pid, None);

        let mut created = State::new();
        created.reset_for_restore();
        assert_eq!(created.status, ContainerStatus::Created);
    }

    #[test]
    fn test_status_round_trip_str() {
        for status in [
            ContainerStatus::Created,
            ContainerStatus::Running,
            ContainerStatus::Exited,
        ] {
            assert_eq!(status.as_str().parse(), Ok(status));
        }
        assert!("stopped".parse::<ContainerStatus>().is_err());
    }
}
