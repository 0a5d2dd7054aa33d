//! Error types shared by the engine, the daemon and the CLI.
//!
//! Errors are grouped by how a caller is expected to react:
//! - [`SkiffError::Launch`]: the process could not be created, the container stays `Created`
//! - [`SkiffError::Timeout`]: an observation deadline elapsed, retrying is fine
//! - [`SkiffError::PipeClosed`]: expected end of a stream, never reported to users
//! - [`SkiffError::AggregateClose`]: one or more cleanup closes failed

use std::io;
use thiserror::Error;

/// Result alias used across skiff crates.
pub type SkiffResult<T> = Result<T, SkiffError>;

#[derive(Debug, Error)]
pub enum SkiffError {
    /// The container process could not be created.
    #[error("launch failed: {0}")]
    Launch(String),

    /// A wait deadline elapsed before the container exited.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The other end of a pipe went away.
    #[error("pipe closed")]
    PipeClosed,

    /// Every close was attempted; these are the ones that failed.
    #[error("{} close error(s): {}", .0.len(), join_errors(.0))]
    AggregateClose(Vec<SkiffError>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Operation not permitted in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config: {0}")]
    Config(String),

    #[error("image: {0}")]
    Image(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl SkiffError {
    /// True for the errors that mean "the stream ended", as opposed to a real failure.
    ///
    /// Copy loops treat these as a normal termination signal.
    pub fn is_pipe_closed(&self) -> bool {
        match self {
            SkiffError::PipeClosed => true,
            SkiffError::Io(err) => is_pipe_closed_io(err),
            _ => false,
        }
    }

    /// Collapse a list of close failures into a single result.
    pub fn aggregate(errors: Vec<SkiffError>) -> SkiffResult<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SkiffError::AggregateClose(errors))
        }
    }
}

/// Same classification as [`SkiffError::is_pipe_closed`] for raw io errors.
pub fn is_pipe_closed_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

fn join_errors(errors: &[SkiffError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_closed_classification() {
        assert!(SkiffError::PipeClosed.is_pipe_closed());
        assert!(SkiffError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_pipe_closed());
        assert!(SkiffError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)).is_pipe_closed());
        assert!(!SkiffError::Io(io::Error::from(io::ErrorKind::PermissionDenied)).is_pipe_closed());
        assert!(!SkiffError::Launch("no such file".into()).is_pipe_closed());
    }

    #[test]
    fn test_aggregate_keeps_every_error() {
        assert!(SkiffError::aggregate(Vec::new()).is_ok());

        let err = SkiffError::aggregate(vec![
            SkiffError::Internal("first".into()),
            SkiffError::Storage("second".into()),
        ])
        .unwrap_err();

        match &err {
            SkiffError::AggregateClose(inner) => assert_eq!(inner.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("2 close error(s)"));
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
    }
}
