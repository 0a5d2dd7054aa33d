//! Append-only container output logs.
//!
//! Every chunk a container writes to stdout/stderr is appended to its log,
//! so a client that attaches late can replay earlier output with
//! [`LogStore::read_log`].

use crate::container::ContainerId;
use crate::util::Closeable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skiff_shared::constants::streams;
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Replayable view of a log stream.
pub type LogReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => streams::STDOUT,
            LogStream::Stderr => streams::STDERR,
        }
    }

    fn file_name(&self) -> String {
        format!("{}.log", self.as_str())
    }
}

impl std::str::FromStr for LogStream {
    type Err = SkiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            streams::STDOUT => Ok(LogStream::Stdout),
            streams::STDERR => Ok(LogStream::Stderr),
            other => Err(SkiffError::InvalidArgument(format!(
                "unknown log stream '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write side of one log stream. Closing flushes and releases the sink.
pub struct LogWriter {
    stream: LogStream,
    inner: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl LogWriter {
    pub fn new(stream: LogStream, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            stream,
            inner: Mutex::new(Some(Box::new(writer))),
        }
    }

    /// A writer that discards everything.
    pub fn discard(stream: LogStream) -> Self {
        Self::new(stream, tokio::io::sink())
    }

    pub fn stream(&self) -> LogStream {
        self.stream
    }

    pub async fn append(&self, data: &[u8]) -> SkiffResult<()> {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(data).await?;
                writer.flush().await?;
                Ok(())
            }
            None => Err(SkiffError::PipeClosed),
        }
    }
}

#[async_trait]
impl Closeable for LogWriter {
    async fn close(&self) -> SkiffResult<()> {
        let writer = self.inner.lock().await.take();
        if let Some(mut writer) = writer {
            writer.flush().await?;
            writer.shutdown().await?;
        }
        Ok(())
    }
}

/// Per-container, per-stream log storage.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Open the append side of a stream.
    async fn writer(&self, id: &ContainerId, stream: LogStream) -> SkiffResult<LogWriter>;

    /// Everything written to the stream so far, from the beginning.
    async fn read_log(&self, id: &ContainerId, stream: LogStream) -> SkiffResult<LogReader>;

    /// Drop all logs of a container.
    async fn remove(&self, id: &ContainerId) -> SkiffResult<()>;
}

/// Logs stored as `<containers_dir>/<id>/{stdout,stderr}.log`.
pub struct FileLogStore {
    containers_dir: PathBuf,
}

impl FileLogStore {
    pub fn new(containers_dir: impl Into<PathBuf>) -> Self {
        Self {
            containers_dir: containers_dir.into(),
        }
    }

    fn path(&self, id: &ContainerId, stream: LogStream) -> PathBuf {
        self.containers_dir
            .join(id.as_str())
            .join(stream.file_name())
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn writer(&self, id: &ContainerId, stream: LogStream) -> SkiffResult<LogWriter> {
        let path = self.path(id, stream);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SkiffError::Storage(format!("open {}: {}", path.display(), e)))?;
        Ok(LogWriter::new(stream, file))
    }

    async fn read_log(&self, id: &ContainerId, stream: LogStream) -> SkiffResult<LogReader> {
        let path = self.path(id, stream);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            // Nothing written yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Box::new(tokio::io::empty())),
            Err(e) => Err(SkiffError::Storage(format!(
                "open {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn remove(&self, id: &ContainerId) -> SkiffResult<()> {
        for stream in [LogStream::Stdout, LogStream::Stderr] {
            match tokio::fs::remove_file(self.path(id, stream)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SkiffError::Storage(e.to_string())),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn read_all(mut reader: LogReader) -> Vec<u8> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let store = FileLogStore::new(dir.path());
        let id = ContainerId::generate();

        let writer = store.writer(&id, LogStream::Stdout).await.unwrap();
        writer.append(b"hello\n").await.unwrap();
        writer.append(b"hi there\n").await.unwrap();
        writer.close().await.unwrap();

        let out = read_all(store.read_log(&id, LogStream::Stdout).await.unwrap()).await;
        assert_eq!(out, b"hello\nhi there\n");

        // Replay starts from the beginning every time
        let again = read_all(store.read_log(&id, LogStream::Stdout).await.unwrap()).await;
        assert_eq!(again, out);
    }

    #[tokio::test]
    async fn test_missing_log_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileLogStore::new(dir.path());
        let id = ContainerId::generate();

        let out = read_all(store.read_log(&id, LogStream::Stderr).await.unwrap()).await;
        assert!(out.is_empty());
        store.remove(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_writer_rejects_appends() {
        let writer = LogWriter::discard(LogStream::Stderr);
        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert!(writer.append(b"late").await.unwrap_err().is_pipe_closed());
    }

    #[test]
    fn test_stream_names() {
        assert_eq!("stdout".parse::<LogStream>().unwrap(), LogStream::Stdout);
        assert_eq!("stderr".parse::<LogStream>().unwrap(), LogStream::Stderr);
        assert!("stdin".parse::<LogStream>().is_err());
    }
}
