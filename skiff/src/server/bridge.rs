//! Copy loops between a client and a container's streams.
//!
//! A loop ends on EOF or on a closed pipe at either end. Neither is an
//! error: the [`CopyEnd`] says which side went away and the caller applies
//! its disconnect policy.

use crate::container::OutputPipe;
use futures::StreamExt;
use skiff_shared::errors::is_pipe_closed_io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

const COPY_BUF_SIZE: usize = 8192;

/// Which side of a copy loop ended it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyEnd {
    /// The reading side reached EOF or was closed.
    SourceClosed,
    /// The writing side refused more data.
    SinkClosed,
}

/// Copy `source` into `sink` until one side closes.
///
/// The sink is neither flushed to EOF nor shut down; closing it is the
/// caller's decision.
pub async fn pump<R, W>(mut source: R, sink: &mut W) -> CopyEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => return CopyEnd::SourceClosed,
            Ok(n) => n,
            Err(e) => {
                log_copy_error("source", &e);
                return CopyEnd::SourceClosed;
            }
        };
        let written = match sink.write_all(&buf[..n]).await {
            Ok(()) => sink.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            log_copy_error("sink", &e);
            return CopyEnd::SinkClosed;
        }
    }
}

/// Merge container output pipes onto one client stream.
///
/// Runs until every pipe reaches EOF (the process exited or the pipes were
/// closed) or the client stops accepting data. The client stream is shut
/// down in both cases.
pub async fn pump_outputs<W>(sources: Vec<OutputPipe>, mut sink: W) -> CopyEnd
where
    W: AsyncWrite + Unpin,
{
    let mut merged = futures::stream::select_all(sources.into_iter().map(ReaderStream::new));
    let mut end = CopyEnd::SourceClosed;
    while let Some(chunk) = merged.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                log_copy_error("output", &e);
                continue;
            }
        };
        let written = match sink.write_all(&chunk).await {
            Ok(()) => sink.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            log_copy_error("client", &e);
            end = CopyEnd::SinkClosed;
            break;
        }
    }
    let _ = sink.shutdown().await;
    end
}

fn log_copy_error(side: &str, e: &std::io::Error) {
    if is_pipe_closed_io(e) {
        tracing::trace!(side, error = %e, "copy loop: pipe closed");
    } else {
        tracing::debug!(side, error = %e, "copy loop ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    struct Refusing;

    impl AsyncWrite for Refusing {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_pump_copies_until_source_eof() {
        let mut sink = Vec::new();
        let end = pump(&b"hello\nworld\n"[..], &mut sink).await;
        assert_eq!(end, CopyEnd::SourceClosed);
        assert_eq!(sink, b"hello\nworld\n");
    }

    #[tokio::test]
    async fn test_pump_reports_closed_sink() {
        let end = pump(&b"data"[..], &mut Refusing).await;
        assert_eq!(end, CopyEnd::SinkClosed);
    }

    #[tokio::test]
    async fn test_pump_empty_source() {
        let mut sink = Vec::new();
        assert_eq!(pump(tokio::io::empty(), &mut sink).await, CopyEnd::SourceClosed);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_pump_outputs_without_sources_ends_immediately() {
        let mut sink = Vec::new();
        let end = pump_outputs(Vec::new(), &mut sink).await;
        assert_eq!(end, CopyEnd::SourceClosed);
        assert!(sink.is_empty());
    }
}
