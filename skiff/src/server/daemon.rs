//! Engine daemon: serves commands over a local socket.
//!
//! One connection carries one command. The client sends a request line and
//! then its raw stdin; the daemon answers with `Data` frames followed by a
//! single `Exit` or `Error` frame.

use crate::runtime::Runtime;
use crate::server::commands::dispatch;
use skiff_shared::Transport;
use skiff_shared::errors::{SkiffError, SkiffResult};
use skiff_shared::protocol::{Frame, read_request, write_frame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;

/// Buffer between a command handler and the frame writer.
const OUTPUT_BUFFER_SIZE: usize = 64 * 1024;
const FRAME_CHUNK_SIZE: usize = 32 * 1024;

pub struct Daemon {
    runtime: Runtime,
    transport: Transport,
}

impl Daemon {
    pub fn new(runtime: Runtime, transport: Transport) -> Self {
        Self { runtime, transport }
    }

    /// Accept connections until `shutdown` fires, then stop every running
    /// container.
    pub async fn serve(self, shutdown: CancellationToken) -> SkiffResult<()> {
        let result = match &self.transport {
            Transport::Unix { socket_path } => {
                if socket_path.exists() {
                    std::fs::remove_file(socket_path)?;
                }
                if let Some(parent) = socket_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let listener = UnixListener::bind(socket_path).map_err(|e| {
                    SkiffError::Internal(format!(
                        "failed to bind {}: {}",
                        socket_path.display(),
                        e
                    ))
                })?;
                tracing::info!("Listening on unix://{}", socket_path.display());

                let result = loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, _)) => self.spawn_connection(stream),
                            Err(e) => break Err(SkiffError::from(e)),
                        },
                        _ = shutdown.cancelled() => break Ok(()),
                    }
                };
                let _ = std::fs::remove_file(socket_path);
                result
            }
            Transport::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))
                    .await
                    .map_err(|e| {
                        SkiffError::Internal(format!("failed to bind {}:{}: {}", host, port, e))
                    })?;
                tracing::info!("Listening on tcp://{}:{}", host, port);

                loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => {
                                tracing::debug!(%peer, "accepted connection");
                                self.spawn_connection(stream)
                            }
                            Err(e) => break Err(SkiffError::from(e)),
                        },
                        _ = shutdown.cancelled() => break Ok(()),
                    }
                }
            }
        };

        tracing::info!("Daemon shutting down");
        let stopped = self.runtime.shutdown().await;
        result.and(stopped)
    }

    fn spawn_connection<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let runtime = self.runtime.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(runtime, stream).await {
                tracing::debug!(error = %e, "connection ended with error");
            }
        });
    }
}

/// Serve one command on `stream`.
pub async fn handle_connection<S>(runtime: Runtime, stream: S) -> SkiffResult<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let request = match read_request(&mut reader).await {
        Ok(request) => request,
        Err(e) => {
            write_frame(&mut write_half, &Frame::Error(e.to_string())).await?;
            write_half.shutdown().await?;
            return Err(e);
        }
    };
    tracing::debug!(args = ?request.args, "received request");

    let (handler_out, frames_in) = tokio::io::duplex(OUTPUT_BUFFER_SIZE);
    let forward = tokio::spawn(forward_output(frames_in, write_half));

    let result = dispatch(&runtime, &request.args, Box::new(reader), Box::new(handler_out)).await;
    if let Err(e) = &result {
        tracing::debug!(args = ?request.args, error = %e, "command failed");
    }

    // The handler's output end is dropped by now, so forwarding has reached EOF
    let Some(mut write_half) = forward
        .await
        .map_err(|e| SkiffError::Internal(format!("output forwarder failed: {}", e)))?
    else {
        return Ok(());
    };

    let last = match result {
        Ok(code) => Frame::Exit(code),
        Err(e) => Frame::Error(e.to_string()),
    };
    write_frame(&mut write_half, &last).await?;
    write_half.shutdown().await?;
    Ok(())
}

/// Wrap handler output into `Data` frames. Returns the writer unless the
/// client went away.
async fn forward_output<W>(mut source: DuplexStream, mut sink: W) -> Option<W>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; FRAME_CHUNK_SIZE];
    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) | Err(_) => return Some(sink),
            Ok(n) => n,
        };
        if let Err(e) = write_frame(&mut sink, &Frame::Data(buf[..n].to_vec())).await {
            tracing::debug!(error = %e, "client stopped reading frames");
            return None;
        }
    }
}
