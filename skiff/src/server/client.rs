//! Client side of the daemon protocol.

use skiff_shared::Transport;
use skiff_shared::errors::{SkiffError, SkiffResult};
use skiff_shared::protocol::{CommandRequest, Frame, read_frame, write_request};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

/// Send `args` to the daemon at `transport`, stream `stdin` to it and its
/// output to `stdout`. Returns the command's exit code.
pub async fn run_remote<I, O>(
    transport: &Transport,
    args: Vec<String>,
    stdin: I,
    stdout: O,
) -> SkiffResult<i32>
where
    I: AsyncRead + Send + Unpin + 'static,
    O: AsyncWrite + Unpin,
{
    match transport {
        Transport::Unix { socket_path } => {
            let stream = UnixStream::connect(socket_path).await.map_err(|e| {
                SkiffError::Internal(format!(
                    "cannot connect to the skiff daemon at {}: {}",
                    socket_path.display(),
                    e
                ))
            })?;
            session(stream, args, stdin, stdout).await
        }
        Transport::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await.map_err(|e| {
                SkiffError::Internal(format!(
                    "cannot connect to the skiff daemon at {}:{}: {}",
                    host, port, e
                ))
            })?;
            session(stream, args, stdin, stdout).await
        }
    }
}

/// Drive one request over an already connected stream.
pub async fn session<S, I, O>(stream: S, args: Vec<String>, mut stdin: I, mut stdout: O) -> SkiffResult<i32>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    I: AsyncRead + Send + Unpin + 'static,
    O: AsyncWrite + Unpin,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    write_request(&mut write_half, &CommandRequest { args }).await?;

    // Half-close once local stdin ends so the daemon sees EOF
    let sender = tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut stdin, &mut write_half).await {
            tracing::debug!(error = %e, "stopped sending stdin");
        }
        let _ = write_half.shutdown().await;
    });

    let result = loop {
        match read_frame(&mut read_half).await {
            Ok(Some(Frame::Data(bytes))) => {
                stdout.write_all(&bytes).await?;
                stdout.flush().await?;
            }
            Ok(Some(Frame::Exit(code))) => break Ok(code),
            Ok(Some(Frame::Error(message))) => break Err(SkiffError::Internal(message)),
            Ok(None) => {
                break Err(SkiffError::Internal(
                    "daemon closed the connection without an exit status".into(),
                ));
            }
            Err(e) => break Err(e),
        }
    };

    sender.abort();
    result
}
