//! Client/daemon wire protocol.
//!
//! A connection starts with one JSON line from the client carrying the
//! command arguments. After that the client streams raw stdin bytes and
//! half-closes its write side to signal end of input. The daemon answers
//! with length-prefixed frames:
//!
//! ```text
//! [kind: u8][len: u32 big endian][payload: len bytes]
//! ```
//!
//! Every session ends with exactly one `Exit` or `Error` frame.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{SkiffError, SkiffResult};

/// Largest payload accepted in a single frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Largest request line accepted by the daemon.
pub const MAX_REQUEST_LEN: usize = 64 * 1024;

/// First message of every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command line without the binary name, e.g. `["run", "-i", "base", "cat"]`.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Container output, stdout and stderr merged.
    Data = 1,
    /// Command finished; payload is an i32 exit code.
    Exit = 2,
    /// Command failed; payload is a utf-8 message.
    Error = 3,
}

impl TryFrom<u8> for FrameKind {
    type Error = SkiffError;

    fn try_from(value: u8) -> Result<Self, SkiffError> {
        match value {
            1 => Ok(FrameKind::Data),
            2 => Ok(FrameKind::Exit),
            3 => Ok(FrameKind::Error),
            other => Err(SkiffError::InvalidArgument(format!(
                "unknown frame kind {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Vec<u8>),
    Exit(i32),
    Error(String),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Data(_) => FrameKind::Data,
            Frame::Exit(_) => FrameKind::Exit,
            Frame::Error(_) => FrameKind::Error,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Frame::Data(bytes) => bytes.clone(),
            Frame::Exit(code) => code.to_be_bytes().to_vec(),
            Frame::Error(msg) => msg.as_bytes().to_vec(),
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> SkiffResult<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = frame.payload();
    if payload.len() > MAX_FRAME_LEN {
        return Err(SkiffError::InvalidArgument(format!(
            "frame payload too large: {} bytes",
            payload.len()
        )));
    }
    let mut buf = Vec::with_capacity(5 + payload.len());
    buf.push(frame.kind() as u8);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame, or `None` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> SkiffResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    match reader.read_exact(&mut header[..1]).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    reader.read_exact(&mut header[1..]).await?;

    let kind = FrameKind::try_from(header[0])?;
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(SkiffError::InvalidArgument(format!(
            "frame payload too large: {len} bytes"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let frame = match kind {
        FrameKind::Data => Frame::Data(payload),
        FrameKind::Exit => {
            let bytes: [u8; 4] = payload.as_slice().try_into().map_err(|_| {
                SkiffError::InvalidArgument(format!("exit frame with {len} byte payload"))
            })?;
            Frame::Exit(i32::from_be_bytes(bytes))
        }
        FrameKind::Error => Frame::Error(String::from_utf8_lossy(&payload).into_owned()),
    };
    Ok(Some(frame))
}

pub async fn write_request<W>(writer: &mut W, request: &CommandRequest) -> SkiffResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the request line. Bytes after the newline stay buffered in `reader`
/// and belong to the client's stdin.
pub async fn read_request<R>(reader: &mut R) -> SkiffResult<CommandRequest>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(MAX_REQUEST_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if n == 0 {
        return Err(SkiffError::PipeClosed);
    }
    if line.last() != Some(&b'\n') {
        return Err(SkiffError::InvalidArgument(
            "request line missing or too long".into(),
        ));
    }
    Ok(serde_json::from_slice(&line)?)
}
