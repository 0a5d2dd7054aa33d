//! Standard stream plumbing between a container process and its clients.
//!
//! The pipes exist from the moment the container is created, so a caller can
//! grab stdin/stdout before `start()` without losing early output:
//!
//! ```text
//! StdinPipe(s) -> bounded queue -> pump_stdin -> process
//! process -> pump_output -> LogWriter
//!                       \-> OutputHub -> OutputPipe (one per reader)
//! ```
//!
//! Every `StdinPipe` is a view of one shared queue: closing any of them closes
//! the process's stdin exactly once. Output is appended to the log, then
//! handed to each subscriber.
//!
//! All queues are bounded. A writer faster than the process waits on
//! `poll_write`, and a reader slower than the process holds the output pump
//! back until the kernel pipe fills and the process blocks on write.

use crate::executor::{ProcessOutput, ProcessStdin};
use crate::logs::LogWriter;
use crate::util::Closeable;
use async_trait::async_trait;
use parking_lot::Mutex;
use skiff_shared::errors::SkiffResult;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::{CancellationToken, PollSender, WaitForCancellationFutureOwned};

/// End-of-transmission, sent on a terminal when stdin closes.
const TTY_EOF: u8 = 0x04;

const PUMP_BUF_SIZE: usize = 8192;

/// Largest chunk a single stdin write queues.
const STDIN_CHUNK_SIZE: usize = 8192;

/// Chunks queued towards the process before stdin writers wait.
const STDIN_QUEUE_CHUNKS: usize = 16;

/// Chunks queued per output reader before the output pump waits for it.
const OUTPUT_QUEUE_CHUNKS: usize = 64;

fn stdin_closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "container stdin is closed")
}

/// State shared by every [`StdinPipe`] view of one container.
struct StdinShared {
    /// Taken on close; views created afterwards cannot send.
    tx: Mutex<Option<Sender<Vec<u8>>>>,
    /// Ends the stdin pump even while other views still hold senders.
    closed: CancellationToken,
}

impl StdinShared {
    fn new(open: bool) -> (Arc<Self>, StdinReceiver) {
        let (tx, rx) = mpsc::channel(STDIN_QUEUE_CHUNKS);
        let closed = CancellationToken::new();
        if !open {
            closed.cancel();
        }
        let shared = Arc::new(Self {
            tx: Mutex::new(open.then_some(tx)),
            closed: closed.clone(),
        });
        (shared, StdinReceiver { rx, closed })
    }

    fn view(self: &Arc<Self>) -> StdinPipe {
        let sender = self.tx.lock().clone().map(PollSender::new);
        StdinPipe {
            shared: Arc::clone(self),
            sender,
            closing: Box::pin(self.closed.clone().cancelled_owned()),
        }
    }

    fn close(&self) -> bool {
        let was_open = self.tx.lock().take().is_some();
        self.closed.cancel();
        was_open
    }
}

/// Write end of a container's stdin.
///
/// Writes wait while the process is not consuming its input. Dropping a
/// handle leaves stdin open; only [`Closeable::close`] (or `shutdown()`)
/// signals end of input to the process.
pub struct StdinPipe {
    shared: Arc<StdinShared>,
    sender: Option<PollSender<Vec<u8>>>,
    /// Wakes a write parked on a full queue when stdin is closed.
    closing: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl Clone for StdinPipe {
    fn clone(&self) -> Self {
        self.shared.view()
    }
}

impl StdinPipe {
    /// Whether stdin has been closed through any view.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Close stdin for every view.
    ///
    /// # Returns
    ///
    /// `false` if it was already closed.
    pub fn close_now(&self) -> bool {
        self.shared.close()
    }
}

impl AsyncWrite for StdinPipe {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let this = self.get_mut();
        let Some(sender) = this.sender.as_mut() else {
            return Poll::Ready(Err(stdin_closed_error()));
        };
        if this.shared.closed.is_cancelled() || this.closing.as_mut().poll(cx).is_ready() {
            sender.abort_send();
            return Poll::Ready(Err(stdin_closed_error()));
        }
        if ready!(sender.poll_reserve(cx)).is_err() {
            return Poll::Ready(Err(stdin_closed_error()));
        }
        // Closed while waiting for room
        if this.shared.closed.is_cancelled() {
            sender.abort_send();
            return Poll::Ready(Err(stdin_closed_error()));
        }
        let n = buf.len().min(STDIN_CHUNK_SIZE);
        match sender.send_item(buf[..n].to_vec()) {
            Ok(()) => Poll::Ready(Ok(n)),
            Err(_) => Poll::Ready(Err(stdin_closed_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.close_now();
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl Closeable for StdinPipe {
    async fn close(&self) -> SkiffResult<()> {
        self.close_now();
        Ok(())
    }
}

/// Process side of stdin, consumed by [`pump_stdin`].
pub(crate) struct StdinReceiver {
    rx: Receiver<Vec<u8>>,
    closed: CancellationToken,
}

impl StdinReceiver {
    /// Next chunk of input. After close, whatever is still queued is
    /// delivered, then `None`.
    pub(crate) async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::select! {
            biased;
            chunk = self.rx.recv() => chunk,
            _ = self.closed.cancelled() => self.rx.try_recv().ok(),
        }
    }
}

struct Subscriber {
    id: u64,
    tx: Sender<Vec<u8>>,
    /// Cancelled when the reader is closed; wakes a publish parked on its queue.
    closed: CancellationToken,
}

struct HubInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    finished: bool,
}

/// Fan-out point for one output stream of the process.
///
/// Each reader has a bounded queue. A reader that falls behind holds the
/// pump back, and with it the process once the OS pipe fills.
pub(crate) struct OutputHub {
    inner: Mutex<HubInner>,
}

impl OutputHub {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HubInner {
                next_id: 0,
                subscribers: Vec::new(),
                finished: false,
            }),
        }
    }

    fn subscribe(self: &Arc<Self>) -> OutputPipe {
        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE_CHUNKS);
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        // A finished hub hands out a pipe that reads EOF immediately
        if !inner.finished {
            inner.subscribers.push(Subscriber {
                id,
                tx,
                closed: CancellationToken::new(),
            });
        }
        OutputPipe {
            id,
            hub: Arc::clone(self),
            rx,
            pending: Vec::new(),
            pos: 0,
        }
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let Some(index) = inner.subscribers.iter().position(|s| s.id == id) else {
            return false;
        };
        let removed = inner.subscribers.swap_remove(index);
        removed.closed.cancel();
        true
    }

    /// Hand `chunk` to every reader, waiting for room in each queue.
    pub(crate) async fn publish(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let targets: Vec<_> = self
            .inner
            .lock()
            .subscribers
            .iter()
            .map(|s| (s.id, s.tx.clone(), s.closed.clone()))
            .collect();
        for (id, tx, closed) in targets {
            let delivered = tokio::select! {
                sent = tx.send(chunk.to_vec()) => sent.is_ok(),
                _ = closed.cancelled() => false,
            };
            if !delivered {
                self.unsubscribe(id);
            }
        }
    }

    /// No more output will arrive; every subscriber sees EOF after draining.
    pub(crate) fn finish(&self) {
        let mut inner = self.inner.lock();
        inner.finished = true;
        inner.subscribers.clear();
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// Read end of a container's stdout or stderr.
///
/// Each acquisition sees the output produced after it subscribed and EOF once
/// the process is gone or the pipe is closed. A pipe that is held but not
/// read eventually stalls the process.
pub struct OutputPipe {
    id: u64,
    hub: Arc<OutputHub>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl OutputPipe {
    /// Handle that closes this pipe from another task.
    pub fn closer(&self) -> OutputCloser {
        OutputCloser {
            id: self.id,
            hub: Arc::clone(&self.hub),
        }
    }
}

impl AsyncRead for OutputPipe {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos < this.pending.len() {
                let n = buf.remaining().min(this.pending.len() - this.pos);
                buf.put_slice(&this.pending[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    this.pending = chunk;
                    this.pos = 0;
                }
                // EOF
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for OutputPipe {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

/// Closes one [`OutputPipe`]; an in-flight read on it completes with EOF.
#[derive(Clone)]
pub struct OutputCloser {
    id: u64,
    hub: Arc<OutputHub>,
}

#[async_trait]
impl Closeable for OutputCloser {
    async fn close(&self) -> SkiffResult<()> {
        self.hub.unsubscribe(self.id);
        Ok(())
    }
}

/// Per-container pipe manager.
///
/// Owns the client-facing ends of all three streams for the container's
/// whole life, so they can be acquired before the process exists.
pub struct Pipes {
    stdin: Arc<StdinShared>,
    stdin_rx: Mutex<Option<StdinReceiver>>,
    stdout: Arc<OutputHub>,
    stderr: Arc<OutputHub>,
}

impl Pipes {
    /// Pipes for a container that has not started yet.
    ///
    /// Without `open_stdin` the process sees EOF on stdin right away.
    pub(crate) fn new(open_stdin: bool) -> Self {
        let (stdin, rx) = StdinShared::new(open_stdin);
        Self {
            stdin,
            stdin_rx: Mutex::new(Some(rx)),
            stdout: Arc::new(OutputHub::new()),
            stderr: Arc::new(OutputHub::new()),
        }
    }

    /// Pipes for a container whose process is already gone.
    pub(crate) fn released() -> Self {
        let pipes = Self::new(false);
        pipes.stdin_rx.lock().take();
        pipes.release();
        pipes
    }

    /// A new view of stdin. Closed views are returned for closed stdin.
    pub fn stdin(&self) -> StdinPipe {
        self.stdin.view()
    }

    /// A new stdout reader, starting from the next chunk the process writes.
    pub fn stdout(&self) -> OutputPipe {
        self.stdout.subscribe()
    }

    /// A new stderr reader, starting from the next chunk the process writes.
    pub fn stderr(&self) -> OutputPipe {
        self.stderr.subscribe()
    }

    pub(crate) fn close_stdin(&self) {
        self.stdin.close();
    }

    pub(crate) fn stdout_hub(&self) -> Arc<OutputHub> {
        Arc::clone(&self.stdout)
    }

    pub(crate) fn stderr_hub(&self) -> Arc<OutputHub> {
        Arc::clone(&self.stderr)
    }

    /// The process-side end of stdin, handed to the stdin pump at start.
    pub(crate) fn take_stdin_receiver(&self) -> Option<StdinReceiver> {
        self.stdin_rx.lock().take()
    }

    /// Give the receiver back after a failed launch.
    pub(crate) fn restore_stdin_receiver(&self, rx: StdinReceiver) {
        *self.stdin_rx.lock() = Some(rx);
    }

    /// Release the process-side handles once the process has exited.
    ///
    /// Later stdin writes fail with a broken pipe and later output
    /// acquisitions read EOF.
    pub(crate) fn release(&self) {
        self.close_stdin();
        self.stdout.finish();
        self.stderr.finish();
    }
}

/// Forward client stdin to the process until stdin is closed.
pub(crate) async fn pump_stdin(mut rx: StdinReceiver, mut sink: ProcessStdin, tty: bool) {
    while let Some(chunk) = rx.recv().await {
        let written = match sink.write_all(&chunk).await {
            Ok(()) => sink.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::debug!(error = %e, "process stdin closed");
            return;
        }
    }
    if tty {
        let _ = sink.write_all(&[TTY_EOF]).await;
        let _ = sink.flush().await;
    }
    let _ = sink.shutdown().await;
}

/// Copy one process output stream into its log and hub until EOF.
///
/// The log is written first so it stays complete while readers lag. A read
/// error ends the stream: a pseudo-terminal reports `EIO` once the process
/// side is gone.
pub(crate) async fn pump_output(mut source: ProcessOutput, hub: Arc<OutputHub>, log: Arc<LogWriter>) {
    let mut buf = vec![0u8; PUMP_BUF_SIZE];
    let mut log_failed = false;
    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(stream = %log.stream(), error = %e, "output stream ended");
                break;
            }
        };
        if let Err(e) = log.append(&buf[..n]).await
            && !log_failed
        {
            tracing::warn!(stream = %log.stream(), error = %e, "failed to append container log");
            log_failed = true;
        }
        hub.publish(&buf[..n]).await;
    }
    hub.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::LogStream;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stdin_views_share_one_close() {
        let pipes = Pipes::new(true);
        let mut rx = pipes.take_stdin_receiver().unwrap();
        let mut a = pipes.stdin();
        let b = pipes.stdin();

        a.write_all(b"hello\n").await.unwrap();
        assert!(b.close_now());
        assert!(!b.close_now());
        b.close().await.unwrap();

        assert!(a.is_closed());
        let err = a.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        // Buffered input still reaches the process, then EOF
        assert_eq!(rx.recv().await.unwrap(), b"hello\n");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stdin_handle_keeps_it_open() {
        let pipes = Pipes::new(true);
        drop(pipes.stdin());
        assert!(!pipes.stdin().is_closed());
    }

    #[tokio::test]
    async fn test_closed_stdin_without_open_stdin() {
        let pipes = Pipes::new(false);
        let mut rx = pipes.take_stdin_receiver().unwrap();
        assert!(pipes.stdin().is_closed());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_output_fans_out_to_every_reader() {
        let pipes = Pipes::new(false);
        let mut first = pipes.stdout();
        let mut second = pipes.stdout();

        let hub = pipes.stdout_hub();
        hub.publish(b"foo").await;
        hub.publish(b"bar").await;
        hub.finish();

        let mut a = Vec::new();
        let mut b = Vec::new();
        first.read_to_end(&mut a).await.unwrap();
        second.read_to_end(&mut b).await.unwrap();
        assert_eq!(a, b"foobar");
        assert_eq!(b, b"foobar");

        // Late subscribers read EOF immediately
        let mut late = Vec::new();
        pipes.stdout().read_to_end(&mut late).await.unwrap();
        assert!(late.is_empty());
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let pipes = Pipes::new(false);
        let mut reader = pipes.stdout();
        let closer = reader.closer();

        let read = tokio::spawn(async move {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.map(|_| buf)
        });

        closer.close().await.unwrap();
        closer.close().await.unwrap();
        let buf = read.await.unwrap().unwrap();
        assert!(buf.is_empty());
        assert_eq!(pipes.stdout_hub().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_reader_unsubscribes() {
        let pipes = Pipes::new(false);
        let reader = pipes.stderr();
        assert_eq!(pipes.stderr_hub().subscriber_count(), 1);
        drop(reader);
        assert_eq!(pipes.stderr_hub().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_pump_stdin_sends_eof_on_tty() {
        let (stdin, rx) = StdinShared::new(true);
        let (sink, mut process) = tokio::io::duplex(64);
        stdin.view().write_all(b"ls\n").await.unwrap();
        stdin.close();

        pump_stdin(rx, Box::new(sink), true).await;

        let mut seen = Vec::new();
        process.read_to_end(&mut seen).await.unwrap();
        assert_eq!(seen, b"ls\n\x04");
    }

    #[tokio::test]
    async fn test_pump_output_publishes_and_finishes() {
        let pipes = Pipes::new(false);
        let mut reader = pipes.stdout();
        let log = Arc::new(LogWriter::discard(LogStream::Stdout));

        let source: ProcessOutput = Box::new(&b"hello\nworld\n"[..]);
        pump_output(source, pipes.stdout_hub(), log).await;

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello\nworld\n");
    }

    #[tokio::test]
    async fn test_released_pipes() {
        let pipes = Pipes::released();
        assert!(pipes.stdin().is_closed());
        assert!(pipes.take_stdin_receiver().is_none());

        let mut out = Vec::new();
        pipes.stdout().read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_stdin_writer_waits_for_the_process() {
        let pipes = Pipes::new(true);
        let mut rx = pipes.take_stdin_receiver().unwrap();
        let mut stdin = pipes.stdin();

        let payload = vec![b'x'; STDIN_CHUNK_SIZE * (STDIN_QUEUE_CHUNKS + 4)];
        let blocked = tokio::time::timeout(Duration::from_millis(100), stdin.write_all(&payload)).await;
        assert!(blocked.is_err(), "write should wait while nothing drains stdin");

        // Draining makes room again
        let mut writer = pipes.stdin();
        let write = tokio::spawn(async move { writer.write_all(b"tail").await });
        let mut queued = 0;
        while let Some(chunk) = rx.recv().await {
            queued += chunk.len();
            if chunk == b"tail" {
                break;
            }
        }
        write.await.unwrap().unwrap();
        assert!(queued <= STDIN_CHUNK_SIZE * STDIN_QUEUE_CHUNKS + 4);
    }

    #[tokio::test]
    async fn test_close_interrupts_waiting_writer() {
        let pipes = Pipes::new(true);
        let _rx = pipes.take_stdin_receiver().unwrap();
        let mut stdin = pipes.stdin();
        let payload = vec![b'x'; STDIN_CHUNK_SIZE * (STDIN_QUEUE_CHUNKS + 1)];

        let write = tokio::spawn(async move { stdin.write_all(&payload).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        pipes.close_stdin();
        let err = tokio::time::timeout(Duration::from_secs(2), write)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_unread_subscriber_holds_publish_back() {
        let pipes = Pipes::new(false);
        let reader = pipes.stdout();
        let closer = reader.closer();
        let hub = pipes.stdout_hub();

        for _ in 0..OUTPUT_QUEUE_CHUNKS {
            hub.publish(b"chunk").await;
        }
        let blocked = tokio::time::timeout(Duration::from_millis(100), hub.publish(b"more")).await;
        assert!(blocked.is_err(), "publish should wait for a full reader");

        // Closing the lagging reader releases the pump
        let publish = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.publish(b"more").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), publish)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hub.subscriber_count(), 0);
        drop(reader);
    }
}
