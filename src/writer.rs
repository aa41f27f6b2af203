//! Dedicated writer task for outbound frames.
//!
//! Every connection owns one writer task that receives frames via an mpsc
//! channel, so handlers on any thread can send without sharing a lock on
//! the stream, and ready frames are batched into vectored writes.
//!
//! ```text
//! Handler 1 ─┐
//! Handler 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Stream
//! Handler N ─┘
//! ```

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{Frame, HEADER_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout in milliseconds.
pub const DEFAULT_BACKPRESSURE_TIMEOUT_MS: u64 = 5_000;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Channel name bytes (empty for control frames).
    pub channel: Bytes,
    /// Payload bytes.
    pub payload: Bytes,
}

impl OutboundFrame {
    #[inline]
    pub fn new(frame: &Frame) -> Self {
        Self {
            header: frame.header.encode(),
            channel: Bytes::copy_from_slice(frame.channel_bytes()),
            payload: frame.payload_bytes(),
        }
    }

    /// Header, channel and payload in wire order.
    #[inline]
    fn parts(&self) -> [&[u8]; 3] {
        [&self.header, &self.channel, &self.payload]
    }

    /// Total encoded size.
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.channel.len() + self.payload.len()
    }
}

impl From<&Frame> for OutboundFrame {
    fn from(frame: &Frame) -> Self {
        Self::new(frame)
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// How long [`WriterHandle::send`] waits for backpressure to clear.
    pub backpressure_timeout_ms: u64,
}

impl WriterConfig {
    #[inline]
    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT_MS,
        }
    }
}

/// Handle for sending frames to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundFrame>, pending: Arc<AtomicUsize>, max_pending: usize, timeout: Duration) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Send a frame to the writer task.
    ///
    /// Waits while backpressure is active, timing out after the configured
    /// duration.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            Error::ConnectionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(Error::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Send a frame without waiting.
    ///
    /// Returns [`Error::Backpressure`] immediately if at capacity and
    /// [`Error::ConnectionClosed`] if the writer task has stopped.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(Error::Backpressure);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => Error::Backpressure,
                mpsc::error::TrySendError::Closed(_) => Error::ConnectionClosed,
            }
        })
    }

    /// Whether the writer task has stopped receiving.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends once every handle is dropped; it then drains queued
/// frames and shuts the stream down.
pub fn spawn_writer_task<W>(writer: W, config: &WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout(),
    );

    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Receives frames and writes them to the stream in batches.
async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W, pending: Arc<AtomicUsize>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!("Writer failed: {}", e);
            return Err(e);
        }

        pending.fetch_sub(batch_size, Ordering::Release);
    }

    // All handles dropped
    tracing::debug!("Writer channel closed, shutting stream down");
    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of frames using vectored I/O.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after writing `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for frame in batch {
        for part in frame.parts() {
            if part.is_empty() {
                continue;
            }
            let end = offset + part.len();
            if skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::Direction;
    use crate::protocol::FrameBuffer;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn play(payload: &'static [u8]) -> OutboundFrame {
        let frame = Frame::play(Direction::ToServer, "demo:main".parse().unwrap(), Bytes::from_static(payload));
        OutboundFrame::new(&frame)
    }

    #[test]
    fn test_outbound_frame_size() {
        let frame = play(b"hello");

        assert_eq!(frame.channel.as_ref(), b"demo:main");
        assert_eq!(frame.size(), HEADER_SIZE + 9 + 5);
    }

    #[test]
    fn test_outbound_control_frame_has_no_channel() {
        let frame = OutboundFrame::new(&Frame::login_complete());
        assert!(frame.channel.is_empty());
        assert_eq!(frame.size(), HEADER_SIZE);
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, &WriterConfig::default());

        handle.send(play(b"hello")).await.unwrap();

        let mut buf = vec![0u8; HEADER_SIZE + 14];
        server.read_exact(&mut buf).await.unwrap();

        let frames = FrameBuffer::new().push(&buf).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"hello");
    }

    #[tokio::test]
    async fn test_writer_batching() {
        let (client, mut server) = duplex(8192);
        let (handle, _task) = spawn_writer_task(client, &WriterConfig::default());

        for _ in 0..10 {
            handle.send(play(b"tick")).await.unwrap();
        }

        let frame_size = HEADER_SIZE + 9 + 4;
        let mut buf = vec![0u8; 10 * frame_size];
        server.read_exact(&mut buf).await.unwrap();

        let frames = FrameBuffer::new().push(&buf).unwrap();
        assert_eq!(frames.len(), 10);
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(AtomicUsize::new(100));
        let handle = WriterHandle::new(tx, pending, 100, Duration::from_secs(1));

        assert!(handle.is_backpressure_active());
        assert!(matches!(handle.try_send(play(b"")), Err(Error::Backpressure)));
    }

    #[tokio::test]
    async fn test_try_send_after_writer_stopped() {
        let (tx, rx) = mpsc::channel::<OutboundFrame>(10);
        drop(rx);
        let handle = WriterHandle::new(tx, Arc::new(AtomicUsize::new(0)), 100, Duration::from_secs(1));

        assert!(matches!(handle.try_send(play(b"x")), Err(Error::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_send_times_out_under_backpressure() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let handle = WriterHandle::new(tx, Arc::new(AtomicUsize::new(5)), 5, Duration::from_millis(20));

        let result = handle.send(play(b"x")).await;
        assert!(matches!(result, Err(Error::BackpressureTimeout)));
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![play(b"hello")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 3);
    }

    #[test]
    fn test_build_remaining_slices_partial_channel() {
        let batch = vec![play(b"hello")];

        let slices = build_remaining_slices(&batch, HEADER_SIZE + 4);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b":main");
        assert_eq!(&*slices[1], b"hello");
    }

    #[test]
    fn test_build_remaining_slices_skips_empty_parts() {
        let batch = vec![OutboundFrame::new(&Frame::login_complete()), play(b"")];

        let slices = build_remaining_slices(&batch, 0);
        // header, then header + channel
        assert_eq!(slices.len(), 3);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| play(b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        assert_eq!(written.len(), 5 * (HEADER_SIZE + 9 + 3));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, &WriterConfig::default());

        drop(handle);

        assert!(task.await.unwrap().is_ok());
        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }
}
