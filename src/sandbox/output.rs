//! Capped capture of guest stdout and stderr
//!
//! Writes never fail because of the cap: every byte is accepted and counted,
//! only the first `cap` bytes are kept.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWrite;
use wasmtime_wasi::cli::{IsTerminal, StdoutStream};
use wasmtime_wasi::p2::{OutputStream, Pollable, StreamResult};

/// Largest single write permit handed to the guest
const WRITE_PERMIT: usize = 64 * 1024;

/// Capped copy of one output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedStream {
    pub text: String,
    pub truncated: bool,
}

impl CapturedStream {
    /// Keep at most `cap` bytes, cutting on a UTF-8 boundary.
    pub fn capture(bytes: &[u8], cap: usize) -> Self {
        let truncated = bytes.len() > cap;
        Self::decode(&bytes[..bytes.len().min(cap)], truncated)
    }

    fn decode(kept: &[u8], truncated: bool) -> Self {
        let text = match std::str::from_utf8(kept) {
            Ok(s) => s.to_string(),
            // a multi-byte character split by the cap
            Err(e) if truncated && e.error_len().is_none() => {
                String::from_utf8_lossy(&kept[..e.valid_up_to()]).into_owned()
            }
            Err(_) => String::from_utf8_lossy(kept).into_owned(),
        };
        CapturedStream { text, truncated }
    }
}

#[derive(Debug, Default)]
struct CaptureBuffer {
    kept: Vec<u8>,
    total: u64,
}

/// Shared sink for one guest output stream.
///
/// Clones write into the same buffer, so the host keeps one handle and the
/// WASI context gets another.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    cap: usize,
    buffer: Arc<Mutex<CaptureBuffer>>,
}

impl OutputCapture {
    pub fn new(cap: usize) -> Self {
        OutputCapture {
            cap,
            buffer: Arc::new(Mutex::new(CaptureBuffer::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureBuffer> {
        self.buffer.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, bytes: &[u8]) {
        let mut buf = self.lock();
        buf.total = buf.total.saturating_add(bytes.len() as u64);
        let room = self.cap.saturating_sub(buf.kept.len());
        let take = room.min(bytes.len());
        buf.kept.extend_from_slice(&bytes[..take]);
    }

    /// Bytes the guest wrote, including those past the cap
    pub fn total_bytes(&self) -> u64 {
        self.lock().total
    }

    /// Kept prefix as text; truncated when anything was dropped
    pub fn finish(&self) -> CapturedStream {
        let buf = self.lock();
        CapturedStream::decode(&buf.kept, buf.total > buf.kept.len() as u64)
    }
}

impl IsTerminal for OutputCapture {
    fn is_terminal(&self) -> bool {
        false
    }
}

impl StdoutStream for OutputCapture {
    fn p2_stream(&self) -> Box<dyn OutputStream> {
        Box::new(self.clone())
    }

    fn async_stream(&self) -> Box<dyn AsyncWrite + Send + Sync> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl OutputStream for OutputCapture {
    fn write(&mut self, bytes: Bytes) -> StreamResult<()> {
        self.record(&bytes);
        Ok(())
    }

    fn flush(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn check_write(&mut self) -> StreamResult<usize> {
        Ok(WRITE_PERMIT)
    }
}

#[async_trait]
impl Pollable for OutputCapture {
    async fn ready(&mut self) {}
}

impl AsyncWrite for OutputCapture {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.record(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
