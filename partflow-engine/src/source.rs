//! Part reader adapter
//!
//! A pump task reads the caller's byte source into a bounded buffer and
//! signals readiness; the scheduler slices parts off that buffer without
//! ever waiting on the source.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tracing::{debug, warn};

use partflow_core::UploadError;

/// Boxed byte source accepted by the uploader
pub type BoxedSource = Box<dyn AsyncRead + Send + Unpin>;

/// Largest single read issued against the source
const READ_CHUNK: usize = 64 * 1024;

/// Outcome of a non-blocking drain attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drain {
    /// A full part, or the remainder of a finished stream
    Chunk(Bytes),
    /// Less than a full part buffered, stream still open
    NotReady,
    /// End of stream reached and nothing left buffered
    Exhausted,
    /// The source failed; buffered bytes before the failure were drained
    Failed(UploadError),
}

#[derive(Default)]
struct ReaderState {
    buf: BytesMut,
    eof: bool,
    error: Option<String>,
    closed: bool,
}

struct ReaderShared {
    state: Mutex<ReaderState>,
    space: Notify,
}

impl ReaderShared {
    /// Wait until the buffer drops below the high water mark.
    /// Returns false once the reader was closed.
    async fn wait_for_space(&self, high_water: usize) -> bool {
        loop {
            let notified = self.space.notified();
            {
                let state = self.state.lock();
                if state.closed {
                    return false;
                }
                if state.buf.len() < high_water {
                    return true;
                }
            }
            notified.await;
        }
    }
}

/// Non-blocking reader over a pumped byte source
pub struct PartReader {
    shared: Arc<ReaderShared>,
}

impl PartReader {
    /// Start pumping `source`, calling `on_ready` whenever a full part is
    /// buffered or the stream ended.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R, F>(source: R, part_size: usize, read_ahead_parts: usize, on_ready: F) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(ReaderShared {
            state: Mutex::new(ReaderState::default()),
            space: Notify::new(),
        });
        let high_water = part_size.saturating_mul(read_ahead_parts.max(1));

        tokio::spawn(pump(source, shared.clone(), part_size, high_water, on_ready));

        PartReader { shared }
    }

    /// Take up to `max_bytes` from the buffer without waiting
    pub fn try_drain(&self, max_bytes: usize) -> Drain {
        let drain = {
            let mut state = self.shared.state.lock();
            if state.closed {
                Drain::Exhausted
            } else if state.buf.len() >= max_bytes {
                Drain::Chunk(state.buf.split_to(max_bytes).freeze())
            } else if !state.eof {
                Drain::NotReady
            } else if !state.buf.is_empty() {
                let len = state.buf.len();
                Drain::Chunk(state.buf.split_to(len).freeze())
            } else if let Some(err) = &state.error {
                Drain::Failed(UploadError::Source(err.clone()))
            } else {
                Drain::Exhausted
            }
        };

        if matches!(drain, Drain::Chunk(_)) {
            self.shared.space.notify_one();
        }
        drain
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().buf.len()
    }

    /// Stop the pump and drop buffered bytes
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.buf.clear();
        }
        self.shared.space.notify_one();
    }
}

impl Drop for PartReader {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump<R, F>(
    mut source: R,
    shared: Arc<ReaderShared>,
    part_size: usize,
    high_water: usize,
    on_ready: F,
) where
    R: AsyncRead + Unpin,
    F: Fn(),
{
    // Reused across reads; `clear` keeps the allocation.
    let mut chunk = BytesMut::with_capacity(READ_CHUNK.min(high_water.max(1)));
    loop {
        if !shared.wait_for_space(high_water).await {
            debug!("source closed, stopping pump");
            return;
        }

        chunk.clear();
        let read = source.read_buf(&mut chunk).await;

        let (ready, done) = {
            let mut state = shared.state.lock();
            if state.closed {
                return;
            }
            match read {
                Ok(0) => {
                    state.eof = true;
                    (true, true)
                }
                Ok(_) => {
                    state.buf.extend_from_slice(&chunk);
                    (state.buf.len() >= part_size, false)
                }
                Err(e) => {
                    warn!("Source read failed: {}", e);
                    state.error = Some(e.to_string());
                    state.eof = true;
                    (true, true)
                }
            }
        };

        if ready {
            on_ready();
        }
        if done {
            return;
        }
    }
}
