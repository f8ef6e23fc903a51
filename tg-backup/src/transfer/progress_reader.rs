//! Progress-tracking reader wrapper for real-time upload progress.

use super::progress::{format_bytes, format_speed, TransferProgress, UploadProgress};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

/// Callback for progress updates
pub type ProgressCallback = Arc<dyn Fn(&TransferProgress) + Send + Sync>;

/// Callback that logs each observation at info level
pub fn log_progress(label: String) -> ProgressCallback {
    Arc::new(move |progress: &TransferProgress| {
        tracing::info!(
            file = %label,
            "Upload progress: {:.2}% ({} of {}, {})",
            progress.percent_complete,
            format_bytes(progress.transferred_bytes),
            format_bytes(progress.total_bytes),
            format_speed(progress.bytes_per_second),
        );
    })
}

/// Reader wrapper that counts bytes read and calls a progress callback
pub struct ProgressReader<R> {
    inner: R,
    progress: UploadProgress,
    callback: ProgressCallback,
}

impl<R> ProgressReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a new progress reader over `total_bytes` of input
    pub fn new(inner: R, total_bytes: u64, interval: Duration, callback: ProgressCallback) -> Self {
        Self {
            inner,
            progress: UploadProgress::new(total_bytes, interval),
            callback,
        }
    }

    /// Get total bytes read
    pub fn bytes_read(&self) -> u64 {
        self.progress.read_bytes()
    }
}

impl<R> AsyncRead for ProgressReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let had_room = buf.remaining() > 0;
        let before = buf.filled().len();

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                if let Some(progress) = this.progress.advance(n, n == 0 && had_room) {
                    (this.callback)(&progress);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
