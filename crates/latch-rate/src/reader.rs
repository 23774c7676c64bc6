//! Rate-limited streaming reader.

use crate::limiter::Limiter;
use latch_commons::{Error, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Wraps a source with closable-read semantics and token-bucket pacing.
///
/// Each `read` acquires tokens for `min(buf.len(), burst)` bytes *before*
/// reading, then reads at most that many bytes. Tokens reserved for a short
/// read are still consumed; post-read accounting would be more precise but
/// would let callers burst past the limit with small reads.
pub struct RateLimitedReader<R> {
    token: CancellationToken,
    inner: R,
    limiter: Arc<Limiter>,
    released: bool,
}

impl<R> std::fmt::Debug for RateLimitedReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedReader")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl<R> RateLimitedReader<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(token: CancellationToken, inner: R, limiter: Arc<Limiter>) -> Self {
        Self {
            token,
            inner,
            limiter,
            released: false,
        }
    }

    /// Reads up to `min(buf.len(), burst)` bytes after acquiring tokens.
    ///
    /// Returns the number of bytes read; zero means end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let burst = self.limiter.burst().max(1) as usize;
        let chunk = buf.len().min(burst);
        self.limiter.wait_n(&self.token, chunk as i64).await?;
        self.inner
            .read(&mut buf[..chunk])
            .await
            .map_err(|e| Error::new(format!("read failed: {e}")))
    }

    /// Releases the limiter usage count.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.limiter.set_in_use(false);
        }
    }
}

impl<R> Drop for RateLimitedReader<R> {
    fn drop(&mut self) {
        // A leaked reader must not pin the limiter active.
        if !self.released {
            self.released = true;
            self.limiter.set_in_use(false);
        }
    }
}
