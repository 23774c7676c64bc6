//! Rate-limited streaming writer.

use crate::limiter::Limiter;
use latch_commons::{Error, Result};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Wraps a byte sink with chunked, token-paced writes.
///
/// Writes are split into chunks no larger than the burst size; tokens are
/// acquired before each chunk is written, and the sink is flushed between
/// chunks to keep streaming latency low. Like the reader, tokens are
/// reserved for the requested chunk even when the sink accepts less, which
/// favors predictable throughput over byte-level accuracy.
pub struct RateLimitedWriter<W>
where
    W: AsyncWrite + Unpin,
{
    token: CancellationToken,
    inner: W,
    limiter: Arc<Limiter>,
    released: bool,
}

impl<W> RateLimitedWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(token: CancellationToken, inner: W, limiter: Arc<Limiter>) -> Self {
        Self {
            token,
            inner,
            limiter,
            released: false,
        }
    }

    /// Writes the whole buffer in burst-sized chunks, returning the number
    /// of bytes written.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let burst = self.limiter.burst().max(1) as usize;
        let mut written = 0;
        while written < data.len() {
            let chunk = (data.len() - written).min(burst);
            // Acquire tokens before writing to prevent bursts.
            self.limiter.wait_n(&self.token, chunk as i64).await?;

            self.inner
                .write_all(&data[written..written + chunk])
                .await
                .map_err(|e| Error::new(format!("write failed: {e}")))?;
            written += chunk;

            // Flush between chunks to reduce buffering latency.
            self.inner
                .flush()
                .await
                .map_err(|e| Error::new(format!("flush failed: {e}")))?;
        }
        Ok(written)
    }

    /// Flushes the sink and releases the limiter usage count.
    pub async fn close(mut self) -> Result<()> {
        self.inner
            .flush()
            .await
            .map_err(|e| Error::new(format!("flush failed: {e}")))?;
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.limiter.set_in_use(false);
        }
    }
}

impl<W> Drop for RateLimitedWriter<W>
where
    W: AsyncWrite + Unpin,
{
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.limiter.set_in_use(false);
        }
    }
}
