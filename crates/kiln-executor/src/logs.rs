//! Publishing step output to a build's live log channel.

use async_trait::async_trait;
use bytes::Bytes;
use kiln_core::executor::LogSink;
use kiln_core::logs::{LogBus, log_channel};
use kiln_core::{ResourceId, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

/// [`LogSink`] that forwards chunks to `logs:<build_id>`.
///
/// Container output is split at arbitrary byte offsets, so a multi-byte
/// character can straddle two chunks. The unfinished tail of a chunk is
/// held back and prepended to the next one; every published payload is
/// valid UTF-8.
pub struct BuildLogWriter {
    bus: Arc<dyn LogBus>,
    channel: String,
    pending: Mutex<Vec<u8>>,
}

impl BuildLogWriter {
    pub fn new(bus: Arc<dyn LogBus>, build_id: &ResourceId) -> Self {
        Self {
            bus,
            channel: log_channel(build_id),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn publish_text(&self, bytes: Bytes) -> Result<()> {
        let payload = match std::str::from_utf8(&bytes) {
            Ok(_) => bytes,
            Err(_) => Bytes::from(String::from_utf8_lossy(&bytes).into_owned()),
        };
        self.bus.publish(&self.channel, payload).await
    }
}

#[async_trait]
impl LogSink for BuildLogWriter {
    async fn write(&self, chunk: Bytes) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let mut bytes = if pending.is_empty() {
            chunk
        } else {
            let mut joined = std::mem::take(&mut *pending);
            joined.extend_from_slice(&chunk);
            Bytes::from(joined)
        };

        let complete = complete_prefix_len(&bytes);
        if complete < bytes.len() {
            pending.extend_from_slice(&bytes.split_off(complete));
        }
        if bytes.is_empty() {
            return Ok(());
        }
        self.publish_text(bytes).await
    }

    async fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }
        let tail = Bytes::from(std::mem::take(&mut *pending));
        self.publish_text(tail).await
    }
}

/// Length of `buf` without a trailing UTF-8 sequence that is still
/// missing continuation bytes.
fn complete_prefix_len(buf: &[u8]) -> usize {
    // Sequences are at most 4 bytes, so only the last 3 can be unfinished.
    for back in 1..=buf.len().min(3) {
        let i = buf.len() - back;
        let byte = buf[i];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if back < width { i } else { buf.len() };
    }
    buf.len()
}
