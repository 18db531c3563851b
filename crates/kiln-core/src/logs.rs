//! Live log publish/subscribe.
//!
//! Every build has one channel named from its id. Payloads are raw output
//! chunks: no framing, no sequence numbers, no history.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::{ResourceId, Result};

pub const LOG_CHANNEL_PREFIX: &str = "logs:";

/// Name of the pub/sub channel carrying a build's output.
pub fn log_channel(build_id: &ResourceId) -> String {
    format!("{}{}", LOG_CHANNEL_PREFIX, build_id)
}

/// A broadcast transport for log chunks.
#[async_trait]
pub trait LogBus: Send + Sync {
    /// Publish a chunk. Succeeds even when nobody is listening.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Listen on a channel. The stream yields chunks published after the
    /// subscription is established and ends when the transport goes away.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, Bytes>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_is_deterministic() {
        let id = ResourceId::new();
        assert_eq!(log_channel(&id), log_channel(&id));
        assert_eq!(log_channel(&id), format!("logs:{}", id));
    }

    #[test]
    fn test_channel_names_differ_per_build() {
        assert_ne!(
            log_channel(&ResourceId::new()),
            log_channel(&ResourceId::new())
        );
    }
}
