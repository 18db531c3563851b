//! Log bus over PostgreSQL LISTEN/NOTIFY.
//!
//! NOTIFY payloads are text capped just under 8000 bytes, so chunks are
//! decoded lossily and split on character boundaries before sending.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::future;
use futures::stream::BoxStream;
use kiln_core::logs::LogBus;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::{debug, warn};

use crate::DbError;

const MAX_NOTIFY_PAYLOAD: usize = 7900;

pub struct PgLogBus {
    pool: PgPool,
}

impl PgLogBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogBus for PgLogBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> kiln_core::Result<()> {
        let text = String::from_utf8_lossy(&payload);
        for piece in split_payload(&text, MAX_NOTIFY_PAYLOAD) {
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(channel)
                .bind(piece)
                .execute(&self.pool)
                .await
                .map_err(DbError::from)?;
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> kiln_core::Result<BoxStream<'static, Bytes>> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(DbError::from)?;
        listener.listen(channel).await.map_err(DbError::from)?;
        debug!(channel = %channel, "Listening for log notifications");

        let channel = channel.to_string();
        let stream = listener
            .into_stream()
            .take_while(move |result| {
                if let Err(e) = result {
                    warn!(channel = %channel, error = %e, "Log listener failed");
                }
                future::ready(result.is_ok())
            })
            .filter_map(|result| {
                future::ready(
                    result
                        .ok()
                        .map(|n| Bytes::copy_from_slice(n.payload().as_bytes())),
                )
            });
        Ok(stream.boxed())
    }
}

/// Split `text` into pieces of at most `max` bytes without cutting a
/// UTF-8 sequence in half.
fn split_payload(text: &str, max: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}
