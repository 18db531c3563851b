//! Live build log WebSocket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use kiln_core::ResourceId;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::fanout::LogFanout;

/// `GET /ws/logs/{build_id}`: push the build's output as text frames.
///
/// Client messages are only read to notice the connection closing.
pub async fn logs_handler(
    ws: WebSocketUpgrade,
    Path(build_id): Path<ResourceId>,
    State(state): State<AppState>,
) -> Response {
    let fanout = state.fanout.clone();
    ws.on_upgrade(move |socket| stream_logs(socket, fanout, build_id))
}

async fn stream_logs(socket: WebSocket, fanout: LogFanout, build_id: ResourceId) {
    let mut subscription = match fanout.subscribe(build_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(build_id = %build_id, error = %e, "Failed to subscribe to build logs");
            return;
        }
    };
    info!(build_id = %build_id, "Log viewer connected");

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            chunk = subscription.recv() => {
                let Some(chunk) = chunk else { break };
                let text = String::from_utf8_lossy(&chunk).into_owned();
                if let Err(e) = sender.send(Message::Text(text.into())).await {
                    debug!(build_id = %build_id, error = %e, "Log viewer send failed");
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(build_id = %build_id, error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    fanout.unsubscribe(build_id, subscription.id()).await;
    info!(build_id = %build_id, "Log viewer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use bytes::Bytes;
    use kiln_core::logs::{LogBus, log_channel};
    use kiln_db::{MemoryBuildStore, MemoryLogBus, MemoryProjectStore};
    use kiln_scheduler::MemoryJobQueue;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, tungstenite};

    async fn serve() -> (SocketAddr, AppState, Arc<MemoryLogBus>) {
        let logs = Arc::new(MemoryLogBus::new());
        let state = AppState::from_parts(
            Arc::new(MemoryBuildStore::new()),
            Arc::new(MemoryProjectStore::new()),
            Arc::new(MemoryJobQueue::new()),
            logs.clone(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = routes::router(state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (addr, state, logs)
    }

    async fn wait_for_viewers(fanout: &LogFanout, build_id: ResourceId, expected: usize) {
        for _ in 0..200 {
            if fanout.subscriber_count(build_id).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {expected} viewers of {build_id}");
    }

    async fn next_text<S>(client: &mut S) -> String
    where
        S: futures::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no frame within 5s")
            .expect("stream ended")
            .unwrap();
        match frame {
            tungstenite::Message::Text(text) => text.as_str().to_string(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_logs_stream_until_viewer_closes() {
        let (addr, state, logs) = serve().await;
        let build_id = ResourceId::new();
        let (mut client, _) = connect_async(format!("ws://{addr}/ws/logs/{build_id}"))
            .await
            .unwrap();
        wait_for_viewers(&state.fanout, build_id, 1).await;

        logs.publish(&log_channel(&build_id), Bytes::from("compiling café\n"))
            .await
            .unwrap();
        logs.publish(&log_channel(&ResourceId::new()), Bytes::from("someone else\n"))
            .await
            .unwrap();
        logs.publish(&log_channel(&build_id), Bytes::from("\x1b[32mok\x1b[0m\n"))
            .await
            .unwrap();

        assert_eq!(next_text(&mut client).await, "compiling café\n");
        assert_eq!(next_text(&mut client).await, "\x1b[32mok\x1b[0m\n");

        client.close(None).await.unwrap();
        wait_for_viewers(&state.fanout, build_id, 0).await;
        assert!(state.fanout.active_builds().await.is_empty());
    }

    #[tokio::test]
    async fn test_two_viewers_share_one_build() {
        let (addr, state, logs) = serve().await;
        let build_id = ResourceId::new();
        let url = format!("ws://{addr}/ws/logs/{build_id}");
        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        let (mut second, _) = connect_async(url.as_str()).await.unwrap();
        wait_for_viewers(&state.fanout, build_id, 2).await;

        logs.publish(&log_channel(&build_id), Bytes::from("step 1\n"))
            .await
            .unwrap();
        assert_eq!(next_text(&mut first).await, "step 1\n");
        assert_eq!(next_text(&mut second).await, "step 1\n");

        drop(first);
        wait_for_viewers(&state.fanout, build_id, 1).await;

        logs.publish(&log_channel(&build_id), Bytes::from("step 2\n"))
            .await
            .unwrap();
        assert_eq!(next_text(&mut second).await, "step 2\n");
        assert_eq!(state.fanout.active_builds().await, vec![build_id]);
    }

    #[tokio::test]
    async fn test_malformed_build_id_is_rejected() {
        let (addr, state, _) = serve().await;
        assert!(connect_async(format!("ws://{addr}/ws/logs/not-a-build")).await.is_err());
        assert!(state.fanout.active_builds().await.is_empty());
    }
}
