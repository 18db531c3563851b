//! Live log fan-out.
//!
//! Maps each build id to the viewers currently watching it. The first
//! viewer of a build opens one subscription on the build's log channel and
//! starts a task that copies every chunk to all viewers; the last viewer
//! to leave tears both down.

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use kiln_core::ResourceId;
use kiln_core::logs::{LogBus, log_channel};
use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, warn};

pub type SubscriberId = u64;

/// Chunks buffered per viewer before further chunks are dropped for it.
const DEFAULT_BUFFER: usize = 256;

struct Entry {
    /// Distinguishes this entry from earlier ones for the same build.
    generation: u64,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Bytes>>,
    /// Dropping the entry drops this and stops the task.
    _stop: oneshot::Sender<()>,
}

type Registry = Arc<RwLock<HashMap<ResourceId, Entry>>>;

/// One viewer's handle on a build's live output.
pub struct Subscription {
    build_id: ResourceId,
    id: SubscriberId,
    rx: mpsc::Receiver<Bytes>,
}

impl Subscription {
    pub fn build_id(&self) -> ResourceId {
        self.build_id
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next chunk, or `None` once the fan-out for this build has ended.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

#[derive(Clone)]
pub struct LogFanout {
    bus: Arc<dyn LogBus>,
    registry: Registry,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl LogFanout {
    pub fn new(bus: Arc<dyn LogBus>) -> Self {
        Self {
            bus,
            registry: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: DEFAULT_BUFFER,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Start receiving output of `build_id` published from now on.
    pub async fn subscribe(&self, build_id: ResourceId) -> kiln_core::Result<Subscription> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Subscription { build_id, id, rx };

        {
            let mut registry = self.registry.write().await;
            if let Some(entry) = registry.get_mut(&build_id) {
                entry.subscribers.insert(id, tx);
                debug!(build_id = %build_id, subscriber = id, "Joined live log");
                return Ok(subscription);
            }
        }

        // Connect outside the lock; another viewer may win the race.
        let stream = self.bus.subscribe(&log_channel(&build_id)).await?;

        let mut registry = self.registry.write().await;
        match registry.entry(build_id) {
            MapEntry::Occupied(mut occupied) => {
                occupied.get_mut().subscribers.insert(id, tx);
            }
            MapEntry::Vacant(vacant) => {
                let generation = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (stop_tx, stop_rx) = oneshot::channel();
                let mut subscribers = HashMap::new();
                subscribers.insert(id, tx);
                vacant.insert(Entry {
                    generation,
                    subscribers,
                    _stop: stop_tx,
                });
                tokio::spawn(fan_out(
                    self.registry.clone(),
                    build_id,
                    generation,
                    stream,
                    stop_rx,
                ));
                debug!(build_id = %build_id, generation, "Started log fan-out");
            }
        }
        debug!(build_id = %build_id, subscriber = id, "Joined live log");
        Ok(subscription)
    }

    /// Remove one viewer. The last one out stops the build's fan-out.
    pub async fn unsubscribe(&self, build_id: ResourceId, id: SubscriberId) {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get_mut(&build_id) else {
            return;
        };
        entry.subscribers.remove(&id);
        if entry.subscribers.is_empty() {
            registry.remove(&build_id);
            debug!(build_id = %build_id, "Stopped log fan-out");
        }
    }

    pub async fn subscriber_count(&self, build_id: ResourceId) -> usize {
        self.registry
            .read()
            .await
            .get(&build_id)
            .map(|e| e.subscribers.len())
            .unwrap_or(0)
    }

    /// Builds that currently have at least one viewer.
    pub async fn active_builds(&self) -> Vec<ResourceId> {
        self.registry.read().await.keys().copied().collect()
    }
}

async fn fan_out(
    registry: Registry,
    build_id: ResourceId,
    generation: u64,
    mut stream: BoxStream<'static, Bytes>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let chunk = tokio::select! {
            _ = &mut stop => break,
            next = stream.next() => match next {
                Some(chunk) => chunk,
                None => break,
            },
        };

        let targets: Vec<(SubscriberId, mpsc::Sender<Bytes>)> = {
            let registry = registry.read().await;
            match registry.get(&build_id) {
                Some(entry) if entry.generation == generation => entry
                    .subscribers
                    .iter()
                    .map(|(id, tx)| (*id, tx.clone()))
                    .collect(),
                _ => break,
            }
        };

        for (id, tx) in targets {
            if let Err(e) = tx.try_send(chunk.clone()) {
                warn!(build_id = %build_id, subscriber = id, error = %e, "Dropped log chunk");
            }
        }
    }

    // The channel itself went away: drop our entry so viewers see the end
    // and the next subscriber reconnects.
    let mut registry = registry.write().await;
    if registry
        .get(&build_id)
        .is_some_and(|e| e.generation == generation)
    {
        registry.remove(&build_id);
        debug!(build_id = %build_id, "Log channel closed");
    }
}
