//! Broadcast bus capability and the per-process update notifier.
//!
//! The bus itself is an external capability: a fire-and-forget topic that
//! delivers every published frame to every subscriber in the group, with no
//! ordering guarantee across receivers. On top of it each process runs one
//! [`Notifier`]: a background listener task that decodes incoming frames and
//! invokes registered callbacks in priority order.

pub mod event;

pub use event::{UpdateEvent, UpdatePattern, CONFIG_CHANGE_CODE, SERVER_CHANGE_CODE};

use crate::error::{BusError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// A live subscription to the broadcast bus.
#[async_trait]
pub trait BusSubscription: Send {
    /// Receive the next frame, `None` when the bus is gone.
    async fn recv(&mut self) -> Option<Bytes>;
}

/// Group-wide publish/subscribe channel. Message payloads are opaque frames.
#[async_trait]
pub trait BroadcastBus: Send + Sync {
    /// Publish a frame to every current subscriber. Fire-and-forget: no
    /// acknowledgement, no delivery ordering across subscribers.
    async fn publish(&self, frame: Bytes) -> Result<()>;

    /// Open a new subscription.
    fn subscribe(&self) -> Box<dyn BusSubscription>;
}

/// In-process broadcast bus over a tokio broadcast channel.
///
/// Serves single-process groups and tests; a deployment with real fan-out
/// plugs its own [`BroadcastBus`] implementation instead.
pub struct LocalBus {
    tx: broadcast::Sender<Bytes>,
}

impl LocalBus {
    /// Create a bus with the default frame buffer.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastBus for LocalBus {
    async fn publish(&self, frame: Bytes) -> Result<()> {
        // A send error only means there are no subscribers right now, which
        // fire-and-forget semantics allow.
        let _ = self.tx.send(frame);
        Ok(())
    }

    fn subscribe(&self) -> Box<dyn BusSubscription> {
        Box::new(LocalSubscription {
            rx: self.tx.subscribe(),
        })
    }
}

struct LocalSubscription {
    rx: broadcast::Receiver<Bytes>,
}

#[async_trait]
impl BusSubscription for LocalSubscription {
    async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "bus subscription lagged, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Invocation priority of a registered callback.
///
/// Callbacks run in priority order, then registration order within the same
/// priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// Handle for removing a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

/// Callback signature. Receives `None` for the generic "reload everything"
/// frame.
pub type Callback = dyn Fn(Option<&UpdateEvent>) -> Result<()> + Send + Sync;

struct CallbackEntry {
    id: CallbackId,
    priority: Priority,
    seq: u64,
    pattern: Option<UpdatePattern>,
    action: Arc<Callback>,
}

struct NotifierInner {
    bus: Arc<dyn BroadcastBus>,
    registry: Mutex<Vec<CallbackEntry>>,
    next_id: AtomicU64,
    /// Frames fully dispatched by the listener task.
    dispatched: AtomicU64,
    shutdown_tx: mpsc::Sender<()>,
}

/// Per-process owner of the callback registry and the bus listener task.
///
/// Cheap to clone; all clones share the registry and the single listener.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

impl Notifier {
    /// Subscribe to the bus and start the background listener task.
    pub fn start(bus: Arc<dyn BroadcastBus>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let inner = Arc::new(NotifierInner {
            bus: bus.clone(),
            registry: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            shutdown_tx,
        });

        let mut subscription = bus.subscribe();
        let listener = Arc::downgrade(&inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = subscription.recv() => {
                        let Some(frame) = frame else {
                            debug!("bus subscription closed, notifier listener exiting");
                            break;
                        };
                        let Some(inner) = listener.upgrade() else { break };
                        inner.dispatch_frame(&frame);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("update notifier shutting down");
                        break;
                    }
                }
            }
        });

        Self { inner }
    }

    /// Publish an update event to the whole group, this process included.
    pub async fn publish(&self, event: &UpdateEvent) -> Result<()> {
        let frame = event::encode_frame(Some(event))?;
        self.inner.bus.publish(frame).await
    }

    /// Publish the generic frame that invokes every registered callback in
    /// the group, patterned or not.
    pub async fn publish_generic(&self) -> Result<()> {
        let frame = event::encode_frame(None)?;
        self.inner.bus.publish(frame).await
    }

    /// Register a callback. Returns an id usable with
    /// [`remove_callback`](Self::remove_callback).
    pub fn add_callback<F>(
        &self,
        pattern: Option<UpdatePattern>,
        priority: Priority,
        action: F,
    ) -> CallbackId
    where
        F: Fn(Option<&UpdateEvent>) -> Result<()> + Send + Sync + 'static,
    {
        let seq = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let id = CallbackId(seq);
        let entry = CallbackEntry {
            id,
            priority,
            seq,
            pattern,
            action: Arc::new(action),
        };

        let mut registry = self.inner.registry.lock();
        let pos = registry
            .iter()
            .position(|e| (e.priority, e.seq) > (priority, seq))
            .unwrap_or(registry.len());
        registry.insert(pos, entry);
        id
    }

    /// Remove a previously registered callback.
    pub fn remove_callback(&self, id: CallbackId) {
        self.inner.registry.lock().retain(|e| e.id != id);
    }

    /// Number of frames the listener task has fully dispatched. Lets tests
    /// wait for delivery without guessing at timings.
    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Acquire)
    }

    /// Stop the listener task.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(()).await;
    }
}

impl NotifierInner {
    fn dispatch_frame(&self, frame: &Bytes) {
        match event::decode_frame(frame) {
            Ok(event) => self.dispatch(event.as_ref()),
            Err(e) => warn!(error = %e, "dropping undecodable bus frame"),
        }
        self.dispatched.fetch_add(1, Ordering::Release);
    }

    /// Invoke matching callbacks in priority, then registration order. A
    /// failing callback is logged and must not stop delivery to the rest.
    fn dispatch(&self, event: Option<&UpdateEvent>) {
        // Snapshot under the lock so a callback may register or remove
        // callbacks without deadlocking.
        let entries: Vec<(Option<UpdatePattern>, Arc<Callback>)> = {
            let registry = self.registry.lock();
            registry
                .iter()
                .map(|e| (e.pattern.clone(), e.action.clone()))
                .collect()
        };

        for (pattern, action) in entries {
            // The generic frame bypasses matching entirely.
            if let (Some(event), Some(pattern)) = (event, &pattern) {
                if !pattern.matches(event) {
                    continue;
                }
            }
            if let Err(e) = action(event) {
                warn!(error = %e, "update callback failed");
            }
        }
    }
}
