//! Live telemetry feed subscriptions.
//!
//! The transport (socket, SSE stream, test harness) owns a [`FeedHub`] and
//! publishes every message it receives. The presentation layer subscribes for
//! the shipment or tracker it currently shows and hands each matching message
//! to its reconciler.
//!
//! Selection changes are guarded by a [`SelectionGuard`]: starting a new
//! subscription through the guard makes every older subscription created
//! through the same guard stale, and a stale subscription delivers nothing
//! more, even if messages for it are still buffered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::error::Result;
use crate::reconciler::RouteTelemetryReconciler;
use crate::records::FeedMessage;

/// Configuration for [`FeedHub`].
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Messages buffered per subscriber before the slowest one starts lagging.
    /// Default: 1024
    pub capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Publisher side of the live feed.
#[derive(Debug, Clone)]
pub struct FeedHub {
    sender: broadcast::Sender<Arc<FeedMessage>>,
}

impl FeedHub {
    pub fn new(config: FeedConfig) -> Self {
        let (sender, _) = broadcast::channel(config.capacity.max(1));
        Self { sender }
    }

    /// Publish a message to all subscribers. Returns how many received it.
    pub fn publish(&self, message: FeedMessage) -> usize {
        match self.sender.send(Arc::new(message)) {
            Ok(n) => n,
            Err(_) => {
                debug!("[FeedHub] No subscribers, message dropped");
                0
            }
        }
    }

    /// Parse a raw JSON message from the transport and publish it.
    pub fn publish_json(&self, raw: &str) -> Result<usize> {
        let message = FeedMessage::from_json(raw).map_err(|e| {
            warn!("[FeedHub] Malformed feed message: {}", e);
            e
        })?;
        Ok(self.publish(message))
    }

    /// Subscribe to messages for `selection_id`, superseding any earlier
    /// subscription made through `guard`.
    pub fn subscribe(&self, selection_id: impl Into<String>, guard: &SelectionGuard) -> Subscription {
        let selection_id = selection_id.into();
        let generation = guard.begin();
        info!("[FeedHub] Subscribed to {} (generation {})", selection_id, generation);

        Subscription {
            selection_id,
            generation,
            guard: guard.clone(),
            receiver: Some(self.sender.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::new(FeedConfig::default())
    }
}

/// Tracks which subscription is current for one view.
#[derive(Debug, Clone, Default)]
pub struct SelectionGuard {
    current: Arc<AtomicU64>,
}

impl SelectionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make every existing subscription stale without starting a new one.
    pub fn invalidate(&self) {
        self.begin();
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current.load(Ordering::SeqCst) == generation
    }
}

/// Receiving side for one selection.
#[derive(Debug)]
pub struct Subscription {
    selection_id: String,
    generation: u64,
    guard: SelectionGuard,
    receiver: Option<broadcast::Receiver<Arc<FeedMessage>>>,
}

impl Subscription {
    pub fn selection_id(&self) -> &str {
        &self.selection_id
    }

    /// True once a newer subscription was made through the same guard.
    pub fn is_stale(&self) -> bool {
        !self.guard.is_current(self.generation)
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Stop receiving. Buffered messages are discarded.
    pub fn close(&mut self) {
        if self.receiver.take().is_some() {
            debug!("[Subscription {}] Closed", self.selection_id);
        }
    }

    // Returns Some(true) to deliver, Some(false) to skip, None to stop.
    fn admit(&mut self, message: &FeedMessage) -> Option<bool> {
        if self.is_stale() {
            debug!("[Subscription {}] Stale, closing", self.selection_id);
            self.close();
            return None;
        }
        Some(message.id == self.selection_id)
    }

    /// Wait for the next message for this selection.
    ///
    /// Returns `None` once the subscription is closed, stale, or the hub is gone.
    pub async fn next(&mut self) -> Option<Arc<FeedMessage>> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(message) => match self.admit(&message)? {
                    true => return Some(message),
                    false => continue,
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("[Subscription {}] Lagged, {} messages skipped", self.selection_id, skipped);
                }
                Err(RecvError::Closed) => {
                    self.close();
                    return None;
                }
            }
        }
    }

    /// Next already-buffered message for this selection, without waiting.
    pub fn try_next(&mut self) -> Option<Arc<FeedMessage>> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(message) => match self.admit(&message)? {
                    true => return Some(message),
                    false => continue,
                },
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("[Subscription {}] Lagged, {} messages skipped", self.selection_id, skipped);
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.close();
                    return None;
                }
            }
        }
    }

    /// Call `handler` for every message until the subscription ends.
    /// Returns the number of messages delivered.
    pub async fn on_event<F>(&mut self, mut handler: F) -> usize
    where
        F: FnMut(&FeedMessage),
    {
        let mut delivered = 0;
        while let Some(message) = self.next().await {
            handler(&message);
            delivered += 1;
        }
        delivered
    }

    /// Feed every message into `reconciler` until the subscription ends.
    pub async fn drive(&mut self, reconciler: &mut RouteTelemetryReconciler) -> usize {
        self.on_event(|message| reconciler.ingest_feed_message(message)).await
    }

    /// Apply all buffered messages to `reconciler` without waiting.
    pub fn drain_into(&mut self, reconciler: &mut RouteTelemetryReconciler) -> usize {
        let mut delivered = 0;
        while let Some(message) = self.try_next() {
            reconciler.ingest_feed_message(&message);
            delivered += 1;
        }
        delivered
    }
}
