//! Per-request progress channels.
//!
//! A [`ProgressHub`] keeps one bounded channel per request id. The
//! orchestrator pushes [`ProgressEvent`]s into it without ever blocking and a
//! single HTTP consumer drains it (see [`feed`]). Channels are removed by one
//! maintenance task ([`ProgressHub::spawn_reaper`]) once their deadline
//! passes: ten minutes after opening, or a short grace period after the
//! operation finished.

use crate::env::progress::{CHANNEL_CAPACITY, IDLE_TTL};
use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, BorrowMut};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

pub mod feed;

pub use feed::{FeedItem, drain};

/// One advisory progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percent: u8,
    pub message: String,
    pub error: bool,
}

impl ProgressEvent {
    pub fn step(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
            error: false,
        }
    }

    pub fn failed(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
            error: true,
        }
    }

    /// The event consumers synthesize when a channel closes without one.
    pub fn done() -> Self {
        Self::step(100, "done")
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        self.error || self.percent >= 100
    }
}

struct Slot {
    sender: mpsc::Sender<ProgressEvent>,
    receiver: Option<mpsc::Receiver<ProgressEvent>>,
    deadline: Instant,
    generation: u64,
}

/// Registry of request id → bounded queue + expiry deadline.
///
/// All table access goes through one mutex; no lock is held across an await.
pub struct ProgressHub {
    slots: Mutex<HashMap<String, Slot>>,
    capacity: usize,
    ttl: Duration,
    generations: AtomicU64,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::with_limits(CHANNEL_CAPACITY, IDLE_TTL)
    }

    pub fn with_limits(capacity: usize, ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
            generations: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fresh_slot(&self) -> Slot {
        let (sender, receiver) = mpsc::channel(self.capacity);
        Slot {
            sender,
            receiver: Some(receiver),
            deadline: Instant::now() + self.ttl,
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Open a fresh channel for `id`, closing any channel already open for it.
    pub fn open(&self, id: &str) {
        let slot = self.fresh_slot();

        // The replaced slot is dropped while the lock is held, so its sender
        // is gone before the new channel can be observed.
        let mut slots = self.slots();
        if slots.insert(id.to_string(), slot).is_some() {
            debug!("Replaced progress channel {}", id);
        } else {
            debug!("Opened progress channel {}", id);
        }
    }

    /// Open a channel for `id` unless one is already open. Returns whether a
    /// channel was created.
    pub fn open_if_absent(&self, id: &str) -> bool {
        let mut slots = self.slots();
        if slots.contains_key(id) {
            return false;
        }
        let slot = self.fresh_slot();
        slots.insert(id.to_string(), slot);
        debug!("Opened progress channel {}", id);
        true
    }

    /// Push an event without waiting. Dropped if the channel is full, closed
    /// or absent.
    pub fn send(&self, id: &str, event: ProgressEvent) {
        let slots = self.slots();
        let Some(slot) = slots.get(id) else {
            trace!("No progress channel {} for {:?}", id, event);
            return;
        };
        if let Err(e) = slot.sender.try_send(event) {
            trace!("Dropped progress event for {}: {}", id, e);
        }
    }

    /// Take the receiving end of `id`'s channel. Only one consumer may drain a
    /// channel.
    ///
    /// # Errors
    ///
    /// `NotFound` if no channel is open for `id`, `Conflict` if another
    /// consumer already holds it.
    pub fn subscribe(&self, id: &str) -> Result<mpsc::Receiver<ProgressEvent>> {
        self.take(id).map(|(receiver, _)| receiver)
    }

    /// Like [`subscribe`](Self::subscribe), but the receiver goes back to the
    /// channel when the returned [`Subscription`] is dropped, so a consumer
    /// that disconnects can reconnect and pick up the remaining events.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn attach(self: &Arc<Self>, id: &str) -> Result<Subscription> {
        let (receiver, generation) = self.take(id)?;
        Ok(Subscription {
            hub: Arc::clone(self),
            id: id.to_string(),
            generation,
            receiver,
        })
    }

    fn take(&self, id: &str) -> Result<(mpsc::Receiver<ProgressEvent>, u64)> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| ServerError::NotFound(format!("progress channel {}", id)))?;
        let receiver = slot.receiver.take().ok_or_else(|| {
            ServerError::Conflict(format!("progress channel {} already has a consumer", id))
        })?;
        Ok((receiver, slot.generation))
    }

    /// Hand a receiver back to its channel. Ignored when the channel was
    /// removed or reopened since the receiver was taken.
    fn restore(&self, id: &str, generation: u64, receiver: mpsc::Receiver<ProgressEvent>) {
        let mut slots = self.slots();
        match slots.get_mut(id) {
            Some(slot) if slot.generation == generation && slot.receiver.is_none() => {
                slot.receiver = Some(receiver);
                debug!("Released progress channel {}", id);
            }
            _ => trace!("Progress channel {} is gone, dropping its receiver", id),
        }
    }

    /// Close and forget `id`'s channel. Calling it again is a no-op.
    pub fn remove(&self, id: &str) {
        if self.slots().remove(id).is_some() {
            debug!("Removed progress channel {}", id);
        }
    }

    /// Move `id`'s deadline to `grace` from now.
    pub fn expire_after(&self, id: &str, grace: Duration) {
        if let Some(slot) = self.slots().get_mut(id) {
            slot.deadline = Instant::now() + grace;
        }
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.slots().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every channel whose deadline is at or before `now`.
    pub fn reap_expired(&self, now: Instant) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| slot.deadline > now);
        before - slots.len()
    }

    /// Run [`reap_expired`](Self::reap_expired) every `interval` until
    /// `shutdown` fires.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = hub.reap_expired(Instant::now());
                        if reaped > 0 {
                            debug!("Reaped {} expired progress channels", reaped);
                        }
                    }
                }
            }
            info!("Progress reaper stopped");
        })
    }
}

/// Exclusive hold on one channel's receiver, released back to the hub on drop.
pub struct Subscription {
    hub: Arc<ProgressHub>,
    id: String,
    generation: u64,
    receiver: mpsc::Receiver<ProgressEvent>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Deref for Subscription {
    type Target = mpsc::Receiver<ProgressEvent>;

    fn deref(&self) -> &Self::Target {
        &self.receiver
    }
}

impl DerefMut for Subscription {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.receiver
    }
}

impl Borrow<mpsc::Receiver<ProgressEvent>> for Subscription {
    fn borrow(&self) -> &mpsc::Receiver<ProgressEvent> {
        self
    }
}

impl BorrowMut<mpsc::Receiver<ProgressEvent>> for Subscription {
    fn borrow_mut(&mut self) -> &mut mpsc::Receiver<ProgressEvent> {
        self
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Swap in a closed placeholder so the live receiver can move out.
        let (_, placeholder) = mpsc::channel(1);
        let receiver = std::mem::replace(&mut self.receiver, placeholder);
        self.hub.restore(&self.id, self.generation, receiver);
    }
}
