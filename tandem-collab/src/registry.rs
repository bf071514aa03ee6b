//! Per-document fan-out to N-1 members with no echo.
//!
//! Each document id maps to a channel holding its members' outboxes. A
//! broadcast enqueues the whole frame to every member except the sender
//! while holding the channel lock, so joins and leaves never interleave
//! with a half-delivered frame and each sender's frames arrive in order.
//!
//! Outboxes are unbounded: `broadcast` never waits on a slow member.
//!
//! ```text
//! registry ── "doc-a" ── Channel { [m1, m2, m3] }
//!          └─ "doc-b" ── Channel { [m4] }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

/// Identifies one connection across every channel it joins.
pub type ConnectionId = Uuid;

/// An encoded command, shared between every outbox it is delivered to.
pub type Frame = Arc<Vec<u8>>;

/// A channel member: its id and the outbox frames are pushed into.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: ConnectionId,
    outbox: mpsc::UnboundedSender<Frame>,
}

impl Member {
    pub fn new(id: ConnectionId, outbox: mpsc::UnboundedSender<Frame>) -> Self {
        Self { id, outbox }
    }

    /// A member together with the receiving end of its outbox.
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }
}

/// Result of [`ChannelRegistry::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyMember,
    /// The channel is at its member limit.
    Full,
}

impl JoinOutcome {
    pub fn joined(self) -> bool {
        self == JoinOutcome::Joined
    }
}

/// Snapshot of registry activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub frames_broadcast: u64,
    pub frames_delivered: u64,
    /// Deliveries skipped because the member's outbox was gone.
    pub frames_dropped: u64,
    pub active_channels: usize,
    pub active_members: usize,
}

/// Counters updated without taking any channel lock.
#[derive(Default)]
struct AtomicRegistryStats {
    frames_broadcast: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
}

#[derive(Default)]
struct ChannelState {
    members: Vec<Member>,
    /// Set once the channel empties; a retired channel is never joined again.
    retired: bool,
}

#[derive(Default)]
struct Channel {
    state: Mutex<ChannelState>,
}

/// Document id → channel of members.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    max_members: usize,
    stats: AtomicRegistryStats,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_max_members(usize::MAX)
    }

    /// Create a registry that refuses joins beyond `max_members` per channel.
    pub fn with_max_members(max_members: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            max_members,
            stats: AtomicRegistryStats::default(),
        }
    }

    /// Subscribe `member` to `doc_id`, creating the channel on first join.
    pub async fn join(&self, doc_id: &str, member: Member) -> JoinOutcome {
        loop {
            let channel = self.get_or_create(doc_id).await;
            let mut state = channel.state.lock().await;
            if state.retired {
                // Lost a race with the last leaver; the map entry is gone or
                // about to be.
                drop(state);
                self.remove_retired(doc_id, &channel).await;
                continue;
            }
            if state.members.iter().any(|m| m.id == member.id) {
                return JoinOutcome::AlreadyMember;
            }
            if state.members.len() >= self.max_members {
                log::warn!("channel {doc_id} full, refusing {}", member.id);
                return JoinOutcome::Full;
            }
            log::debug!("{} joined channel {doc_id}", member.id);
            state.members.push(member);
            return JoinOutcome::Joined;
        }
    }

    /// Deliver `frame` to every member of `doc_id` except `sender`.
    ///
    /// Returns the number of members the frame was enqueued for. Members
    /// whose outbox has closed are pruned.
    pub async fn broadcast(&self, doc_id: &str, frame: Frame, sender: ConnectionId) -> usize {
        let Some(channel) = self.channel(doc_id).await else {
            log::trace!("broadcast to unknown channel {doc_id}");
            return 0;
        };

        let mut state = channel.state.lock().await;
        let mut delivered = 0;
        let mut dropped = 0;
        state.members.retain(|member| {
            if member.id == sender {
                return true;
            }
            if member.outbox.send(frame.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                dropped += 1;
                false
            }
        });
        let emptied = !state.retired && state.members.is_empty();
        if emptied {
            state.retired = true;
        }
        drop(state);

        self.stats.frames_broadcast.fetch_add(1, Ordering::Relaxed);
        self.stats
            .frames_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        if dropped > 0 {
            log::debug!("pruned {dropped} closed outboxes from channel {doc_id}");
            self.stats
                .frames_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        if emptied {
            self.remove_retired(doc_id, &channel).await;
        }
        delivered
    }

    /// Unsubscribe `id` from `doc_id`. Returns false if it was not a member.
    pub async fn leave(&self, doc_id: &str, id: ConnectionId) -> bool {
        let Some(channel) = self.channel(doc_id).await else {
            return false;
        };
        let mut state = channel.state.lock().await;
        let before = state.members.len();
        state.members.retain(|m| m.id != id);
        let removed = state.members.len() != before;
        let emptied = removed && state.members.is_empty();
        if emptied {
            state.retired = true;
        }
        drop(state);

        if removed {
            log::debug!("{id} left channel {doc_id}");
        }
        if emptied {
            self.remove_retired(doc_id, &channel).await;
        }
        removed
    }

    /// Remove `id` from every channel. Returns how many it was removed from;
    /// calling again is harmless and returns 0.
    pub async fn disconnect(&self, id: ConnectionId) -> usize {
        let doc_ids: Vec<String> = self.channels.read().await.keys().cloned().collect();
        let mut removed = 0;
        for doc_id in doc_ids {
            if self.leave(&doc_id, id).await {
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("{id} disconnected from {removed} channel(s)");
        }
        removed
    }

    /// Ids of the members of `doc_id`, in join order.
    pub async fn members(&self, doc_id: &str) -> Vec<ConnectionId> {
        match self.channel(doc_id).await {
            Some(channel) => channel.state.lock().await.members.iter().map(|m| m.id).collect(),
            None => Vec::new(),
        }
    }

    pub async fn member_count(&self, doc_id: &str) -> usize {
        match self.channel(doc_id).await {
            Some(channel) => channel.state.lock().await.members.len(),
            None => 0,
        }
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Document ids with at least one member.
    pub async fn active_documents(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        let channels: Vec<Arc<Channel>> = self.channels.read().await.values().cloned().collect();
        let mut active_members = 0;
        for channel in &channels {
            active_members += channel.state.lock().await.members.len();
        }
        RegistryStats {
            frames_broadcast: self.stats.frames_broadcast.load(Ordering::Relaxed),
            frames_delivered: self.stats.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            active_channels: channels.len(),
            active_members,
        }
    }

    async fn channel(&self, doc_id: &str) -> Option<Arc<Channel>> {
        self.channels.read().await.get(doc_id).cloned()
    }

    async fn get_or_create(&self, doc_id: &str) -> Arc<Channel> {
        // Fast path: read lock
        if let Some(channel) = self.channel(doc_id).await {
            return channel;
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(doc_id.to_owned())
            .or_insert_with(|| {
                log::debug!("channel {doc_id} opened");
                Arc::new(Channel::default())
            })
            .clone()
    }

    /// Drop the map entry for a retired channel, unless a fresh channel has
    /// already replaced it.
    async fn remove_retired(&self, doc_id: &str, channel: &Arc<Channel>) {
        let mut channels = self.channels.write().await;
        if channels.get(doc_id).is_some_and(|c| Arc::ptr_eq(c, channel)) {
            channels.remove(doc_id);
            log::debug!("channel {doc_id} retired");
        }
    }
}
