use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;

use crate::common::UserId;
use crate::network::channel::PushChannel;
use crate::network::wire::OutboundEvent;

/// Immutable view of who is online right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    online: HashSet<UserId>,
}

impl PresenceSnapshot {
    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    pub fn sorted_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.online.iter().cloned().collect();
        ids.sort();
        ids
    }
}

/// Tracks the online set. The server always sends the complete set, so every
/// broadcast replaces the previous snapshot wholesale.
pub struct PresenceTracker {
    channel: Arc<PushChannel>,
    self_id: Option<UserId>,
    snapshots: watch::Sender<Arc<PresenceSnapshot>>,
}

impl PresenceTracker {
    pub fn new(channel: Arc<PushChannel>, self_id: Option<UserId>) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(PresenceSnapshot::default()));
        Self {
            channel,
            self_id,
            snapshots,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PresenceSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Arc<PresenceSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.snapshots.borrow().is_online(user_id)
    }

    /// Connects the shared channel if nobody has yet. The announcement
    /// itself happens in [`Self::on_connected`].
    pub async fn start(&self) -> Result<(), crate::error::ChannelError> {
        self.channel.connect().await
    }

    /// Registers this client for presence; called on every (re)connection.
    pub fn on_connected(&self) {
        let Some(user_id) = self.self_id.clone() else {
            log::debug!("No local user id; skipping presence announcement");
            return;
        };
        if let Err(err) = self.channel.emit(OutboundEvent::AddUser(user_id)) {
            log::warn!("Failed to announce presence: {err}");
        }
    }

    /// Applies a full snapshot. Returns whether anything changed.
    pub fn replace(&self, online_user_ids: Vec<UserId>) -> bool {
        let next = PresenceSnapshot {
            online: online_user_ids.into_iter().collect(),
        };
        log::debug!("Presence snapshot: {} users online", next.len());
        self.snapshots.send_if_modified(|current| {
            if **current == next {
                false
            } else {
                *current = Arc::new(next);
                true
            }
        })
    }
}
