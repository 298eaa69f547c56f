use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::common::{ConversationId, Message, MessageId, Origin, UserId};

/// Result of feeding one live message into the merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Appended,
    /// The echo of one of our optimistic entries; the entry was replaced.
    Reconciled,
    Duplicate,
    /// Scoped to another conversation.
    Ignored,
}

/// Timeline of one conversation built from three sources: the history fetch,
/// the live feed and locally authored entries still awaiting confirmation.
///
/// Server ids are unique across the timeline. Optimistic entries are
/// correlated with their server copies through `client_id`.
#[derive(Debug)]
pub struct MessageMerger {
    conversation_id: ConversationId,
    history: Vec<Message>,
    live: Vec<Message>,
    pending: Vec<Message>,
    loading: bool,
}

impl MessageMerger {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            history: Vec::new(),
            live: Vec::new(),
            pending: Vec::new(),
            loading: true,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// True until the history fetch resolves, successfully or not.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Seeds the baseline from the history fetch.
    pub fn load(&mut self, messages: Vec<Message>) {
        let mut history: Vec<Message> = Vec::with_capacity(messages.len());
        for message in messages {
            if message.conversation_id != self.conversation_id {
                continue;
            }
            if history.iter().any(|known| known.id == message.id) {
                continue;
            }
            history.push(message.with_origin(Origin::History));
        }
        let stored_by_us = |entry: &Message| {
            history
                .iter()
                .any(|known| known.client_id.is_some() && known.client_id == entry.client_id)
        };
        self.live.retain(|live| {
            !history.iter().any(|known| known.id == live.id)
                && !(live.id.is_temporary() && stored_by_us(live))
        });
        self.pending.retain(|pending| !stored_by_us(pending));
        self.history = history;
        self.loading = false;
    }

    /// History fetch failed; stop showing the loading state.
    pub fn load_failed(&mut self) {
        self.loading = false;
    }

    pub fn push_live(&mut self, message: Message) -> LiveOutcome {
        if message.conversation_id != self.conversation_id {
            return LiveOutcome::Ignored;
        }
        if self.contains_id(&message.id) {
            return LiveOutcome::Duplicate;
        }
        let reconciled = match message.client_id {
            Some(client_id) => {
                self.take_pending(client_id).is_some() || self.take_stand_in(client_id)
            }
            None => false,
        };
        self.live.push(message.with_origin(Origin::Live));
        if reconciled {
            LiveOutcome::Reconciled
        } else {
            LiveOutcome::Appended
        }
    }

    /// Inserts a locally authored entry and returns it; its id is temporary.
    pub fn send_optimistic(&mut self, body: String, sender_id: UserId, sent_at: DateTime<Utc>) -> Message {
        let message = Message::optimistic(self.conversation_id.clone(), sender_id, body, sent_at);
        self.pending.push(message.clone());
        message
    }

    /// The durable write succeeded. Retires the optimistic entry and, when the
    /// canonical copy is known, shows it in its place. A canonical copy that
    /// still carries the temporary id stands in until the live echo or the
    /// next history load replaces it. A repeated call, or one for an entry
    /// already retired by its live echo, changes nothing.
    pub fn confirm(&mut self, temp_id: Uuid, canonical: Option<Message>) -> bool {
        let retired = self.take_pending(temp_id).is_some();
        if let Some(canonical) = canonical {
            if canonical.conversation_id == self.conversation_id
                && !self.contains_id(&canonical.id)
            {
                self.live.push(canonical.with_origin(Origin::Live));
                return true;
            }
        }
        retired
    }

    /// The durable write failed. Returns the removed entry on the first call only.
    pub fn reject(&mut self, temp_id: Uuid) -> Option<Message> {
        self.take_pending(temp_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Read model: every source, ascending by `sent_at`, ties kept in
    /// insertion order.
    pub fn merged(&self) -> Vec<Message> {
        let mut all: Vec<Message> = self
            .history
            .iter()
            .chain(self.live.iter())
            .chain(self.pending.iter())
            .cloned()
            .collect();
        all.sort_by_key(|message| message.sent_at);
        all
    }

    pub fn len(&self) -> usize {
        self.history.len() + self.live.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains_id(&self, id: &MessageId) -> bool {
        self.history
            .iter()
            .chain(self.live.iter())
            .any(|known| &known.id == id)
    }

    fn take_stand_in(&mut self, client_id: Uuid) -> bool {
        let before = self.live.len();
        self.live
            .retain(|live| live.id != MessageId::Temporary(client_id));
        self.live.len() != before
    }

    fn take_pending(&mut self, temp_id: Uuid) -> Option<Message> {
        let position = self
            .pending
            .iter()
            .position(|pending| pending.id == MessageId::Temporary(temp_id))?;
        Some(self.pending.remove(position))
    }
}
