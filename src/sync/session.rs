use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::common::{
    ClientEvent, Conversation, ConversationId, ConversationSession, ConversationView, Message,
    Notice, User, UserId,
};
use crate::config::{AppConfig, SendFailurePolicy};
use crate::error::ApiError;
use crate::network::channel::{ConversationEvent, ConversationFeed, PushChannel};
use crate::network::wire::{EchoPayload, OutboundEvent};

use super::merger::{LiveOutcome, MessageMerger};
use super::presence::PresenceSnapshot;
use super::typing::TypingController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Active,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub self_id: Option<UserId>,
    pub typing_quiet: Duration,
    pub peer_typing_timeout: Duration,
    pub failure_policy: SendFailurePolicy,
}

impl From<&AppConfig> for SessionSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            self_id: config.user_id.clone(),
            typing_quiet: config.typing_quiet(),
            peer_typing_timeout: config.peer_typing_timeout(),
            failure_policy: config.send_failure_policy,
        }
    }
}

/// A durable send in flight, handed back through [`SessionCoordinator::send_finished`].
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub generation: u64,
    pub conversation_id: ConversationId,
    pub temp_id: Uuid,
    pub text: String,
    /// The entry shown while the write is in flight.
    pub optimistic: Message,
}

struct ActiveConversation {
    session: ConversationSession,
    generation: u64,
    /// Tag of the history fetch whose result is still wanted.
    history_generation: u64,
    merger: MessageMerger,
    typing: TypingController,
    feed: ConversationFeed,
}

/// Binds presence, typing and the merged timeline to the one conversation
/// that is open, and turns every change into events for the view.
///
/// Async completions carry the generation they were started under and are
/// dropped when it no longer matches.
pub struct SessionCoordinator {
    channel: Arc<PushChannel>,
    presence: watch::Receiver<Arc<PresenceSnapshot>>,
    settings: SessionSettings,
    active: Option<ActiveConversation>,
    generation: u64,
    peer_ticket: u64,
    last_len: usize,
    last_peer_typing: bool,
    outbox: Vec<ClientEvent>,
}

impl SessionCoordinator {
    pub fn new(
        channel: Arc<PushChannel>,
        presence: watch::Receiver<Arc<PresenceSnapshot>>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            channel,
            presence,
            settings,
            active: None,
            generation: 0,
            peer_ticket: 0,
            last_len: 0,
            last_peer_typing: false,
            outbox: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        match &self.active {
            None => Phase::Idle,
            Some(active) if active.merger.is_loading() => Phase::Loading,
            Some(_) => Phase::Active,
        }
    }

    pub fn active_conversation_id(&self) -> Option<&str> {
        self.active
            .as_ref()
            .map(|active| active.session.conversation_id.as_str())
    }

    pub fn view(&self) -> Option<ConversationView> {
        self.active.as_ref().map(|active| ConversationView {
            session: active.session.clone(),
            peer_online: self.presence.borrow().is_online(&active.session.peer_id),
            peer_is_typing: active.typing.peer_is_typing(),
            is_loading: active.merger.is_loading(),
            messages: active.merger.merged(),
        })
    }

    /// Merged timeline of the open conversation; empty when idle.
    pub fn merged(&self) -> Vec<Message> {
        self.active
            .as_ref()
            .map(|active| active.merger.merged())
            .unwrap_or_default()
    }

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Opens `session`, replacing whatever was open. Returns the generation
    /// the history fetch must be tagged with, or `None` if it is already open.
    pub fn open(&mut self, session: ConversationSession) -> Option<u64> {
        if self.active_conversation_id() == Some(session.conversation_id.as_str()) {
            return None;
        }
        self.peer_ticket += 1;
        // Unsubscribe the old feed before the new one exists.
        self.teardown();

        self.generation += 1;
        let conversation_id = session.conversation_id.clone();
        log::info!(
            "Opening conversation {conversation_id} with {}",
            session.peer_id
        );
        let typing = TypingController::new(
            conversation_id.clone(),
            self.settings.self_id.clone().unwrap_or_default(),
            self.settings.typing_quiet,
            self.settings.peer_typing_timeout,
        );
        self.active = Some(ActiveConversation {
            feed: self.channel.subscribe_conversation(conversation_id.clone()),
            merger: MessageMerger::new(conversation_id),
            typing,
            session,
            generation: self.generation,
            history_generation: self.generation,
        });
        self.last_len = 0;
        self.last_peer_typing = false;
        self.publish();
        Some(self.generation)
    }

    pub fn close(&mut self) {
        self.peer_ticket += 1;
        if self.active.is_some() {
            self.teardown();
            self.publish();
        }
    }

    fn teardown(&mut self) {
        if let Some(mut previous) = self.active.take() {
            if previous.typing.is_composing() {
                let signal = previous.typing.stop();
                self.push(previous.typing.to_event(signal));
            }
            log::info!("Closed conversation {}", previous.session.conversation_id);
        }
    }

    /// Starts a peer selection; the ticket invalidates older selections.
    pub fn select_peer(&mut self) -> u64 {
        self.peer_ticket += 1;
        self.peer_ticket
    }

    /// Create-or-get finished for a peer selection. Returns the generation
    /// to fetch history for when the selection is still wanted.
    pub fn peer_conversation_ready(
        &mut self,
        ticket: u64,
        peer: User,
        result: Result<Conversation, ApiError>,
    ) -> Option<u64> {
        if ticket != self.peer_ticket {
            log::debug!("Discarding superseded peer selection for {}", peer.id);
            return None;
        }
        match result {
            Ok(conversation) => {
                self.open(ConversationSession::with_peer(conversation.id, &peer))
            }
            Err(err) => {
                log::warn!("Failed to open conversation with {}: {err}", peer.id);
                self.notify(err.to_notice("Could not open conversation"));
                None
            }
        }
    }

    pub fn history_loaded(&mut self, generation: u64, result: Result<Vec<Message>, ApiError>) {
        let Some(active) = self
            .active
            .as_mut()
            .filter(|active| active.history_generation == generation)
        else {
            log::debug!("Discarding history for a conversation that is no longer open");
            return;
        };
        match result {
            Ok(messages) => {
                log::debug!(
                    "Loaded {} messages for {}",
                    messages.len(),
                    active.session.conversation_id
                );
                active.merger.load(messages);
            }
            Err(err) => {
                log::warn!(
                    "History fetch failed for {}: {err}",
                    active.session.conversation_id
                );
                active.merger.load_failed();
                self.notify(err.to_notice("Could not load messages"));
            }
        }
        self.publish();
    }

    /// Next event from the open conversation's feed. Pending forever while idle.
    pub async fn next_conversation_event(&mut self) -> Option<ConversationEvent> {
        match self.active.as_mut() {
            Some(active) => active.feed.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Applies one event from the open conversation's feed. Returns the
    /// generation of a history refetch when the feed lost events.
    pub fn on_conversation_event(&mut self, event: ConversationEvent, now: Instant) -> Option<u64> {
        let self_id = self.settings.self_id.clone();
        let active = self.active.as_mut()?;
        let changed = match event {
            ConversationEvent::Message(message) => {
                !matches!(
                    active.merger.push_live(message),
                    LiveOutcome::Duplicate | LiveOutcome::Ignored
                )
            }
            ConversationEvent::TypingStarted(user_id) if Some(&user_id) != self_id.as_ref() => {
                active.typing.on_peer_start(now)
            }
            ConversationEvent::TypingStopped(user_id) if Some(&user_id) != self_id.as_ref() => {
                active.typing.on_peer_stop()
            }
            ConversationEvent::TypingStarted(_) | ConversationEvent::TypingStopped(_) => false,
            ConversationEvent::Resync => {
                self.generation += 1;
                active.history_generation = self.generation;
                log::warn!(
                    "Reloading history for {} after missed live events",
                    active.session.conversation_id
                );
                let generation = self.generation;
                self.notify(Notice::transient(
                    "Live updates fell behind; reloading messages",
                ));
                return Some(generation);
            }
        };
        if changed {
            self.publish();
        }
        None
    }

    pub fn on_presence_changed(&mut self) {
        if self.active.is_some() {
            self.publish();
        }
    }

    /// Keystroke in the compose box. Without a local user id there is
    /// nobody to attribute typing to, so nothing is signalled.
    pub fn on_input(&mut self, now: Instant) {
        if self.settings.self_id.is_none() {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Some(signal) = active.typing.on_input(now) {
            let event = active.typing.to_event(signal);
            self.push(event);
        }
    }

    /// Compose box lost focus.
    pub fn on_blur(&mut self) {
        if self.settings.self_id.is_none() {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let signal = active.typing.stop();
        let event = active.typing.to_event(signal);
        self.push(event);
    }

    /// Shows `text` optimistically and returns what the durable send needs.
    /// Blank text or no open conversation is a no-op.
    pub fn begin_send(&mut self, text: &str) -> Option<PendingSend> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let Some(sender_id) = self.settings.self_id.clone() else {
            self.notify(Notice::auth_required("Sign in before sending messages"));
            return None;
        };
        let active = self.active.as_mut()?;
        let signal = active.typing.stop();
        let stop = active.typing.to_event(signal);
        let optimistic = active
            .merger
            .send_optimistic(text.to_string(), sender_id, Utc::now());
        let client_id = optimistic.client_id?;
        let pending = PendingSend {
            generation: active.generation,
            conversation_id: active.session.conversation_id.clone(),
            temp_id: client_id,
            text: text.to_string(),
            optimistic,
        };
        self.push(stop);
        self.publish();
        Some(pending)
    }

    /// Result of the durable write. `Ok(None)` means the write was accepted
    /// but the stored copy could not be read back; the local entry then
    /// stands in for it.
    pub fn send_finished(
        &mut self,
        pending: PendingSend,
        result: Result<Option<Message>, ApiError>,
    ) {
        match result {
            Ok(canonical) => {
                let stored = canonical.unwrap_or_else(|| pending.optimistic.clone());
                self.push(OutboundEvent::SendMessage(EchoPayload {
                    conversation_id: pending.conversation_id.clone(),
                    message: stored.clone(),
                }));
                if let Some(active) = self.current_mut(pending.generation) {
                    if active.merger.confirm(pending.temp_id, Some(stored)) {
                        self.publish();
                    }
                }
            }
            Err(err) => {
                log::warn!(
                    "Durable send failed in {}: {err}",
                    pending.conversation_id
                );
                if let Some(active) = self.current_mut(pending.generation) {
                    if active.merger.reject(pending.temp_id).is_some() {
                        self.publish();
                    }
                }
                self.notify(err.to_notice("Message not sent"));
                if self.settings.failure_policy == SendFailurePolicy::Retain {
                    self.outbox.push(ClientEvent::RestoreDraft {
                        conversation_id: pending.conversation_id,
                        text: pending.text,
                    });
                }
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.active
            .as_ref()
            .and_then(|active| active.typing.next_deadline())
    }

    /// Fires expired typing timers.
    pub fn tick(&mut self, now: Instant) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let (signal, peer_flipped) = active.typing.poll(now);
        if let Some(signal) = signal {
            let event = active.typing.to_event(signal);
            self.push(event);
        }
        if peer_flipped {
            self.publish();
        }
    }

    fn current_mut(&mut self, generation: u64) -> Option<&mut ActiveConversation> {
        self.active
            .as_mut()
            .filter(|active| active.generation == generation)
    }

    fn push(&self, event: OutboundEvent) {
        if let Err(err) = self.channel.emit(event) {
            log::debug!("Push event not sent: {err}");
        }
    }

    fn notify(&mut self, notice: Notice) {
        self.outbox.push(ClientEvent::Notice(notice));
    }

    fn publish(&mut self) {
        let view = self.view();
        if let Some(view) = &view {
            let len = view.messages.len();
            if len != self.last_len || view.peer_is_typing != self.last_peer_typing {
                self.last_len = len;
                self.last_peer_typing = view.peer_is_typing;
                self.outbox.push(ClientEvent::View(Some(view.clone())));
                self.outbox.push(ClientEvent::ScrollToLatest);
                return;
            }
        }
        self.outbox.push(ClientEvent::View(view));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{MessageId, NoticeKind, Origin};
    use crate::network::transport::{MemoryPeer, MemoryTransport};
    use crate::network::wire::InboundEvent;
    use crate::sync::presence::PresenceTracker;
    use chrono::TimeZone;

    struct Harness {
        coordinator: SessionCoordinator,
        presence: PresenceTracker,
        peer: MemoryPeer,
    }

    async fn harness(policy: SendFailurePolicy) -> Harness {
        harness_with(Some("me"), policy, 64).await
    }

    async fn harness_with(
        self_id: Option<&str>,
        policy: SendFailurePolicy,
        capacity: usize,
    ) -> Harness {
        let (transport, mut accepted) = MemoryTransport::new();
        let channel = PushChannel::new(Box::new(transport), capacity);
        channel.connect().await.unwrap();
        let peer = accepted.recv().await.unwrap();
        let self_id: Option<UserId> = self_id.map(Into::into);
        let presence = PresenceTracker::new(Arc::clone(&channel), self_id.clone());
        let coordinator = SessionCoordinator::new(
            channel,
            presence.subscribe(),
            SessionSettings {
                self_id,
                typing_quiet: Duration::from_millis(2000),
                peer_typing_timeout: Duration::from_millis(5000),
                failure_policy: policy,
            },
        );
        Harness {
            coordinator,
            presence,
            peer,
        }
    }

    fn session(id: &str) -> ConversationSession {
        ConversationSession {
            conversation_id: id.into(),
            peer_id: "peer".into(),
            peer_display_name: "Peer".into(),
            peer_avatar_ref: None,
        }
    }

    fn message(conversation_id: &str, id: &str, minute: u32) -> Message {
        Message {
            id: MessageId::Server(id.into()),
            conversation_id: conversation_id.into(),
            sender_id: "peer".into(),
            body: id.into(),
            sent_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
            client_id: None,
            origin: Origin::History,
        }
    }

    fn sent(peer: &mut MemoryPeer) -> Vec<OutboundEvent> {
        let mut out = Vec::new();
        while let Ok(event) = peer.received.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn lifecycle_idle_loading_active() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert!(h.coordinator.merged().is_empty());

        let generation = h.coordinator.open(session("a")).unwrap();
        assert_eq!(h.coordinator.phase(), Phase::Loading);
        let view = h.coordinator.view().unwrap();
        assert!(view.is_loading);

        h.coordinator
            .history_loaded(generation, Ok(vec![message("a", "m1", 0)]));
        assert_eq!(h.coordinator.phase(), Phase::Active);
        assert_eq!(h.coordinator.merged().len(), 1);

        h.coordinator.close();
        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert_eq!(h.coordinator.drain_events().last(), Some(&ClientEvent::View(None)));
    }

    #[tokio::test]
    async fn reopening_same_conversation_is_a_no_op() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        assert!(h.coordinator.open(session("a")).is_some());
        assert!(h.coordinator.open(session("a")).is_none());
    }

    #[tokio::test]
    async fn failed_history_still_leaves_loading() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        let generation = h.coordinator.open(session("a")).unwrap();
        h.coordinator.drain_events();
        h.coordinator.history_loaded(
            generation,
            Err(ApiError::Status {
                status: 500,
                body: String::new(),
            }),
        );
        assert_eq!(h.coordinator.phase(), Phase::Active);
        let events = h.coordinator.drain_events();
        assert!(events.iter().any(|event| matches!(
            event,
            ClientEvent::Notice(Notice { kind: NoticeKind::Transient, .. })
        )));
    }

    #[tokio::test]
    async fn stale_history_is_discarded() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        let first = h.coordinator.open(session("a")).unwrap();
        let second = h.coordinator.open(session("b")).unwrap();
        h.coordinator
            .history_loaded(first, Ok(vec![message("a", "m1", 0)]));
        assert_eq!(h.coordinator.phase(), Phase::Loading);
        h.coordinator.history_loaded(second, Ok(Vec::new()));
        assert!(h.coordinator.merged().is_empty());
    }

    #[tokio::test]
    async fn switching_isolates_live_events() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        h.coordinator.open(session("a")).unwrap();
        let generation = h.coordinator.open(session("b")).unwrap();
        h.coordinator.history_loaded(generation, Ok(Vec::new()));

        h.peer
            .push
            .send(InboundEvent::Chat(message("a", "late-a", 1)))
            .unwrap();
        h.peer
            .push
            .send(InboundEvent::Chat(message("b", "for-b", 2)))
            .unwrap();

        let event = h.coordinator.next_conversation_event().await.unwrap();
        assert_eq!(
            event,
            ConversationEvent::Message(message("b", "for-b", 2))
        );
        h.coordinator.on_conversation_event(event, Instant::now());
        let merged = h.coordinator.merged();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, MessageId::Server("for-b".into()));
    }

    #[tokio::test]
    async fn send_round_trip_has_no_duplicate() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        let generation = h.coordinator.open(session("a")).unwrap();
        h.coordinator.history_loaded(
            generation,
            Ok(vec![message("a", "m1", 0), message("a", "m2", 1)]),
        );

        let pending = h.coordinator.begin_send("  hi  ").unwrap();
        assert_eq!(pending.text, "hi");
        let merged = h.coordinator.merged();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[2].origin, Origin::Optimistic);

        let mut canonical = message("a", "m3", 2);
        canonical.sender_id = "me".into();
        canonical.sent_at = Utc::now();
        canonical.client_id = Some(pending.temp_id);
        h.coordinator.send_finished(pending, Ok(Some(canonical.clone())));

        let event = ConversationEvent::Message(canonical.clone());
        h.coordinator.on_conversation_event(event, Instant::now());

        let merged = h.coordinator.merged();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[2].id, MessageId::Server("m3".into()));

        let out = sent(&mut h.peer);
        assert!(out.iter().any(|event| matches!(event, OutboundEvent::TypingStop(_))));
        assert!(out.contains(&OutboundEvent::SendMessage(EchoPayload {
            conversation_id: "a".into(),
            message: canonical,
        })));
    }

    #[tokio::test]
    async fn accepted_send_without_stored_copy_keeps_message() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        let generation = h.coordinator.open(session("a")).unwrap();
        h.coordinator
            .history_loaded(generation, Ok(vec![message("a", "m1", 0)]));

        let pending = h.coordinator.begin_send("hi").unwrap();
        let optimistic = pending.optimistic.clone();
        h.coordinator.drain_events();
        h.coordinator.send_finished(pending, Ok(None));

        let merged = h.coordinator.merged();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].body, "hi");
        assert!(!h
            .coordinator
            .drain_events()
            .iter()
            .any(|event| matches!(event, ClientEvent::Notice(_))));
        assert!(sent(&mut h.peer).contains(&OutboundEvent::SendMessage(EchoPayload {
            conversation_id: "a".into(),
            message: optimistic,
        })));
    }

    #[tokio::test]
    async fn lagging_feed_reloads_history() {
        let mut h = harness_with(Some("me"), SendFailurePolicy::Discard, 4).await;
        let generation = h.coordinator.open(session("a")).unwrap();
        h.coordinator.history_loaded(generation, Ok(Vec::new()));
        h.coordinator.drain_events();

        let pushed: Vec<Message> = (0..10)
            .map(|n| message("a", &format!("m{n}"), n))
            .collect();
        for m in &pushed {
            h.peer.push.send(InboundEvent::Chat(m.clone())).unwrap();
        }
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        let event = h.coordinator.next_conversation_event().await.unwrap();
        assert_eq!(event, ConversationEvent::Resync);
        let refetch = h
            .coordinator
            .on_conversation_event(event, Instant::now())
            .expect("lag triggers a history reload");
        assert_ne!(refetch, generation);
        assert!(h.coordinator.drain_events().iter().any(|event| matches!(
            event,
            ClientEvent::Notice(Notice { kind: NoticeKind::Transient, .. })
        )));

        // The old fetch tag no longer applies.
        h.coordinator.history_loaded(generation, Ok(Vec::new()));
        h.coordinator.history_loaded(refetch, Ok(pushed.clone()));
        assert_eq!(h.coordinator.merged().len(), 10);

        // Buffered live copies that survived the lag are duplicates now.
        let event = h.coordinator.next_conversation_event().await.unwrap();
        assert!(h
            .coordinator
            .on_conversation_event(event, Instant::now())
            .is_none());
        assert_eq!(h.coordinator.merged().len(), 10);
    }

    #[tokio::test]
    async fn resync_keeps_in_flight_send_current() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        let generation = h.coordinator.open(session("a")).unwrap();
        h.coordinator.history_loaded(generation, Ok(Vec::new()));
        let pending = h.coordinator.begin_send("hi").unwrap();

        let refetch = h
            .coordinator
            .on_conversation_event(ConversationEvent::Resync, Instant::now())
            .unwrap();
        let mut canonical = message("a", "m1", 2);
        canonical.sent_at = Utc::now();
        canonical.client_id = Some(pending.temp_id);
        h.coordinator.send_finished(pending, Ok(Some(canonical.clone())));
        assert_eq!(h.coordinator.merged(), vec![canonical.clone().with_origin(Origin::Live)]);

        h.coordinator.history_loaded(refetch, Ok(vec![canonical]));
        assert_eq!(h.coordinator.merged().len(), 1);
    }

    #[tokio::test]
    async fn no_typing_signals_without_local_user() {
        let mut h = harness_with(None, SendFailurePolicy::Discard, 64).await;
        h.coordinator.open(session("a")).unwrap();
        let t0 = Instant::now();
        h.coordinator.on_input(t0);
        assert_eq!(h.coordinator.next_deadline(), None);
        h.coordinator.on_blur();
        h.coordinator.tick(t0 + Duration::from_millis(3000));
        h.coordinator.close();
        assert!(sent(&mut h.peer).is_empty());
    }

    #[tokio::test]
    async fn failed_send_rolls_back_and_follows_policy() {
        for (policy, restores) in [
            (SendFailurePolicy::Discard, false),
            (SendFailurePolicy::Retain, true),
        ] {
            let mut h = harness(policy).await;
            let generation = h.coordinator.open(session("a")).unwrap();
            h.coordinator.history_loaded(generation, Ok(Vec::new()));
            let pending = h.coordinator.begin_send("draft").unwrap();
            h.coordinator.drain_events();

            h.coordinator
                .send_finished(pending, Err(ApiError::Unauthorized));
            assert!(h.coordinator.merged().is_empty());

            let events = h.coordinator.drain_events();
            assert!(events.iter().any(|event| matches!(
                event,
                ClientEvent::Notice(Notice { kind: NoticeKind::AuthRequired, .. })
            )));
            let restored = events.iter().any(|event| {
                matches!(event, ClientEvent::RestoreDraft { text, .. } if text == "draft")
            });
            assert_eq!(restored, restores);
        }
    }

    #[tokio::test]
    async fn blank_or_idle_send_is_skipped() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        assert!(h.coordinator.begin_send("hello").is_none());
        h.coordinator.open(session("a")).unwrap();
        assert!(h.coordinator.begin_send("   ").is_none());
        assert!(h.coordinator.merged().is_empty());
    }

    #[tokio::test]
    async fn typing_signals_reach_the_channel() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        h.coordinator.open(session("a")).unwrap();
        let t0 = Instant::now();
        h.coordinator.on_input(t0);
        h.coordinator.on_input(t0 + Duration::from_millis(500));
        assert_eq!(
            h.coordinator.next_deadline(),
            Some(t0 + Duration::from_millis(2500))
        );
        h.coordinator.tick(t0 + Duration::from_millis(2500));

        let out = sent(&mut h.peer);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], OutboundEvent::TypingStart(_)));
        assert!(matches!(out[1], OutboundEvent::TypingStop(_)));
    }

    #[tokio::test]
    async fn peer_typing_toggles_view_and_scrolls() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        let generation = h.coordinator.open(session("a")).unwrap();
        h.coordinator.history_loaded(generation, Ok(Vec::new()));
        h.coordinator.drain_events();

        let t0 = Instant::now();
        h.coordinator
            .on_conversation_event(ConversationEvent::TypingStarted("me".into()), t0);
        assert!(h.coordinator.drain_events().is_empty());

        h.coordinator
            .on_conversation_event(ConversationEvent::TypingStarted("peer".into()), t0);
        let events = h.coordinator.drain_events();
        assert!(events.contains(&ClientEvent::ScrollToLatest));
        assert!(h.coordinator.view().unwrap().peer_is_typing);

        h.coordinator.tick(t0 + Duration::from_millis(5000));
        assert!(!h.coordinator.view().unwrap().peer_is_typing);
        assert!(h.coordinator.drain_events().contains(&ClientEvent::ScrollToLatest));
    }

    #[tokio::test]
    async fn presence_feeds_peer_online() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        h.coordinator.open(session("a")).unwrap();
        assert!(!h.coordinator.view().unwrap().peer_online);
        h.presence.replace(vec!["peer".into()]);
        h.coordinator.on_presence_changed();
        assert!(h.coordinator.view().unwrap().peer_online);
    }

    #[tokio::test]
    async fn superseded_peer_selection_is_dropped() {
        let mut h = harness(SendFailurePolicy::Discard).await;
        let peer = User {
            id: "peer".into(),
            name: "Peer".into(),
            avatar: None,
        };
        let conversation = Conversation {
            id: "c-peer".into(),
            users: vec![peer.clone()],
            is_group_chat: false,
            group_name: None,
        };
        let stale = h.coordinator.select_peer();
        let fresh = h.coordinator.select_peer();
        assert!(h
            .coordinator
            .peer_conversation_ready(stale, peer.clone(), Ok(conversation.clone()))
            .is_none());
        assert!(h
            .coordinator
            .peer_conversation_ready(fresh, peer, Ok(conversation))
            .is_some());
        assert_eq!(h.coordinator.active_conversation_id(), Some("c-peer"));
    }
}
