use std::time::Duration;

use tokio::time::Instant;

use crate::common::{ConversationId, UserId};
use crate::network::wire::{OutboundEvent, TypingPayload};

/// A local typing transition that must be pushed to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Debounced typing state for one conversation.
///
/// Local side: one `Start` per burst of keystrokes, a `Stop` once the compose
/// box has been quiet for `quiet` or when the user sends. Remote side: the
/// peer flag clears on a stop event or after `peer_timeout` without refresh.
#[derive(Debug)]
pub struct TypingController {
    conversation_id: ConversationId,
    user_id: UserId,
    quiet: Duration,
    peer_timeout: Duration,
    composing: bool,
    stop_at: Option<Instant>,
    peer_typing_until: Option<Instant>,
}

impl TypingController {
    pub fn new(
        conversation_id: ConversationId,
        user_id: UserId,
        quiet: Duration,
        peer_timeout: Duration,
    ) -> Self {
        Self {
            conversation_id,
            user_id,
            quiet,
            peer_timeout,
            composing: false,
            stop_at: None,
            peer_typing_until: None,
        }
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }

    pub fn peer_is_typing(&self) -> bool {
        self.peer_typing_until.is_some()
    }

    /// Keystroke in the compose box. Re-arms the quiet timer.
    pub fn on_input(&mut self, now: Instant) -> Option<TypingSignal> {
        self.stop_at = Some(now + self.quiet);
        if self.composing {
            None
        } else {
            self.composing = true;
            Some(TypingSignal::Start)
        }
    }

    /// Send or blur. Always yields `Stop`, even when already stopped.
    pub fn stop(&mut self) -> TypingSignal {
        self.stop_at = None;
        self.composing = false;
        TypingSignal::Stop
    }

    /// Peer started (or is still) typing. Returns whether the flag flipped.
    pub fn on_peer_start(&mut self, now: Instant) -> bool {
        let was_typing = self.peer_is_typing();
        self.peer_typing_until = Some(now + self.peer_timeout);
        !was_typing
    }

    /// Returns whether the flag flipped.
    pub fn on_peer_stop(&mut self) -> bool {
        self.peer_typing_until.take().is_some()
    }

    /// Earliest instant at which [`Self::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.stop_at, self.peer_typing_until) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fires expired timers. Returns the local signal to push, if any, and
    /// whether the peer flag flipped.
    pub fn poll(&mut self, now: Instant) -> (Option<TypingSignal>, bool) {
        let mut signal = None;
        if self.stop_at.is_some_and(|at| at <= now) {
            self.stop_at = None;
            self.composing = false;
            signal = Some(TypingSignal::Stop);
        }
        let peer_expired = self.peer_typing_until.is_some_and(|until| until <= now);
        if peer_expired {
            log::debug!(
                "Peer typing flag expired in conversation {}",
                self.conversation_id
            );
            self.peer_typing_until = None;
        }
        (signal, peer_expired)
    }

    pub fn to_event(&self, signal: TypingSignal) -> OutboundEvent {
        let payload = TypingPayload {
            conversation_id: self.conversation_id.clone(),
            user_id: self.user_id.clone(),
        };
        match signal {
            TypingSignal::Start => OutboundEvent::TypingStart(payload),
            TypingSignal::Stop => OutboundEvent::TypingStop(payload),
        }
    }
}
