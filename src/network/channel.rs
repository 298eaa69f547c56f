use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::common::{ConversationId, Message, UserId};
use crate::error::ChannelError;

use super::transport::PushTransport;
use super::wire::{InboundEvent, OutboundEvent};

/// What subscribers of the push channel observe.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Inbound(InboundEvent),
}

struct ActiveLink {
    generation: u64,
    sender: mpsc::UnboundedSender<OutboundEvent>,
}

type OutboundSlot = Arc<RwLock<Option<ActiveLink>>>;

/// The single process-wide push-channel connection.
///
/// Shared as `Arc<PushChannel>` by every component that talks to the server.
/// `connect` is idempotent; `disconnect` tears the link down explicitly.
pub struct PushChannel {
    transport: Box<dyn PushTransport>,
    events: broadcast::Sender<ChannelEvent>,
    outbound: OutboundSlot,
    connect_gate: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl PushChannel {
    pub fn new(transport: Box<dyn PushTransport>, capacity: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            transport,
            events,
            outbound: Arc::new(RwLock::new(None)),
            connect_gate: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.outbound
            .read()
            .map(|slot| slot.as_ref().is_some_and(|link| !link.sender.is_closed()))
            .unwrap_or(false)
    }

    pub async fn connect(&self) -> Result<(), ChannelError> {
        let mut pump = self.connect_gate.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let link = self.transport.open().await?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut slot) = self.outbound.write() {
            *slot = Some(ActiveLink {
                generation,
                sender: link.outbound,
            });
        }

        let events = self.events.clone();
        let outbound = Arc::clone(&self.outbound);
        let mut inbound = link.inbound;
        let _ = self.events.send(ChannelEvent::Connected);

        if let Some(previous) = pump.take() {
            previous.abort();
        }
        *pump = Some(tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                // No receivers is fine; nothing is listening yet.
                let _ = events.send(ChannelEvent::Inbound(event));
            }
            let lost = match outbound.write() {
                Ok(mut slot) if slot.as_ref().is_some_and(|link| link.generation == generation) => {
                    *slot = None;
                    true
                }
                _ => false,
            };
            if lost {
                log::warn!("Push channel link closed by remote");
                let _ = events.send(ChannelEvent::Disconnected);
            }
        }));
        Ok(())
    }

    pub async fn disconnect(&self) {
        let mut pump = self.connect_gate.lock().await;
        let had_link = self
            .outbound
            .write()
            .map(|mut slot| slot.take().is_some())
            .unwrap_or(false);
        if let Some(task) = pump.take() {
            task.abort();
        }
        if had_link {
            log::info!("Push channel disconnected");
            let _ = self.events.send(ChannelEvent::Disconnected);
        }
    }

    /// Fire-and-forget send of one frame.
    pub fn emit(&self, event: OutboundEvent) -> Result<(), ChannelError> {
        let slot = self.outbound.read().map_err(|_| ChannelError::Closed)?;
        let link = slot.as_ref().ok_or(ChannelError::NotConnected)?;
        link.sender.send(event).map_err(|_| ChannelError::Closed)
    }

    /// Every channel event, unfiltered.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Messages and typing signals for one conversation only. Dropping the
    /// feed is the unsubscribe.
    pub fn subscribe_conversation(&self, conversation_id: ConversationId) -> ConversationFeed {
        ConversationFeed {
            conversation_id,
            events: self.events.subscribe(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    Message(Message),
    TypingStarted(UserId),
    TypingStopped(UserId),
    /// The feed fell behind and live events were lost; the timeline must be
    /// rebuilt from history.
    Resync,
}

pub struct ConversationFeed {
    conversation_id: ConversationId,
    events: broadcast::Receiver<ChannelEvent>,
}

impl ConversationFeed {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Next event scoped to this conversation; `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ConversationEvent> {
        loop {
            match self.events.recv().await {
                Ok(ChannelEvent::Inbound(event)) => {
                    if event.conversation_id() != Some(self.conversation_id.as_str()) {
                        continue;
                    }
                    return Some(match event {
                        InboundEvent::Chat(message) => ConversationEvent::Message(message),
                        InboundEvent::UserTypingStart(payload) => {
                            ConversationEvent::TypingStarted(payload.user_id)
                        }
                        InboundEvent::UserTypingStop(payload) => {
                            ConversationEvent::TypingStopped(payload.user_id)
                        }
                        InboundEvent::OnlineUsers(_) => continue,
                    });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Conversation feed {} lagged, skipped {skipped} events",
                        self.conversation_id
                    );
                    return Some(ConversationEvent::Resync);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::MemoryTransport;
    use crate::network::wire::TypingPayload;
    use chrono::Utc;

    fn chat(conversation_id: &str, id: &str) -> InboundEvent {
        InboundEvent::Chat(Message {
            id: id.to_string().into(),
            conversation_id: conversation_id.into(),
            sender_id: "p".into(),
            body: "x".into(),
            sent_at: Utc::now(),
            client_id: None,
            origin: Default::default(),
        })
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (transport, mut accepted) = MemoryTransport::new();
        let channel = PushChannel::new(Box::new(transport), 16);
        let mut events = channel.subscribe();

        channel.connect().await.unwrap();
        channel.connect().await.unwrap();

        let _peer = accepted.recv().await.unwrap();
        assert!(accepted.try_recv().is_err());
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_requires_connection() {
        let (transport, mut accepted) = MemoryTransport::new();
        let channel = PushChannel::new(Box::new(transport), 16);
        assert!(matches!(
            channel.emit(OutboundEvent::AddUser("me".into())),
            Err(ChannelError::NotConnected)
        ));

        channel.connect().await.unwrap();
        let mut peer = accepted.recv().await.unwrap();
        channel.emit(OutboundEvent::AddUser("me".into())).unwrap();
        assert_eq!(
            peer.received.recv().await,
            Some(OutboundEvent::AddUser("me".into()))
        );

        channel.disconnect().await;
        assert!(!channel.is_connected());
        assert!(peer.received.recv().await.is_none());
    }

    #[tokio::test]
    async fn feed_filters_other_conversations() {
        let (transport, mut accepted) = MemoryTransport::new();
        let channel = PushChannel::new(Box::new(transport), 16);
        let mut feed = channel.subscribe_conversation("b".into());
        channel.connect().await.unwrap();
        let peer = accepted.recv().await.unwrap();

        peer.push.send(chat("a", "m1")).unwrap();
        peer.push.send(InboundEvent::OnlineUsers(vec!["p".into()])).unwrap();
        peer.push
            .send(InboundEvent::UserTypingStart(TypingPayload {
                conversation_id: "a".into(),
                user_id: "p".into(),
            }))
            .unwrap();
        peer.push.send(chat("b", "m2")).unwrap();

        match feed.recv().await {
            Some(ConversationEvent::Message(message)) => {
                assert_eq!(message.id, crate::common::MessageId::Server("m2".into()))
            }
            other => panic!("unexpected feed event {other:?}"),
        }
    }

    #[tokio::test]
    async fn lagging_feed_asks_for_resync() {
        let (transport, mut accepted) = MemoryTransport::new();
        let channel = PushChannel::new(Box::new(transport), 4);
        let mut feed = channel.subscribe_conversation("b".into());
        channel.connect().await.unwrap();
        let peer = accepted.recv().await.unwrap();

        for n in 0..10 {
            peer.push.send(chat("b", &format!("m{n}"))).unwrap();
        }
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert_eq!(feed.recv().await, Some(ConversationEvent::Resync));
        match feed.recv().await {
            Some(ConversationEvent::Message(message)) => {
                assert_eq!(message.id, crate::common::MessageId::Server("m6".into()))
            }
            other => panic!("unexpected feed event {other:?}"),
        }
    }

    #[tokio::test]
    async fn remote_close_reports_disconnect() {
        let (transport, mut accepted) = MemoryTransport::new();
        let channel = PushChannel::new(Box::new(transport), 16);
        let mut events = channel.subscribe();
        channel.connect().await.unwrap();
        let peer = accepted.recv().await.unwrap();
        drop(peer);

        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), ChannelEvent::Disconnected);
        assert!(!channel.is_connected());
    }
}
