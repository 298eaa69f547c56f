use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::common::{ClientCommand, ClientEvent, Conversation, Message, User};
use crate::error::{ApiError, ChannelError};
use crate::sync::presence::PresenceTracker;
use crate::sync::session::{PendingSend, SessionCoordinator, SessionSettings};

use super::api::{ChatApi, NewConversation, OutgoingMessage};
use super::channel::{ChannelEvent, PushChannel};
use super::wire::InboundEvent;

/// Results of request/response calls, delivered back into the event loop.
enum Completion {
    PeerConversation {
        ticket: u64,
        peer: User,
        result: Result<Conversation, ApiError>,
    },
    History {
        generation: u64,
        result: Result<Vec<Message>, ApiError>,
    },
    Sent {
        pending: PendingSend,
        result: Result<Option<Message>, ApiError>,
    },
    Users(Result<Vec<User>, ApiError>),
    Conversations(Result<Vec<Conversation>, ApiError>),
}

/// The sync engine's event loop. All engine state is owned here and mutated
/// from this one task; network calls run as spawned tasks whose results come
/// back through the completion queue.
pub struct SyncClient {
    event_sender: mpsc::Sender<ClientEvent>,
    command_receiver: mpsc::Receiver<ClientCommand>,
    channel: Arc<PushChannel>,
    api: Arc<dyn ChatApi>,
    presence: PresenceTracker,
    coordinator: SessionCoordinator,
    completion_sender: mpsc::UnboundedSender<Completion>,
    completion_receiver: mpsc::UnboundedReceiver<Completion>,
    outbox: Vec<ClientEvent>,
}

impl SyncClient {
    pub fn new(
        event_sender: mpsc::Sender<ClientEvent>,
        command_receiver: mpsc::Receiver<ClientCommand>,
        channel: Arc<PushChannel>,
        api: Arc<dyn ChatApi>,
        settings: SessionSettings,
    ) -> Self {
        let presence = PresenceTracker::new(Arc::clone(&channel), settings.self_id.clone());
        let coordinator =
            SessionCoordinator::new(Arc::clone(&channel), presence.subscribe(), settings);
        let (completion_sender, completion_receiver) = mpsc::unbounded_channel();
        Self {
            event_sender,
            command_receiver,
            channel,
            api,
            presence,
            coordinator,
            completion_sender,
            completion_receiver,
            outbox: Vec::new(),
        }
    }

    /// Runs until the view drops its command sender.
    pub async fn run(mut self) -> Result<(), ChannelError> {
        let mut channel_events = self.channel.subscribe();
        if self.channel.is_connected() {
            self.presence.on_connected();
        } else {
            self.presence.start().await?;
        }
        log::info!("Sync event loop started");

        loop {
            let deadline = self.coordinator.next_deadline();
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                event = channel_events.recv() => {
                    match event {
                        Ok(event) => self.handle_channel_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("Channel listener lagged, skipped {skipped} events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                Some(event) = self.coordinator.next_conversation_event() => {
                    if let Some(generation) =
                        self.coordinator.on_conversation_event(event, Instant::now())
                    {
                        self.fetch_history(generation);
                    }
                }
                Some(completion) = self.completion_receiver.recv() => {
                    self.handle_completion(completion);
                }
                _ = sleep_until(deadline) => {
                    self.coordinator.tick(Instant::now());
                }
            }
            self.flush_events().await;
        }

        self.coordinator.close();
        self.flush_events().await;
        log::info!("Sync event loop stopped");
        Ok(())
    }

    fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::OpenPeer(peer) => {
                let ticket = self.coordinator.select_peer();
                let api = Arc::clone(&self.api);
                self.spawn_request(async move {
                    let result = api
                        .create_conversation(NewConversation::direct(peer.id.clone()))
                        .await;
                    Completion::PeerConversation {
                        ticket,
                        peer,
                        result,
                    }
                });
            }
            ClientCommand::OpenConversation(session) => {
                if let Some(generation) = self.coordinator.open(session) {
                    self.fetch_history(generation);
                }
            }
            ClientCommand::CloseConversation => self.coordinator.close(),
            ClientCommand::Input => self.coordinator.on_input(Instant::now()),
            ClientCommand::Blur => self.coordinator.on_blur(),
            ClientCommand::Send(text) => {
                let Some(pending) = self.coordinator.begin_send(&text) else {
                    return;
                };
                let api = Arc::clone(&self.api);
                self.spawn_request(async move {
                    let result = api
                        .send_message(
                            pending.conversation_id.clone(),
                            OutgoingMessage {
                                text: pending.text.clone(),
                                client_id: pending.temp_id,
                            },
                        )
                        .await;
                    Completion::Sent { pending, result }
                });
            }
            ClientCommand::RefreshUsers => {
                let api = Arc::clone(&self.api);
                self.spawn_request(async move { Completion::Users(api.fetch_users().await) });
            }
            ClientCommand::RefreshConversations => {
                let api = Arc::clone(&self.api);
                self.spawn_request(async move {
                    Completion::Conversations(api.fetch_conversations().await)
                });
            }
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.presence.on_connected(),
            ChannelEvent::Disconnected => {
                log::warn!("Push channel lost; live updates paused until it reconnects");
            }
            ChannelEvent::Inbound(InboundEvent::OnlineUsers(user_ids)) => {
                if self.presence.replace(user_ids) {
                    let online = self.presence.snapshot().sorted_ids();
                    self.coordinator.on_presence_changed();
                    self.queue(ClientEvent::PresenceChanged(online));
                }
            }
            // Conversation-scoped events arrive through the coordinator's feed.
            ChannelEvent::Inbound(_) => {}
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::PeerConversation {
                ticket,
                peer,
                result,
            } => {
                if let Some(generation) =
                    self.coordinator.peer_conversation_ready(ticket, peer, result)
                {
                    self.fetch_history(generation);
                }
            }
            Completion::History { generation, result } => {
                self.coordinator.history_loaded(generation, result);
            }
            Completion::Sent { pending, result } => {
                self.coordinator.send_finished(pending, result);
            }
            Completion::Users(result) => match result {
                Ok(users) => self.queue(ClientEvent::Users(users)),
                Err(err) => self.queue(ClientEvent::Notice(err.to_notice("Could not load users"))),
            },
            Completion::Conversations(result) => match result {
                Ok(conversations) => self.queue(ClientEvent::Conversations(conversations)),
                Err(err) => {
                    self.queue(ClientEvent::Notice(err.to_notice("Could not load conversations")))
                }
            },
        }
    }

    fn fetch_history(&self, generation: u64) {
        let Some(conversation_id) = self.coordinator.active_conversation_id() else {
            return;
        };
        let conversation_id = conversation_id.to_string();
        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let result = api.fetch_messages(conversation_id).await;
            Completion::History { generation, result }
        });
    }

    fn spawn_request<F>(&self, request: F)
    where
        F: std::future::Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completion_sender.clone();
        tokio::spawn(async move {
            let completion = request.await;
            // The loop is gone; nobody wants the result.
            let _ = completions.send(completion);
        });
    }

    fn queue(&mut self, event: ClientEvent) {
        self.outbox.push(event);
    }

    async fn flush_events(&mut self) {
        let mut events = self.coordinator.drain_events();
        events.append(&mut self.outbox);
        for event in events {
            if let Err(err) = self.event_sender.send(event).await {
                log::warn!("Failed to notify view: {err}");
                break;
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
