use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use rust_chat_sync::common::{
    ClientCommand, ClientEvent, ConversationSession, HeaderStatus, NoticeKind, User,
};
use rust_chat_sync::config::{self, AppConfig};
use rust_chat_sync::network::api::EnvCredentials;
use rust_chat_sync::network::{HttpChatApi, PushChannel, SyncClient, TcpTransport};
use rust_chat_sync::sync::SessionSettings;

#[derive(Parser)]
#[command(
    name = "rust_chat_sync",
    version,
    about = "Real-time chat sync client (line-based driver)"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Overrides the configured local user id
    #[arg(long)]
    user_id: Option<String>,
    /// Overrides the push channel address (host:port)
    #[arg(long)]
    push_addr: Option<String>,
    /// Write the config file back with the command-line overrides applied
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(user_id) = &self.user_id {
            config.user_id = Some(user_id.clone());
        }
        if let Some(push_addr) = &self.push_addr {
            config.push_addr = push_addr.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    cli.apply_overrides(&mut app_config);
    if cli.save_config {
        match config::save_config(&cli.config, &app_config) {
            Ok(()) => log::info!("Saved config to {}", cli.config),
            Err(err) => log::error!("Failed to save config to {}: {err}", cli.config),
        }
    }
    // Environment first, then flags again so the command line wins.
    app_config.apply_env();
    cli.apply_overrides(&mut app_config);

    run_client(app_config).await
}

async fn run_client(app_config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let channel = PushChannel::new(
        Box::new(TcpTransport::new(app_config.push_addr.clone())),
        app_config.channel_capacity,
    );
    if let Err(err) = channel.connect().await {
        log::error!("Push channel unavailable at {}: {err}", app_config.push_addr);
        return Err(err.into());
    }

    let api = HttpChatApi::new(
        app_config.api_base_url.clone(),
        Box::new(EnvCredentials),
        app_config.request_timeout(),
    )?;

    // View -> engine
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // Engine -> view
    let (event_tx, event_rx) = mpsc::channel(100);

    let client = SyncClient::new(
        event_tx,
        cmd_rx,
        Arc::clone(&channel),
        Arc::new(api),
        SessionSettings::from(&app_config),
    );
    let engine = tokio::spawn(async move {
        if let Err(err) = client.run().await {
            log::error!("Sync engine terminated: {err}");
        }
    });
    let printer = tokio::spawn(print_events(event_rx));

    log::info!(
        "Client started as {}",
        app_config.user_id.as_deref().unwrap_or("<anonymous>")
    );
    read_commands(cmd_tx).await?;

    // Dropping the command sender above stops the engine loop.
    if let Err(err) = engine.await {
        log::error!("Sync engine task failed: {err}");
    }
    channel.disconnect().await;
    if let Err(err) = printer.await {
        log::error!("Event printer task failed: {err}");
    }
    Ok(())
}

/// `/users`, `/chats`, `/peer <id> [name]`, `/open <conversation> <peer>`,
/// `/close`, `/blur`, `/quit`. Anything else is sent to the open conversation.
async fn read_commands(cmd_tx: mpsc::Sender<ClientCommand>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == "/quit" {
            break;
        }
        let Some(command) = parse_line(&line) else {
            continue;
        };
        if cmd_tx.send(command).await.is_err() {
            log::warn!("Sync engine is gone; stopping input");
            break;
        }
    }
    Ok(())
}

fn parse_line(line: &str) -> Option<ClientCommand> {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "/users" => Some(ClientCommand::RefreshUsers),
        "/chats" => Some(ClientCommand::RefreshConversations),
        "/close" => Some(ClientCommand::CloseConversation),
        "/blur" => Some(ClientCommand::Blur),
        "/peer" => {
            let id = parts.next()?.to_string();
            let name = parts.next().unwrap_or(id.as_str()).to_string();
            Some(ClientCommand::OpenPeer(User {
                id,
                name,
                avatar: None,
            }))
        }
        "/open" => {
            let conversation_id = parts.next()?.to_string();
            let peer_id = parts.next()?.to_string();
            Some(ClientCommand::OpenConversation(ConversationSession {
                conversation_id,
                peer_display_name: peer_id.clone(),
                peer_id,
                peer_avatar_ref: None,
            }))
        }
        command if command.starts_with('/') => {
            log::warn!("Unknown command `{command}`");
            None
        }
        _ => Some(ClientCommand::Send(line.to_string())),
    }
}

async fn print_events(mut event_rx: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            ClientEvent::View(None) => println!("-- no conversation open"),
            ClientEvent::View(Some(view)) => {
                let status = match view.status() {
                    HeaderStatus::Loading => "loading...",
                    HeaderStatus::Typing => "typing...",
                    HeaderStatus::Online => "online",
                    HeaderStatus::Offline => "offline",
                };
                println!(
                    "-- {} [{}] {}",
                    view.session.peer_display_name, view.session.conversation_id, status
                );
                if view.is_empty_conversation() {
                    println!("   (no messages yet)");
                }
                for message in &view.messages {
                    println!(
                        "   {} {}: {}",
                        message.sent_at.format("%H:%M"),
                        message.sender_id,
                        message.body
                    );
                }
            }
            ClientEvent::ScrollToLatest => {}
            ClientEvent::PresenceChanged(online) => println!("-- online: {}", online.join(", ")),
            ClientEvent::RestoreDraft { text, .. } => println!("-- draft restored: {text}"),
            ClientEvent::Users(users) => {
                for user in users {
                    println!("   {} {}", user.id, user.name);
                }
            }
            ClientEvent::Conversations(conversations) => {
                for conversation in conversations {
                    let names: Vec<&str> = conversation
                        .users
                        .iter()
                        .map(|user| user.name.as_str())
                        .collect();
                    println!("   {} {}", conversation.id, names.join(", "));
                }
            }
            ClientEvent::Notice(notice) => match notice.kind {
                NoticeKind::AuthRequired => println!("!! {} (sign in required)", notice.text),
                NoticeKind::Transient => println!("!! {}", notice.text),
            },
        }
    }
}
