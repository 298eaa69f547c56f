pub mod api;
pub mod channel;
pub mod client;
pub mod transport;
pub mod wire;

pub use api::{ChatApi, HttpChatApi};
pub use channel::{ChannelEvent, ConversationEvent, PushChannel};
pub use client::SyncClient;
pub use transport::{MemoryTransport, TcpTransport};
