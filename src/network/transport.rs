use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::ChannelError;

use super::wire::{InboundEvent, OutboundEvent, decode_frame, encode_frame};

/// Both directions of an open push-channel connection. Dropping `outbound`
/// closes the write side; `inbound` yields `None` once the peer goes away.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<OutboundEvent>,
    pub inbound: mpsc::UnboundedReceiver<InboundEvent>,
}

/// Opens push-channel connections. Reconnection policy lives with the caller.
pub trait PushTransport: Send + Sync {
    fn open(&self) -> BoxFuture<'_, Result<Link, ChannelError>>;
}

/// Newline-delimited JSON frames over TCP.
pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl PushTransport for TcpTransport {
    fn open(&self) -> BoxFuture<'_, Result<Link, ChannelError>> {
        Box::pin(async move {
            let stream = TcpStream::connect(self.addr.as_str()).await?;
            stream.set_nodelay(true)?;
            log::info!("Push channel connected to {}", self.addr);
            let (read_half, mut write_half) = stream.into_split();

            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundEvent>();

            tokio::spawn(async move {
                let mut lines = BufReader::new(read_half).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) if line.trim().is_empty() => {}
                        Ok(Some(line)) => match decode_frame(&line) {
                            Ok(event) => {
                                if in_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(err) => log::warn!("Dropping malformed push frame: {err}"),
                        },
                        Ok(None) => break,
                        Err(err) => {
                            log::warn!("Push channel read error: {err}");
                            break;
                        }
                    }
                }
                log::info!("Push channel reader finished");
            });

            tokio::spawn(async move {
                while let Some(event) = out_rx.recv().await {
                    let mut frame = match encode_frame(&event) {
                        Ok(frame) => frame,
                        Err(err) => {
                            log::warn!("Failed to serialize push frame: {err}");
                            continue;
                        }
                    };
                    frame.push('\n');
                    if let Err(err) = write_half.write_all(frame.as_bytes()).await {
                        log::warn!("Push channel write error: {err}");
                        break;
                    }
                }
                let _ = write_half.shutdown().await;
            });

            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}

/// In-process transport. Each `open` hands the server side of the new link
/// to whoever holds the paired receiver.
pub struct MemoryTransport {
    accept: mpsc::UnboundedSender<MemoryPeer>,
}

/// Server end of one in-memory connection.
pub struct MemoryPeer {
    pub received: mpsc::UnboundedReceiver<OutboundEvent>,
    pub push: mpsc::UnboundedSender<InboundEvent>,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (accept, accepted) = mpsc::unbounded_channel();
        (Self { accept }, accepted)
    }
}

impl PushTransport for MemoryTransport {
    fn open(&self) -> BoxFuture<'_, Result<Link, ChannelError>> {
        Box::pin(async move {
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.accept
                .send(MemoryPeer {
                    received: out_rx,
                    push: in_tx,
                })
                .map_err(|_| ChannelError::Closed)?;
            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}
