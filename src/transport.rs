//! Transport abstraction for the connection layer.
//!
//! A [`Connector`] opens a byte stream and returns two halves: a
//! [`Transport`] handle the connection writes through, and a channel of
//! [`TransportEvent`]s it reads lifecycle changes and incoming bytes from.
//! Events arrive in socket order; the connection handles them one at a time.

use crate::config::ConnectionConfig;
use crate::error::Error;
use crate::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::mpsc;

/// Read buffer headroom reserved before each socket read.
const READ_CHUNK: usize = 8 * 1024;

/// Async trait for an open byte stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes over the transport.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Close the transport. A [`TransportEvent::Disconnected`] follows.
    async fn close(&self) -> Result<()>;
}

/// Lifecycle and data notifications from a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The byte stream is established.
    Connected,
    /// Bytes received, in arrival order.
    Data(Bytes),
    /// The stream failed. A `Disconnected` follows.
    Error(io::Error),
    /// The stream is closed, locally or by the peer.
    Disconnected,
}

/// Receiving end of a transport's event channel.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Start connecting to `host:port`. Returns immediately; the outcome is
    /// reported as the first event on the returned channel.
    async fn open(&self, host: &str, port: u16) -> Result<(Arc<dyn Transport>, TransportEvents)>;
}

#[derive(Debug)]
enum Command {
    Send(Bytes),
    Close,
}

/// Plain TCP connector backed by a tokio task per connection.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    nodelay: bool,
    keepalive: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: true,
        }
    }
}

impl TcpConnector {
    pub fn new(nodelay: bool, keepalive: bool) -> Self {
        Self { nodelay, keepalive }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(config.nodelay, config.keepalive)
    }

    /// Resolve `host` and connect to the first address that accepts.
    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in lookup_host((host, port)).await? {
            let attempt = async {
                let socket = stream_socket(addr, self.keepalive)?;
                socket.connect(addr).await
            };
            match attempt.await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(self.nodelay) {
                        tracing::debug!(error = %e, "set_nodelay failed");
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "tcp connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host))
        }))
    }
}

/// Unconnected socket for `addr` with the keepalive option applied.
fn stream_socket(addr: SocketAddr, keepalive: bool) -> io::Result<TcpSocket> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_keepalive(keepalive)?;
    Ok(socket)
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, host: &str, port: u16) -> Result<(Arc<dyn Transport>, TransportEvents)> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let host = host.to_string();
        let connector = self.clone();
        tokio::spawn(async move {
            match connector.connect(&host, port).await {
                Ok(stream) => {
                    tracing::debug!(%host, port, "tcp connected");
                    let _ = event_tx.send(TransportEvent::Connected);
                    pump(stream, cmd_rx, event_tx).await;
                }
                Err(e) => {
                    tracing::warn!(%host, port, error = %e, "tcp connect failed");
                    let _ = event_tx.send(TransportEvent::Error(e));
                    let _ = event_tx.send(TransportEvent::Disconnected);
                }
            }
        });
        let transport: Arc<dyn Transport> = Arc::new(TcpTransport { commands: cmd_tx });
        Ok((transport, event_rx))
    }
}

/// Write half of a TCP connection: commands are executed by the connection task.
pub struct TcpTransport {
    commands: mpsc::UnboundedSender<Command>,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        self.commands
            .send(Command::Send(Bytes::copy_from_slice(data)))
            .map_err(|_| Error::NotConnected)
    }

    async fn close(&self) -> Result<()> {
        // Already gone is as good as closed.
        let _ = self.commands.send(Command::Close);
        Ok(())
    }
}

/// Shuttle bytes between `stream` and the channels until either side ends.
/// Always finishes with `Disconnected`.
async fn pump<S>(
    mut stream: S,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        tokio::select! {
            read = stream.read_buf(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!("peer closed stream");
                    break;
                }
                Ok(_) => {
                    if events.send(TransportEvent::Data(buf.split().freeze())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(e));
                    break;
                }
            },
            cmd = commands.recv() => match cmd {
                Some(Command::Send(data)) => {
                    if let Err(e) = stream.write_all(&data).await {
                        let _ = events.send(TransportEvent::Error(e));
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = stream.shutdown().await;
                    break;
                }
            },
        }
    }
    let _ = events.send(TransportEvent::Disconnected);
}
