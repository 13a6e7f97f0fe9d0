//! TCP transport for the broadcast stream.
//!
//! Server side: [`serve`] accepts connections and hands each to the
//! [`Broadcaster`] as a [`TcpBroadcastStream`]. Client side:
//! [`BroadcastClient`], used by `orderer-ctl` and the integration tests.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::broadcast;
use zerocopy::{AsBytes, FromBytes};

use orderer_core::wire::{encode_request, RequestHeader, REPLY_LEN, REQUEST_HEADER_LEN};
use orderer_core::{BroadcastReply, Status};

use crate::broadcaster::Broadcaster;
use crate::intake::{BroadcastStream, TransportError};
use crate::sequencer::Sequencer;

/// Server end of one client connection.
pub struct TcpBroadcastStream {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl TcpBroadcastStream {
    pub fn new(socket: TcpStream, peer: SocketAddr) -> Self {
        let (reader, writer) = socket.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            peer,
        }
    }
}

impl BroadcastStream for TcpBroadcastStream {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        let mut buf = [0u8; REQUEST_HEADER_LEN];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed after {filled} header bytes"),
                )
                .into());
            }
            filled += n;
        }

        let header = RequestHeader::read_from(&buf[..]).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "malformed request header")
        })?;
        let len = header.validate()?;

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).await?;
        Ok(Some(Bytes::from(payload)))
    }

    async fn send(&mut self, reply: BroadcastReply) -> Result<(), TransportError> {
        self.writer.write_all(reply.as_bytes()).await?;
        Ok(())
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

/// Accept broadcast connections until `shutdown` fires.
///
/// Sessions already running are left to finish on their own; once the
/// cutter has stopped they are answered with SERVICE_UNAVAILABLE.
pub async fn serve<S: Sequencer>(
    listener: TcpListener,
    broadcaster: Arc<Broadcaster<S>>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "broadcast listener started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("broadcast listener shutting down");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!(%peer, error = %e, "set_nodelay failed");
                }

                let broadcaster = broadcaster.clone();
                tokio::spawn(async move {
                    let mut stream = TcpBroadcastStream::new(socket, peer);
                    // Outcome is logged by the broadcaster.
                    let _ = broadcaster.broadcast(&mut stream).await;
                });
            }
        }
    }
}

/// Client end of a broadcast stream.
pub struct BroadcastClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl BroadcastClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        let (reader, writer) = socket.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send one request and wait for its reply.
    pub async fn submit(&mut self, payload: &[u8]) -> Result<Status, TransportError> {
        self.send_request(payload).await?;
        self.recv_reply().await
    }

    /// Write one request without waiting. Replies can be collected later
    /// with [`BroadcastClient::recv_reply`]; they arrive in request order.
    pub async fn send_request(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = encode_request(payload)?;
        self.writer.write_all(&frame).await?;
        Ok(())
    }

    pub async fn recv_reply(&mut self) -> Result<Status, TransportError> {
        let mut buf = [0u8; REPLY_LEN];
        self.reader.read_exact(&mut buf).await?;
        let reply = BroadcastReply::read_from(&buf[..])
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed reply"))?;
        Ok(reply.status()?)
    }

    /// Half-close: tell the server no more requests are coming.
    pub async fn finish(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
