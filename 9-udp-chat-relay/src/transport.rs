use std::{io, net::SocketAddr};

use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::warn;

use crate::{
    message::{EncodeError, WireMessage},
    router::Outbound,
};

/// Large enough for any UDP datagram, so nothing is ever truncated on receive.
pub const RECEIVE_BUFFER_LEN: usize = 65_536;

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("failed to send datagram: {0}")]
    Io(#[from] io::Error),
}

/// Owns the datagram socket for one relay or client.
///
/// Sends are fire-and-forget: nothing is retried and a failed send never
/// affects other targets.
pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        UdpSocket::bind(addr).await.map(Self::new)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buffer).await
    }

    /// Encodes and sends one message. Nothing reaches the socket if encoding fails.
    pub async fn send_message<M>(&self, target: SocketAddr, message: &M) -> Result<usize, SendError>
    where
        M: WireMessage,
    {
        let datagram = message.encode()?;
        Ok(self.socket.send_to(&datagram, target).await?)
    }

    /// Encodes once and sends to every target, returning how many sends succeeded.
    pub async fn deliver(&self, outbound: &Outbound) -> usize {
        let datagram = match outbound.message.encode() {
            Ok(datagram) => datagram,
            Err(error) => {
                warn!(%error, targets = outbound.targets.len(), "refusing to send message");
                return 0;
            }
        };

        let mut delivered = 0;
        for target in &outbound.targets {
            match self.socket.send_to(&datagram, *target).await {
                Ok(_) => delivered += 1,
                Err(error) => warn!(peer = %target, ?error, "failed to send datagram"),
            }
        }
        delivered
    }
}
