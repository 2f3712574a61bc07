//! UDP face: the socket named queries arrive on and answers leave from.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::warn;

use super::tlv::Data;
use crate::infrastructure::network::TransportError;

/// One UDP socket carrying TLV-encoded Interests and Data.
#[derive(Debug)]
pub struct UdpFace {
    socket: UdpSocket,
}

impl UdpFace {
    /// Binds the face and sets the receive timeout.
    pub fn bind(addr: SocketAddr, read_timeout: Duration) -> Result<Self, TransportError> {
        let socket =
            UdpSocket::bind(addr).map_err(|source| TransportError::BindFailed { addr, source })?;
        if let Err(e) = socket.set_read_timeout(Some(read_timeout)) {
            warn!("could not set read timeout on {addr}: {e}");
        }
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    /// Encodes and sends one Data packet.
    pub fn put_data(&self, data: &Data, peer: SocketAddr) -> Result<(), TransportError> {
        self.send_raw(&data.encode(), peer)
    }

    pub fn send_raw(&self, bytes: &[u8], peer: SocketAddr) -> Result<(), TransportError> {
        self.socket
            .send_to(bytes, peer)
            .map(|_| ())
            .map_err(|source| TransportError::Send { peer, source })
    }
}
