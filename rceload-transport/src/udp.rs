//! UDP sender using non-blocking I/O with mio
//!
//! Each message travels in exactly one datagram, so a message larger than
//! `MAX_DATAGRAM_SIZE` cannot be sent at all.

use crate::{Error, Result};
use mio::net::UdpSocket;
use mio::{Interest, Registry, Token};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent(usize),
    /// Socket buffer full; retry on the next writable event
    WouldBlock,
}

/// Connected, non-blocking UDP socket
pub struct UdpSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpSender {
    /// Bind an ephemeral local port and connect it to `target`
    pub fn connect(target: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local)?;
        socket.connect(target)?;

        Ok(Self { socket, target })
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> Result<()> {
        registry.register(&mut self.socket, token, Interest::WRITABLE)?;
        Ok(())
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send one message as a single datagram
    pub fn send(&self, data: &[u8]) -> Result<SendStatus> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::Other(format!(
                "Message of {} bytes exceeds the {MAX_DATAGRAM_SIZE}-byte datagram limit",
                data.len()
            )));
        }

        loop {
            match self.socket.send(data) {
                Ok(n) => return Ok(SendStatus::Sent(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(SendStatus::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;
    use std::time::Duration;

    #[test]
    fn test_udp_send() {
        let server = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let addr = server.local_addr().unwrap();

        let sender = UdpSender::connect(addr).unwrap();
        assert_eq!(sender.send(b"ping").unwrap(), SendStatus::Sent(4));

        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_udp_oversized_message() {
        let sender = UdpSender::connect("127.0.0.1:9".parse().unwrap()).unwrap();
        let big = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        assert!(sender.send(&big).is_err());
    }
}
