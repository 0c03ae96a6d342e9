//! UDP transport to the NMS server.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use nms_core::{ServerEndpoint, Transport, TransportError};
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// Large enough for any datagram the server sends; extra bytes past a packet are ignored.
const RECV_BUF: usize = 1024;

/// One unconnected socket on an ephemeral port, talking to a single resolved server address.
pub struct UdpTransport {
    socket: UdpSocket,
    server: SocketAddr,
}

impl UdpTransport {
    /// Resolve the server (first IPv4 address) and bind `0.0.0.0:0`.
    pub async fn connect(endpoint: &ServerEndpoint) -> io::Result<Self> {
        if endpoint.udp_port <= 1024 {
            tracing::warn!(port = endpoint.udp_port, "server UDP port might belong to root");
        }
        let server = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.udp_port))
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no IPv4 address for {}", endpoint.host),
                )
            })?;
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        tracing::debug!(local = %socket.local_addr()?, %server, "udp socket bound");
        Ok(Self { socket, server })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        self.socket
            .send_to(datagram, self.server)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; RECV_BUF];
        loop {
            match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Err(_) => return Ok(None),
                Ok(Ok((n, from))) if from == self.server => return Ok(Some(buf[..n].to_vec())),
                Ok(Ok((n, from))) => {
                    tracing::debug!(%from, len = n, "ignoring datagram from unexpected peer")
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    tracing::debug!("server port unreachable")
                }
                Ok(Err(e)) => return Err(TransportError::Recv(e.to_string())),
            }
        }
    }
}
