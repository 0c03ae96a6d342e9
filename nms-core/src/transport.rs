//! Datagram seam and inbound demultiplexing.
//!
//! The host supplies a `Transport` ("send datagram", "receive datagram with timeout").
//! A single pump task owns the receive side and routes every decoded packet either to
//! the registration inbox or to the heartbeat inbox, so a re-registration round never
//! competes with the heartbeat receiver for the same reply.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::ClientError;
use crate::lifecycle::Shutdown;
use crate::protocol::Packet;
use crate::wire;

/// Packets queued per inbox before new ones are dropped.
pub const INBOX_CAPACITY: usize = 64;

/// How long one pump receive waits before checking in again.
const PUMP_RECV_TIMEOUT: Duration = Duration::from_secs(60);

/// Datagram I/O towards the server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to the server.
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one datagram from the server. `Ok(None)` on timeout.
    async fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Recv(String),
}

/// Receive side of one packet stream.
#[derive(Debug)]
pub struct Inbox {
    rx: Mutex<mpsc::Receiver<Packet>>,
}

impl Inbox {
    /// Next packet within `timeout`, or `Packet::none()` when nothing usable arrived.
    pub async fn recv(&self, timeout: Duration) -> Packet {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(packet)) => packet,
            Ok(None) | Err(_) => Packet::none(),
        }
    }

    /// Discard everything queued. Returns how many packets were dropped.
    pub async fn drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/// The two inbound streams.
#[derive(Debug)]
pub struct Inboxes {
    pub registration: Arc<Inbox>,
    pub alive: Arc<Inbox>,
}

/// Send side of both inboxes, owned by the pump.
#[derive(Debug, Clone)]
pub struct Router {
    registration: mpsc::Sender<Packet>,
    alive: mpsc::Sender<Packet>,
}

pub fn inboxes(capacity: usize) -> (Router, Inboxes) {
    let (reg_tx, reg_rx) = mpsc::channel(capacity);
    let (alive_tx, alive_rx) = mpsc::channel(capacity);
    (
        Router {
            registration: reg_tx,
            alive: alive_tx,
        },
        Inboxes {
            registration: Arc::new(Inbox {
                rx: Mutex::new(reg_rx),
            }),
            alive: Arc::new(Inbox {
                rx: Mutex::new(alive_rx),
            }),
        },
    )
}

impl Router {
    /// Queue a packet on its inbox. A full inbox drops the packet, as the network would.
    pub fn route(&self, packet: Packet) {
        let (tx, stream) = if packet.kind.is_registration_reply() {
            (&self.registration, "registration")
        } else {
            (&self.alive, "alive")
        };
        if let Err(mpsc::error::TrySendError::Full(p)) = tx.try_send(packet) {
            tracing::warn!(kind = %p.kind, stream, "inbox full, packet dropped");
        }
    }
}

/// Read datagrams until shutdown, decode them and route them.
pub async fn pump(
    transport: Arc<dyn Transport>,
    router: Router,
    shutdown: Shutdown,
) -> Result<(), ClientError> {
    loop {
        let Some(datagram) = shutdown.run(transport.recv(PUMP_RECV_TIMEOUT)).await?? else {
            continue;
        };
        let packet = wire::decode(&datagram);
        if packet.is_none() {
            tracing::debug!(len = datagram.len(), "ignoring empty or short datagram");
            continue;
        }
        tracing::debug!(
            kind = %packet.kind,
            id = %packet.id,
            mac = %packet.mac,
            rand = %packet.rand,
            data = %packet.data,
            "packet received"
        );
        router.route(packet);
    }
}
