//! Scripted in-memory server used by the unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;

use crate::identity::{ClientIdentity, FixedStr};
use crate::protocol::{Packet, PacketType};
use crate::transport::{Transport, TransportError};
use crate::wire;

pub(crate) const SERVER_ID: &str = "NMS-01";
pub(crate) const SERVER_MAC: &str = "A1B2C3D4E5F6";

type Responder = Box<dyn FnMut(&Packet) -> Vec<Packet> + Send>;

pub(crate) fn client_identity() -> ClientIdentity {
    ClientIdentity::new("Sw-001", "23F474D2AC67").unwrap()
}

/// A packet as the server would send it.
pub(crate) fn reply(kind: PacketType, rand: &str, data: &str) -> Packet {
    Packet {
        kind,
        id: FixedStr::new(SERVER_ID).unwrap(),
        mac: FixedStr::new(SERVER_MAC).unwrap(),
        rand: FixedStr::new(rand).unwrap(),
        data: FixedStr::new(data).unwrap(),
    }
}

/// Transport whose far end is a closure: every datagram the client sends is decoded,
/// recorded, and answered with whatever the closure returns.
pub(crate) struct ScriptedServer {
    responder: Mutex<Responder>,
    sent: Mutex<Vec<(Instant, Packet)>>,
    drop_next: Mutex<usize>,
    to_client: mpsc::UnboundedSender<Vec<u8>>,
    from_server: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl ScriptedServer {
    pub(crate) fn new(
        responder: impl FnMut(&Packet) -> Vec<Packet> + Send + 'static,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            responder: Mutex::new(Box::new(responder)),
            sent: Mutex::new(Vec::new()),
            drop_next: Mutex::new(0),
            to_client: tx,
            from_server: AsyncMutex::new(rx),
        })
    }

    pub(crate) fn silent() -> Arc<Self> {
        Self::new(|_| vec![])
    }

    /// ACKs registrations with `rand`/`port` and every ALIVE_INF with ALIVE_ACK.
    pub(crate) fn echoing(rand: &'static str, port: &'static str) -> Arc<Self> {
        Self::new(move |p| match p.kind {
            PacketType::RegisterReq => vec![reply(PacketType::RegisterAck, rand, port)],
            PacketType::AliveInf => vec![reply(PacketType::AliveAck, rand, "")],
            _ => vec![],
        })
    }

    /// The next `n` client datagrams are lost before reaching the responder.
    pub(crate) fn drop_first(&self, n: usize) {
        *self.drop_next.lock() = n;
    }

    /// Deliver an unsolicited packet to the client.
    pub(crate) fn push(&self, packet: Packet) {
        let _ = self.to_client.send(wire::encode(&packet).to_vec());
    }

    pub(crate) fn sent(&self) -> Vec<Packet> {
        self.sent.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub(crate) fn sent_count(&self, kind: PacketType) -> usize {
        self.sent.lock().iter().filter(|(_, p)| p.kind == kind).count()
    }

    pub(crate) fn sent_times(&self) -> Vec<Instant> {
        self.sent.lock().iter().map(|(t, _)| *t).collect()
    }
}

#[async_trait]
impl Transport for ScriptedServer {
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        assert_eq!(datagram.len(), wire::PACKET_LEN);
        let packet = wire::decode(datagram);
        self.sent.lock().push((Instant::now(), packet.clone()));
        {
            let mut drop_next = self.drop_next.lock();
            if *drop_next > 0 {
                *drop_next -= 1;
                return Ok(());
            }
        }
        let replies = {
            let mut responder = self.responder.lock();
            (*responder)(&packet)
        };
        for r in replies {
            self.push(r);
        }
        Ok(())
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut rx = self.from_server.lock().await;
        Ok(tokio::time::timeout(timeout, rx.recv()).await.ok().flatten())
    }
}
