//! Heartbeat workers: ALIVE_INF sender and ALIVE_* receiver.
//!
//! Both may re-register (one round) without restarting the client. Every
//! re-registration, whoever triggers it, runs under the exchange lock so its
//! REGISTER_REQ traffic never interleaves with an ALIVE_INF. Triggers are tagged
//! with the session epoch they saw; a trigger whose session was already renewed
//! by the other worker is dropped.

use std::sync::Arc;

use crate::error::ClientError;
use crate::identity::ClientIdentity;
use crate::lifecycle::Shutdown;
use crate::protocol::{Packet, PacketType, Timing, ALIVE_RECV_TIMEOUT_UNITS};
use crate::register::RegistrationEngine;
use crate::state::ProtocolState;
use crate::transport::{Inbox, Transport};
use crate::wire;

pub struct Heartbeat {
    client: Arc<ClientIdentity>,
    timing: Timing,
    transport: Arc<dyn Transport>,
    inbox: Arc<Inbox>,
    state: Arc<ProtocolState>,
    engine: Arc<RegistrationEngine>,
    shutdown: Shutdown,
}

impl Heartbeat {
    pub fn new(
        client: Arc<ClientIdentity>,
        timing: Timing,
        transport: Arc<dyn Transport>,
        inbox: Arc<Inbox>,
        state: Arc<ProtocolState>,
        engine: Arc<RegistrationEngine>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            client,
            timing,
            transport,
            inbox,
            state,
            engine,
            shutdown,
        }
    }

    /// Send ALIVE_INF every R units; re-register once S of them are unacknowledged.
    /// Only returns on shutdown or a terminal registration outcome.
    pub async fn sender_loop(self: Arc<Self>) -> Result<(), ClientError> {
        loop {
            match self.send_alive().await? {
                Some(epoch) => {
                    let threshold = self.timing.max_pending_alives;
                    if self.state.record_alive_sent(threshold).await {
                        self.reregister(epoch, "too many unacknowledged ALIVE_INF")
                            .await?;
                    }
                }
                None => {
                    // A previous re-registration got no reply; keep trying.
                    let epoch = self.state.epoch();
                    self.reregister(epoch, "no active session").await?;
                }
            }
            self.shutdown
                .sleep(self.timing.units(self.timing.alive_interval))
                .await?;
        }
    }

    /// Send one ALIVE_INF with the current session token. Returns the session epoch it
    /// was sent under, or `None` when there is no session to prove.
    async fn send_alive(&self) -> Result<Option<u64>, ClientError> {
        let _exchange = self.shutdown.run(self.state.exchange()).await?;
        let session = self.state.snapshot();
        let Some(server) = session.server else {
            return Ok(None);
        };
        let frame = wire::encode(&Packet::alive_inf(&self.client, &server.rand));
        self.shutdown.run(self.transport.send(&frame)).await??;
        tracing::debug!(rand = %server.rand, "ALIVE_INF sent");
        Ok(Some(session.epoch))
    }

    /// Wait for heartbeat replies and act on the ones that belong to the current session.
    pub async fn receiver_loop(self: Arc<Self>) -> Result<(), ClientError> {
        let timeout = self.timing.units(ALIVE_RECV_TIMEOUT_UNITS);
        loop {
            let packet = self.shutdown.run(self.inbox.recv(timeout)).await?;
            if packet.is_none() {
                continue;
            }
            self.handle_reply(packet).await?;
        }
    }

    async fn handle_reply(&self, packet: Packet) -> Result<(), ClientError> {
        let session = self.state.snapshot();
        let Some(server) = session.server else {
            tracing::warn!(kind = %packet.kind, "no active session, packet discarded");
            return Ok(());
        };
        if let Err(mismatch) = server.check(&packet) {
            tracing::warn!(kind = %packet.kind, %mismatch, "packet discarded");
            return Ok(());
        }
        match packet.kind {
            PacketType::AliveAck => {
                let pending = self.state.record_alive_ack().await;
                tracing::debug!(pending, "ALIVE_ACK received");
            }
            PacketType::AliveRej => {
                tracing::warn!("ALIVE_REJ received");
                self.reregister(session.epoch, "ALIVE_REJ").await?;
            }
            other => tracing::debug!(kind = %other, "ignoring heartbeat packet"),
        }
        Ok(())
    }

    /// One re-registration round under the exchange lock, unless the session seen at
    /// `observed_epoch` was already renewed. A silent server is not fatal here.
    async fn reregister(&self, observed_epoch: u64, cause: &str) -> Result<(), ClientError> {
        let _exchange = self.shutdown.run(self.state.exchange()).await?;
        if self.state.epoch() != observed_epoch {
            tracing::debug!(cause, "session already renewed, skipping re-registration");
            return Ok(());
        }
        tracing::info!(cause, "re-registering");
        match self.engine.register(1).await {
            Ok(registration) => {
                tracing::info!(
                    epoch = registration.epoch,
                    rand = %registration.server.rand,
                    "re-registration complete"
                );
                Ok(())
            }
            Err(ClientError::NoResponse { .. }) => {
                tracing::warn!(cause, "no response to re-registration, will retry");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
