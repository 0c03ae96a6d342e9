//! Registration engine: REGISTER_REQ rounds with a ramped receive timeout.

use std::sync::Arc;

use crate::error::ClientError;
use crate::identity::{ClientIdentity, ServerIdentity};
use crate::lifecycle::Shutdown;
use crate::protocol::{Packet, PacketType, Phase, Timing};
use crate::retry::calculate_timeout;
use crate::state::ProtocolState;
use crate::transport::{Inbox, Transport};
use crate::wire::{self, PACKET_LEN};

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub server: ServerIdentity,
    /// TCP port announced by the server; `None` if the ACK data was not a port number.
    pub tcp_port: Option<u16>,
    /// Rounds consumed, including the one that got the ACK.
    pub rounds: u32,
    pub epoch: u64,
}

pub struct RegistrationEngine {
    client: Arc<ClientIdentity>,
    timing: Timing,
    transport: Arc<dyn Transport>,
    inbox: Arc<Inbox>,
    state: Arc<ProtocolState>,
    shutdown: Shutdown,
}

impl RegistrationEngine {
    pub fn new(
        client: Arc<ClientIdentity>,
        timing: Timing,
        transport: Arc<dyn Transport>,
        inbox: Arc<Inbox>,
        state: Arc<ProtocolState>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            client,
            timing,
            transport,
            inbox,
            state,
            shutdown,
        }
    }

    /// Run up to `max_rounds` rounds. Stops at the first REGISTER_ACK (success) or
    /// REGISTER_REJ (fatal). A NACK on the final round ends as `NotAccepted`; a silent
    /// final round as `NoResponse`.
    pub async fn register(&self, max_rounds: u32) -> Result<Registration, ClientError> {
        self.state.begin_registration();
        let stale = self.inbox.drain().await;
        if stale > 0 {
            tracing::debug!(stale, "dropped stale registration replies");
        }
        let request = wire::encode(&Packet::register_request(&self.client));

        let mut last_nack: Option<Packet> = None;
        for round in 1..=max_rounds {
            let reply = self.round(&request).await?;
            last_nack = None;
            match reply.kind {
                _ if reply.is_none() => {
                    tracing::info!(round, max_rounds, "no response to REGISTER_REQ");
                    self.shutdown
                        .sleep(self.timing.units(self.timing.round_pause))
                        .await?;
                }
                PacketType::RegisterAck => return Ok(self.accept(&reply, round).await),
                PacketType::RegisterRej => {
                    tracing::error!(reason = %reply.data, "REGISTER_REJ received");
                    return Err(ClientError::Rejected(reply.data.to_string()));
                }
                PacketType::RegisterNack => {
                    tracing::warn!(round, reason = %reply.data, "REGISTER_NACK received");
                    last_nack = Some(reply);
                }
                other => tracing::debug!(kind = %other, "ignoring unexpected registration reply"),
            }
        }

        match last_nack {
            Some(nack) => Err(ClientError::NotAccepted(nack.data.to_string())),
            None => Err(ClientError::NoResponse { rounds: max_rounds }),
        }
    }

    /// One send/retry sub-loop: at most N transmissions, each followed by a wait that
    /// grows per `calculate_timeout`. Returns the first reply or `Packet::none()`.
    ///
    /// Only REGISTER_ACK/NACK/REJ reach the registration inbox. ERROR and heartbeat
    /// traffic arriving mid-round go to the heartbeat inbox and do not end the round.
    async fn round(&self, request: &[u8; PACKET_LEN]) -> Result<Packet, ClientError> {
        let mut timeout = 0;
        for num_package in 0..self.timing.packets_per_round {
            self.shutdown.run(self.transport.send(request)).await??;
            if self.state.enter_phase(Phase::AwaitingRegistrationResponse) {
                let phase = Phase::AwaitingRegistrationResponse;
                tracing::info!(%phase, "client changes phase");
            }
            timeout = calculate_timeout(&self.timing, num_package, timeout);
            tracing::debug!(num_package, timeout, "REGISTER_REQ sent");
            let reply = self
                .shutdown
                .run(self.inbox.recv(self.timing.units(timeout)))
                .await?;
            if !reply.is_none() {
                return Ok(reply);
            }
        }
        Ok(Packet::none())
    }

    async fn accept(&self, ack: &Packet, round: u32) -> Registration {
        let server = ServerIdentity::from_reply(ack);
        let tcp_port = match parse_port(ack.data.as_bytes()) {
            Ok(port) => Some(port),
            Err(reason) => {
                tracing::warn!(
                    data = %ack.data,
                    reason,
                    "REGISTER_ACK carries no valid TCP port"
                );
                None
            }
        };
        let epoch = self
            .state
            .complete_registration(server.clone(), tcp_port)
            .await;
        tracing::info!(
            phase = %Phase::Registered,
            server_id = %server.id,
            server_mac = %server.mac,
            rand = %server.rand,
            tcp_port,
            epoch,
            "client changes phase"
        );
        Registration {
            server,
            tcp_port,
            rounds: round,
            epoch,
        }
    }
}

/// Decimal TCP port from REGISTER_ACK data. Surrounding whitespace is allowed, trailing
/// garbage is not.
fn parse_port(data: &[u8]) -> Result<u16, &'static str> {
    let text = std::str::from_utf8(data).map_err(|_| "not UTF-8")?;
    let text = text.trim();
    if text.is_empty() {
        return Err("empty");
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err("not a decimal number");
    }
    text.parse::<u16>().map_err(|_| "out of range")
}
