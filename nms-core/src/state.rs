//! Protocol state shared by the registration engine and both heartbeat workers.
//!
//! Three guards, always taken in this order when nested:
//! 1. `exchange`: serializes ALIVE_INF transmission against re-registration rounds.
//! 2. `pending_alives`: every read-modify-write of the unacknowledged counter.
//! 3. `session`: phase, server identity, TCP port and epoch. Never held across `.await`.

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::identity::ServerIdentity;
use crate::protocol::Phase;

#[derive(Debug)]
struct Session {
    phase: Phase,
    server: Option<ServerIdentity>,
    tcp_port: Option<u16>,
    epoch: u64,
}

/// Consistent view of the session, taken under one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub server: Option<ServerIdentity>,
    pub epoch: u64,
}

#[derive(Debug)]
pub struct ProtocolState {
    session: Mutex<Session>,
    pending_alives: AsyncMutex<u32>,
    exchange: AsyncMutex<()>,
}

impl Default for ProtocolState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolState {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(Session {
                phase: Phase::Disconnected,
                server: None,
                tcp_port: None,
                epoch: 0,
            }),
            pending_alives: AsyncMutex::new(0),
            exchange: AsyncMutex::new(()),
        }
    }

    pub fn phase(&self) -> Phase {
        self.session.lock().phase
    }

    /// Current server identity; `Some` exactly when the phase is REGISTERED.
    pub fn server(&self) -> Option<ServerIdentity> {
        self.session.lock().server.clone()
    }

    /// TCP port from the last REGISTER_ACK.
    pub fn tcp_port(&self) -> Option<u16> {
        self.session.lock().tcp_port
    }

    /// Number of successful registrations so far.
    pub fn epoch(&self) -> u64 {
        self.session.lock().epoch
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.session.lock();
        SessionSnapshot {
            phase: s.phase,
            server: s.server.clone(),
            epoch: s.epoch,
        }
    }

    pub async fn pending_alives(&self) -> u32 {
        *self.pending_alives.lock().await
    }

    /// Registration starts from scratch: DISCONNECTED, no server.
    pub(crate) fn begin_registration(&self) {
        let mut s = self.session.lock();
        s.phase = Phase::Disconnected;
        s.server = None;
    }

    /// Move to a phase other than REGISTERED. Returns whether the phase changed.
    pub(crate) fn enter_phase(&self, phase: Phase) -> bool {
        debug_assert!(phase != Phase::Registered);
        let mut s = self.session.lock();
        if s.phase == phase {
            return false;
        }
        s.phase = phase;
        s.server = None;
        true
    }

    /// REGISTER_ACK accepted: REGISTERED with a new session, counter reset. Returns the new epoch.
    pub(crate) async fn complete_registration(
        &self,
        server: ServerIdentity,
        tcp_port: Option<u16>,
    ) -> u64 {
        let mut pending = self.pending_alives.lock().await;
        *pending = 0;
        let mut s = self.session.lock();
        s.phase = Phase::Registered;
        s.server = Some(server);
        s.tcp_port = tcp_port;
        s.epoch += 1;
        s.epoch
    }

    /// Count one ALIVE_INF sent. Returns true when the count reached `threshold`.
    pub(crate) async fn record_alive_sent(&self, threshold: u32) -> bool {
        let mut pending = self.pending_alives.lock().await;
        *pending += 1;
        *pending >= threshold
    }

    /// Count one ALIVE_ACK. Clamped at zero; returns the new count.
    pub(crate) async fn record_alive_ack(&self) -> u32 {
        let mut pending = self.pending_alives.lock().await;
        if *pending == 0 {
            tracing::debug!("ALIVE_ACK without a pending ALIVE_INF");
        }
        *pending = pending.saturating_sub(1);
        *pending
    }

    pub(crate) async fn exchange(&self) -> MutexGuard<'_, ()> {
        self.exchange.lock().await
    }
}
