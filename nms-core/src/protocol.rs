//! NMS wire vocabulary: packet types, client phases, timing constants and the packet record.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::{ClientIdentity, FixedStr, DATA_LEN, ID_LEN, MAC_LEN, RAND_LEN, ZERO_RAND};

/// Packet type tag: the first byte of every datagram.
///
/// `RegisterReq` shares its value (0x00) with the "nothing arrived" sentinel, so on the
/// receive side a zero type never counts as a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    RegisterReq,
    RegisterAck,
    RegisterNack,
    RegisterRej,
    Error,
    AliveInf,
    AliveAck,
    AliveNack,
    AliveRej,
    /// Any other byte. Kept so a datagram can still be logged.
    Unknown(u8),
}

impl PacketType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => PacketType::RegisterReq,
            0x02 => PacketType::RegisterAck,
            0x04 => PacketType::RegisterNack,
            0x06 => PacketType::RegisterRej,
            0x0F => PacketType::Error,
            0x10 => PacketType::AliveInf,
            0x12 => PacketType::AliveAck,
            0x14 => PacketType::AliveNack,
            0x16 => PacketType::AliveRej,
            other => PacketType::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            PacketType::RegisterReq => 0x00,
            PacketType::RegisterAck => 0x02,
            PacketType::RegisterNack => 0x04,
            PacketType::RegisterRej => 0x06,
            PacketType::Error => 0x0F,
            PacketType::AliveInf => 0x10,
            PacketType::AliveAck => 0x12,
            PacketType::AliveNack => 0x14,
            PacketType::AliveRej => 0x16,
            PacketType::Unknown(b) => b,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::RegisterReq => "REGISTER_REQ",
            PacketType::RegisterAck => "REGISTER_ACK",
            PacketType::RegisterNack => "REGISTER_NACK",
            PacketType::RegisterRej => "REGISTER_REJ",
            PacketType::Error => "ERROR",
            PacketType::AliveInf => "ALIVE_INF",
            PacketType::AliveAck => "ALIVE_ACK",
            PacketType::AliveNack => "ALIVE_NACK",
            PacketType::AliveRej => "ALIVE_REJ",
            PacketType::Unknown(_) => "UNKNOWN",
        }
    }

    /// Server replies that answer a REGISTER_REQ. Everything else belongs to the heartbeat stream.
    pub fn is_registration_reply(self) -> bool {
        matches!(
            self,
            PacketType::RegisterAck | PacketType::RegisterNack | PacketType::RegisterRej
        )
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketType::Unknown(b) => write!(f, "UNKNOWN(0x{:02X})", b),
            other => f.write_str(other.name()),
        }
    }
}

/// Client position in the registration/heartbeat state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Disconnected,
    AwaitingRegistrationResponse,
    /// Defined by the protocol; no client transition enters it.
    AwaitingDbCheck,
    Registered,
    /// Defined by the protocol; no client transition enters it.
    SendingAlive,
}

impl Phase {
    pub fn code(self) -> u8 {
        match self {
            Phase::Disconnected => 0xA0,
            Phase::AwaitingRegistrationResponse => 0xA2,
            Phase::AwaitingDbCheck => 0xA4,
            Phase::Registered => 0xA6,
            Phase::SendingAlive => 0xA8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Disconnected => "DISCONNECTED",
            Phase::AwaitingRegistrationResponse => "WAIT_REG_RESPONSE",
            Phase::AwaitingDbCheck => "WAIT_DB_CHECK",
            Phase::Registered => "REGISTERED",
            Phase::SendingAlive => "SEND_ALIVE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Receive timeout of the heartbeat receiver, in time units. Long enough to mean "block".
pub const ALIVE_RECV_TIMEOUT_UNITS: u64 = 10_000;

/// Registration and heartbeat tunables. Times are in units of `unit_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timing {
    /// T: receive timeout for the first probes of a round.
    pub base_timeout: u64,
    /// P: number of probes sent with timeout T.
    pub fast_probes: u32,
    /// Q: the timeout ramp stops at Q * T.
    pub max_timeout_factor: u64,
    /// U: pause after a round with no reply.
    pub round_pause: u64,
    /// N: transmissions per round.
    pub packets_per_round: u32,
    /// O: rounds for the initial registration.
    pub rounds: u32,
    /// R: interval between ALIVE_INF packets.
    pub alive_interval: u64,
    /// S: unacknowledged ALIVE_INF packets that force a re-registration.
    pub max_pending_alives: u32,
    /// Length of one time unit in milliseconds.
    pub unit_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            base_timeout: 1,
            fast_probes: 2,
            max_timeout_factor: 3,
            round_pause: 2,
            packets_per_round: 6,
            rounds: 2,
            alive_interval: 2,
            max_pending_alives: 3,
            unit_ms: 1000,
        }
    }
}

impl Timing {
    /// Convert a count of time units to a `Duration`.
    pub fn units(&self, n: u64) -> Duration {
        Duration::from_millis(self.unit_ms.saturating_mul(n))
    }

    /// The plateau of the retry ramp, Q * T.
    pub fn max_timeout(&self) -> u64 {
        self.max_timeout_factor.saturating_mul(self.base_timeout)
    }
}

/// One protocol datagram. Text fields are bounded to their wire widths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub id: FixedStr<ID_LEN>,
    pub mac: FixedStr<MAC_LEN>,
    pub rand: FixedStr<RAND_LEN>,
    pub data: FixedStr<DATA_LEN>,
}

impl Packet {
    /// The "no packet" sentinel: type 0 and empty fields.
    pub fn none() -> Self {
        Self {
            kind: PacketType::RegisterReq,
            id: FixedStr::default(),
            mac: FixedStr::default(),
            rand: FixedStr::default(),
            data: FixedStr::default(),
        }
    }

    /// True for the sentinel (type byte 0); such a packet carries nothing usable.
    pub fn is_none(&self) -> bool {
        self.kind.as_byte() == 0
    }

    pub fn register_request(client: &ClientIdentity) -> Self {
        Self {
            kind: PacketType::RegisterReq,
            id: client.id.clone(),
            mac: client.mac.clone(),
            rand: FixedStr::truncating(ZERO_RAND),
            data: FixedStr::default(),
        }
    }

    pub fn alive_inf(client: &ClientIdentity, rand: &FixedStr<RAND_LEN>) -> Self {
        Self {
            kind: PacketType::AliveInf,
            id: client.id.clone(),
            mac: client.mac.clone(),
            rand: rand.clone(),
            data: FixedStr::default(),
        }
    }
}
