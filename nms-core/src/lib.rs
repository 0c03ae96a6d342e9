//! NMS client protocol core.
//! Registers a device with an NMS server over UDP, then keeps the session alive with
//! two concurrent heartbeat workers. The host supplies the datagram transport.

pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod lifecycle;
pub mod protocol;
pub mod register;
pub mod retry;
pub mod state;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod testing;

pub use error::ClientError;
pub use identity::{ClientIdentity, FieldError, FixedStr, ServerEndpoint, ServerIdentity};
pub use lifecycle::{shutdown_channel, Client, Shutdown, ShutdownTrigger};
pub use protocol::{Packet, PacketType, Phase, Timing};
pub use register::{Registration, RegistrationEngine};
pub use state::ProtocolState;
pub use transport::{Transport, TransportError};
pub use wire::{decode, encode, PACKET_LEN};
