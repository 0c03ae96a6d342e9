//! Outcomes that end a registration or a worker.

use crate::transport::TransportError;

/// Terminal or propagated client failure.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Every round ended without a usable reply.
    #[error("no response from server after {rounds} registration round(s)")]
    NoResponse { rounds: u32 },
    /// REGISTER_REJ: fatal at any phase.
    #[error("registration rejected: {0}")]
    Rejected(String),
    /// REGISTER_NACK on the final round: terminal but not an error.
    #[error("registration not accepted: {0}")]
    NotAccepted(String),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("worker task failed: {0}")]
    Worker(String),
    #[error("shutdown requested")]
    Shutdown,
}

impl ClientError {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            ClientError::NotAccepted(_) | ClientError::Shutdown => 0,
            _ => 1,
        }
    }
}
