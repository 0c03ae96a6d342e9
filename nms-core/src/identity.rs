//! Identities exchanged on the wire: bounded text fields, client and server identity,
//! server endpoint.

use std::borrow::Cow;
use std::fmt;

use crate::protocol::Packet;

/// Max length of an equipment id (wire width 7, NUL-terminated).
pub const ID_LEN: usize = 6;
/// Max length of a MAC address token (wire width 13).
pub const MAC_LEN: usize = 12;
/// Max length of the session token (wire width 7).
pub const RAND_LEN: usize = 6;
/// Max length of the free-form data field (wire width 50).
pub const DATA_LEN: usize = 49;

/// Session token sent before the server has assigned one.
pub const ZERO_RAND: &str = "000000";

/// At most `MAX` bytes with no NUL. Mirrors one fixed-width, NUL-padded wire field.
///
/// Holds raw bytes: a field decoded off the wire is compared and echoed byte for byte,
/// and only rendered as text (lossily) for display and logs.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FixedStr<const MAX: usize>(Vec<u8>);

impl<const MAX: usize> FixedStr<MAX> {
    /// Strict constructor: rejects text that does not fit the field.
    pub fn new(text: &str) -> Result<Self, FieldError> {
        if text.contains('\0') {
            return Err(FieldError::Nul);
        }
        if text.len() > MAX {
            return Err(FieldError::TooLong {
                len: text.len(),
                max: MAX,
            });
        }
        Ok(Self(text.as_bytes().to_vec()))
    }

    /// Keep the text up to the first NUL and at most `MAX` bytes (on a char boundary).
    /// Dropping anything logs a warning.
    pub fn truncating(text: &str) -> Self {
        let clean = text.split('\0').next().unwrap_or("");
        let kept = prefix(clean, MAX);
        if kept.len() != text.len() {
            tracing::warn!(
                field_max = MAX,
                original_len = text.len(),
                kept_len = kept.len(),
                "text truncated to fit wire field"
            );
        }
        Self(kept.as_bytes().to_vec())
    }

    /// Bytes up to the first NUL, at most `MAX` of them. Used when decoding untrusted
    /// datagrams, so nothing is logged.
    pub(crate) fn from_wire(bytes: &[u8]) -> Self {
        let end = bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(bytes.len())
            .min(MAX);
        Self(bytes[..end].to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Text view; invalid UTF-8 is replaced with U+FFFD.
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const MAX: usize> fmt::Display for FixedStr<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

impl<const MAX: usize> fmt::Debug for FixedStr<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_str_lossy(), f)
    }
}

impl<const MAX: usize> AsRef<[u8]> for FixedStr<MAX> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn prefix(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Text rejected by a strict field constructor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("{len} bytes exceeds the field maximum of {max}")]
    TooLong { len: usize, max: usize },
    #[error("field contains a NUL byte")]
    Nul,
}

/// This device, as loaded from configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub id: FixedStr<ID_LEN>,
    pub mac: FixedStr<MAC_LEN>,
}

impl ClientIdentity {
    pub fn new(id: &str, mac: &str) -> Result<Self, FieldError> {
        Ok(Self {
            id: FixedStr::new(id)?,
            mac: FixedStr::new(mac)?,
        })
    }
}

/// Server identity and session token handed out by a REGISTER_ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub id: FixedStr<ID_LEN>,
    pub mac: FixedStr<MAC_LEN>,
    pub rand: FixedStr<RAND_LEN>,
}

impl ServerIdentity {
    pub fn from_reply(reply: &Packet) -> Self {
        Self {
            id: reply.id.clone(),
            mac: reply.mac.clone(),
            rand: reply.rand.clone(),
        }
    }

    /// Check that a heartbeat reply belongs to this session. Fields are compared in wire order.
    pub fn check(&self, packet: &Packet) -> Result<(), Mismatch> {
        if packet.id != self.id {
            return Err(Mismatch::Id {
                got: packet.id.to_string(),
                expected: self.id.to_string(),
            });
        }
        if packet.mac != self.mac {
            return Err(Mismatch::Mac {
                got: packet.mac.to_string(),
                expected: self.mac.to_string(),
            });
        }
        if packet.rand != self.rand {
            return Err(Mismatch::Rand {
                got: packet.rand.to_string(),
                expected: self.rand.to_string(),
            });
        }
        Ok(())
    }
}

/// Field that made a heartbeat reply foreign to the current session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Mismatch {
    #[error("wrong id received {got}, expected {expected}")]
    Id { got: String, expected: String },
    #[error("wrong mac received {got}, expected {expected}")]
    Mac { got: String, expected: String },
    #[error("wrong random number received {got}, expected {expected}")]
    Rand { got: String, expected: String },
}

/// Where the NMS server listens. The TCP port is learned at registration and kept in
/// `ProtocolState`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub udp_port: u16,
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.udp_port)
    }
}
