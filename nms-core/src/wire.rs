//! Fixed layout codec: 1 type byte + four NUL-padded text fields, 78 bytes total.
//!
//! | offset | width | field |
//! |--------|-------|-------|
//! | 0      | 1     | type  |
//! | 1      | 7     | id    |
//! | 8      | 13    | mac   |
//! | 21     | 7     | rand  |
//! | 28     | 50    | data  |

use crate::identity::{FixedStr, DATA_LEN, ID_LEN, MAC_LEN, RAND_LEN};
use crate::protocol::{Packet, PacketType};

const ID_OFF: usize = 1;
const MAC_OFF: usize = ID_OFF + ID_LEN + 1;
const RAND_OFF: usize = MAC_OFF + MAC_LEN + 1;
const DATA_OFF: usize = RAND_OFF + RAND_LEN + 1;

/// Size of every datagram of the protocol.
pub const PACKET_LEN: usize = DATA_OFF + DATA_LEN + 1;

/// Encode a packet. Fields are already bounded, so the terminator always fits.
pub fn encode(packet: &Packet) -> [u8; PACKET_LEN] {
    let mut out = [0u8; PACKET_LEN];
    out[0] = packet.kind.as_byte();
    put(&mut out, ID_OFF, packet.id.as_bytes());
    put(&mut out, MAC_OFF, packet.mac.as_bytes());
    put(&mut out, RAND_OFF, packet.rand.as_bytes());
    put(&mut out, DATA_OFF, packet.data.as_bytes());
    out
}

fn put(out: &mut [u8; PACKET_LEN], off: usize, bytes: &[u8]) {
    out[off..off + bytes.len()].copy_from_slice(bytes);
}

/// Decode a datagram. Anything shorter than `PACKET_LEN` yields `Packet::none()`;
/// bytes past `PACKET_LEN` are ignored. Never fails.
pub fn decode(bytes: &[u8]) -> Packet {
    if bytes.len() < PACKET_LEN {
        return Packet::none();
    }
    Packet {
        kind: PacketType::from_byte(bytes[0]),
        id: FixedStr::from_wire(field(bytes, ID_OFF, ID_LEN)),
        mac: FixedStr::from_wire(field(bytes, MAC_OFF, MAC_LEN)),
        rand: FixedStr::from_wire(field(bytes, RAND_OFF, RAND_LEN)),
        data: FixedStr::from_wire(field(bytes, DATA_OFF, DATA_LEN)),
    }
}

/// The usable bytes of one field; the terminator slot is never part of the value.
fn field(bytes: &[u8], off: usize, max: usize) -> &[u8] {
    &bytes[off..off + max]
}
