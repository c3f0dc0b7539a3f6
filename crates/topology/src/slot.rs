//! Hash slot computation for keys and channel names.
//!
//! Names are hashed with CRC16 (XMODEM parameters: polynomial 0x1021, zero
//! initial value, no reflection) and reduced modulo [`SLOT_COUNT`]. A name
//! carrying a non-empty hash tag, the bytes between its first `{` and the next
//! `}`, is routed by the tag alone so related names can be co-located.

use crc::{CRC_16_XMODEM, Crc};

/// Number of hash slots the keyspace is partitioned into.
pub const SLOT_COUNT: u16 = 16384;

/// A hash slot index in `0..SLOT_COUNT`.
pub type Slot = u16;

const SLOT_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Returns the part of `name` that is hashed to pick its slot.
#[must_use]
pub fn hash_tag(name: &[u8]) -> &[u8] {
    if let Some(open) = name.iter().position(|&b| b == b'{') {
        let rest = &name[open + 1..];
        if let Some(close) = rest.iter().position(|&b| b == b'}') {
            if close > 0 {
                return &rest[..close];
            }
        }
    }
    name
}

/// Returns the hash slot of a key or channel name.
pub fn key_slot(name: impl AsRef<[u8]>) -> Slot {
    SLOT_CRC.checksum(hash_tag(name.as_ref())) % SLOT_COUNT
}
