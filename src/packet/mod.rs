//! Raw packet decoding.
//!
//! Wire layout of a flooded packet:
//!
//! ```text
//! header (1) | path_len (1) | path (path_len) | payload
//! ```
//!
//! Bits 2-5 of the header carry the payload type; group text is type 5 and
//! its payload is `channel_hash (1) | cipher_mac (2) | ciphertext`.

use crate::channel::crypto::{BLOCK_LEN, MAC_LEN};

const PAYLOAD_TYPE_GROUP_TEXT: u8 = 0x05;

/// A parsed group-text packet. Read-only for the duration of a crack.
#[derive(Clone, Debug)]
pub struct GroupTextPacket {
    pub channel_hash: u8,
    pub cipher_mac: [u8; MAC_LEN],
    pub ciphertext: Vec<u8>,
}

/// Decode a hex packet dump into a group-text packet.
///
/// The hex string may be mixed-case, carry a `0x` prefix and contain
/// whitespace. Returns `None` for anything that is not a well-formed
/// group-text frame.
pub fn decode_packet(hex_input: &str) -> Option<GroupTextPacket> {
    let cleaned: String = hex_input
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let raw = hex::decode(cleaned).ok()?;
    parse_group_text(&raw)
}

fn parse_group_text(raw: &[u8]) -> Option<GroupTextPacket> {
    if raw.len() < 2 {
        return None;
    }
    let header = raw[0];
    if (header >> 2) & 0x0f != PAYLOAD_TYPE_GROUP_TEXT {
        return None;
    }

    let path_len = raw[1] as usize;
    let payload = raw.get(2 + path_len..)?;
    if payload.len() < 1 + MAC_LEN + BLOCK_LEN {
        return None;
    }

    let ciphertext = payload[1 + MAC_LEN..].to_vec();
    if ciphertext.len() % BLOCK_LEN != 0 {
        return None;
    }

    Some(GroupTextPacket {
        channel_hash: payload[0],
        cipher_mac: [payload[1], payload[2]],
        ciphertext,
    })
}
