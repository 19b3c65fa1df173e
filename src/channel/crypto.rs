//! Channel key derivation and packet crypto.
//!
//! A room name maps to its secret material in two steps:
//!
//! ```text
//! key          = SHA256("#" + name)[0..16]
//! channel hash = SHA256(key)[0]
//! ```
//!
//! The payload is AES-128 per 16-byte block with the plaintext zero-padded,
//! and the 2-byte tag is the truncated HMAC-SHA256 of the ciphertext.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 16;
pub const MAC_LEN: usize = 2;
pub const BLOCK_LEN: usize = 16;

/// Decrypted frames carry a 4-byte timestamp and a flags byte before the text.
const FRAME_HEADER_LEN: usize = 5;

pub type ChannelKey = [u8; KEY_LEN];

/// Name of the well-known broadcast room every node ships with.
pub const PUBLIC_ROOM_NAME: &str = "public";

/// Fixed key of the well-known broadcast room. Unlike normal rooms this key
/// is not derived from the name.
pub const PUBLIC_ROOM_KEY: ChannelKey = [
    0x8b, 0x33, 0x87, 0xe9, 0xc5, 0xcd, 0xea, 0x6a, 0xc9, 0xe5, 0xed, 0xba, 0xa1, 0x15, 0xcd,
    0x72,
];

#[inline(always)]
pub fn derive_key(name: &str) -> ChannelKey {
    let mut hasher = Sha256::new();
    hasher.update(b"#");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

#[inline(always)]
pub fn channel_hash(key: &ChannelKey) -> u8 {
    Sha256::digest(key)[0]
}

/// Verify the truncated HMAC tag of a ciphertext.
#[inline(always)]
pub fn verify_mac(key: &ChannelKey, ciphertext: &[u8], mac: [u8; MAC_LEN]) -> bool {
    let mut h = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts 16-byte keys");
    h.update(ciphertext);
    let tag = h.finalize().into_bytes();
    tag[..MAC_LEN] == mac
}

/// A decrypted group-text frame.
#[derive(Clone, Debug)]
pub struct PlainFrame {
    /// Seconds since the Unix epoch, as sent by the origin node.
    pub timestamp: u32,
    pub flags: u8,
    /// Message body with trailing block padding removed. Usually of the
    /// form `"sender: message"`.
    pub text: Vec<u8>,
}

impl PlainFrame {
    /// Message text with invalid UTF-8 surfaced as U+FFFD.
    pub fn text_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }

    /// Split the body into `(sender, message)` if a sender is attributed.
    pub fn sender(&self) -> Option<(&[u8], &[u8])> {
        let pos = self.text.windows(2).position(|w| w == b": ")?;
        Some((&self.text[..pos], &self.text[pos + 2..]))
    }
}

/// Decrypt a ciphertext and parse the frame layout.
///
/// Returns `None` for ciphertexts that are not well-formed blocks or too
/// short to carry the frame header.
pub fn decrypt(key: &ChannelKey, ciphertext: &[u8]) -> Option<PlainFrame> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return None;
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut plain = ciphertext.to_vec();
    for block in plain.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    if plain.len() < FRAME_HEADER_LEN {
        return None;
    }

    let timestamp = u32::from_le_bytes(plain[..4].try_into().expect("4-byte slice"));
    let flags = plain[4];

    let mut text = plain.split_off(FRAME_HEADER_LEN);
    while text.last() == Some(&0) {
        text.pop();
    }

    Some(PlainFrame { timestamp, flags, text })
}
