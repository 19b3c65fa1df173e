//! Candidate enumerator for room names.
//!
//! Legal room names are lowercase strings over `a-z0-9-` where `-` never
//! appears at either end and never twice in a row. The enumerator maps every
//! length to a contiguous index range so brute force and resume can address
//! candidates by `(length, index)` alone.
//!
//! Counting uses the plain product `36 * 37^(L-2) * 36`; the few indices
//! that would decode to a string containing `--` are gaps and decode to
//! `None`. Callers skip gaps, so the counter and decoder stay consistent.

/// Glyphs allowed at the first and last position.
pub const EDGE_GLYPHS: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Glyphs allowed at interior positions.
pub const MID_GLYPHS: &[u8; 37] = b"abcdefghijklmnopqrstuvwxyz0123456789-";

/// Longest length whose index space still fits in a u64.
pub const MAX_NAME_LEN: u32 = 12;

/// Size of the enumerated index space for names of length `len`.
///
/// Returns 0 for length 0 and for lengths beyond [`MAX_NAME_LEN`].
pub fn count_names_for_length(len: u32) -> u64 {
    match len {
        0 => 0,
        1 => EDGE_GLYPHS.len() as u64,
        _ if len > MAX_NAME_LEN => 0,
        _ => {
            let edge = EDGE_GLYPHS.len() as u64;
            let mid = MID_GLYPHS.len() as u64;
            edge * mid.pow(len - 2) * edge
        }
    }
}

/// Decode an index into the room name it addresses.
///
/// The first character is the least significant digit. Returns `None` when
/// the index is outside the length's space or decodes to a gap (`--`).
pub fn index_to_name(len: u32, index: u64) -> Option<String> {
    if len == 0 || len > MAX_NAME_LEN {
        return None;
    }

    let mut i = index;
    let mut out = Vec::with_capacity(len as usize);

    out.push(EDGE_GLYPHS[(i % 36) as usize]);
    i /= 36;
    if len >= 2 {
        for _ in 0..len - 2 {
            out.push(MID_GLYPHS[(i % 37) as usize]);
            i /= 37;
        }
        out.push(EDGE_GLYPHS[(i % 36) as usize]);
        i /= 36;
    }
    if i != 0 {
        return None; // past the end of this length's space
    }

    if out.windows(2).any(|w| w == b"--") {
        return None; // gap index
    }

    Some(String::from_utf8(out).expect("alphabet is ASCII"))
}

/// Inverse of [`index_to_name`]: recover `(length, index)` from a name.
///
/// Returns `None` for strings outside the room-name grammar or too long to
/// index.
pub fn name_to_index(name: &str) -> Option<(u32, u64)> {
    if !is_valid_name(name) {
        return None;
    }
    let bytes = name.as_bytes();
    let len = bytes.len() as u32;
    if len > MAX_NAME_LEN {
        return None;
    }

    // Fold from the most significant digit (the last character) down.
    let index = if len >= 2 {
        let mut acc = edge_index(bytes[bytes.len() - 1])? as u64;
        for &b in bytes[1..bytes.len() - 1].iter().rev() {
            acc = acc * 37 + mid_index(b)? as u64;
        }
        acc * 36 + edge_index(bytes[0])? as u64
    } else {
        edge_index(bytes[0])? as u64
    };

    Some((len, index))
}

/// Room-name grammar check: nonempty, lowercase `a-z0-9-`, no `-` at either
/// end, no `--`.
pub fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    if bytes.windows(2).any(|w| w == b"--") {
        return false;
    }
    bytes
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[inline(always)]
fn edge_index(b: u8) -> Option<u32> {
    match b {
        b'a'..=b'z' => Some((b - b'a') as u32),
        b'0'..=b'9' => Some((b - b'0') as u32 + 26),
        _ => None,
    }
}

#[inline(always)]
fn mid_index(b: u8) -> Option<u32> {
    match b {
        b'-' => Some(36),
        _ => edge_index(b),
    }
}
