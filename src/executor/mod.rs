//! Batched candidate executor.
//!
//! One contract, two backends: a data-parallel Metal kernel and a portable
//! straight loop. A batch is a contiguous index range of one name length;
//! the executor returns the within-batch indices whose derived key matches
//! the target channel hash and (when a ciphertext is supplied) whose
//! truncated HMAC tag verifies.

use sha2::{Digest, Sha256};

use crate::channel::crypto::{channel_hash, verify_mac, ChannelKey, KEY_LEN, MAC_LEN};
use crate::channel::names::{EDGE_GLYPHS, MAX_NAME_LEN, MID_GLYPHS};

#[cfg(feature = "gpu")]
use crate::metal::GpuSearch;

/// Upper bound on matches returned per batch. A 1-byte hash plus a 2-byte
/// tag make more than a handful of survivors per batch vanishingly rare;
/// surplus matches are dropped and re-discovered on resume.
pub const MAX_BATCH_MATCHES: usize = 256;

/// Batch size of the portable backend.
pub const CPU_BATCH_SIZE: u64 = 1 << 16;

/// One dispatch of the executor.
#[derive(Clone, Copy, Debug)]
pub struct BatchParams<'a> {
    pub target_hash: u8,
    pub length: u32,
    pub offset: u64,
    pub batch_size: u32,
    /// When present (together with `cipher_mac`), candidates must also pass
    /// tag verification.
    pub ciphertext: Option<&'a [u8]>,
    pub cipher_mac: Option<[u8; MAC_LEN]>,
}

/// Portable single-threaded backend.
pub struct CpuSearch;

impl CpuSearch {
    pub fn search(&self, p: &BatchParams) -> Vec<u32> {
        let mut matches = Vec::new();
        // Stack buffer holding "#" + name; no allocation in the hot loop.
        let mut msg = [0u8; 1 + MAX_NAME_LEN as usize];
        msg[0] = b'#';

        for i in 0..p.batch_size {
            let len = p.length as usize;
            if !decode_into(p.length, p.offset + u64::from(i), &mut msg[1..1 + len]) {
                continue; // gap index
            }

            let digest = Sha256::digest(&msg[..1 + len]);
            let mut key: ChannelKey = [0u8; KEY_LEN];
            key.copy_from_slice(&digest[..KEY_LEN]);

            if channel_hash(&key) != p.target_hash {
                continue;
            }
            if let (Some(ct), Some(mac)) = (p.ciphertext, p.cipher_mac) {
                if !verify_mac(&key, ct, mac) {
                    continue;
                }
            }
            matches.push(i);
            if matches.len() == MAX_BATCH_MATCHES {
                break;
            }
        }
        matches
    }
}

/// Decode an enumeration index into `out`. Mirrors
/// [`crate::channel::names::index_to_name`]: the first character is the
/// least significant digit, `--` indices are gaps and return `false`.
#[inline(always)]
fn decode_into(length: u32, index: u64, out: &mut [u8]) -> bool {
    let mut i = index;
    out[0] = EDGE_GLYPHS[(i % 36) as usize];
    i /= 36;
    if length >= 2 {
        for p in 1..length as usize - 1 {
            let d = (i % 37) as usize;
            i /= 37;
            if d == 36 && out[p - 1] == b'-' {
                return false;
            }
            out[p] = MID_GLYPHS[d];
        }
        out[length as usize - 1] = EDGE_GLYPHS[(i % 36) as usize];
        i /= 36;
    }
    i == 0
}

/// The backend driving one crack. Selected once at crack start.
pub enum Backend {
    Cpu(CpuSearch),
    #[cfg(feature = "gpu")]
    Gpu(GpuSearch),
}

impl Backend {
    /// Pick the accelerator when it is compiled in, present and not bypassed;
    /// fall back to the portable loop otherwise.
    pub fn select(force_cpu: bool) -> Backend {
        #[cfg(feature = "gpu")]
        if !force_cpu {
            match GpuSearch::new() {
                Ok(gpu) => return Backend::Gpu(gpu),
                Err(err) => eprintln!("GPU unavailable, using CPU backend: {err}"),
            }
        }
        let _ = force_cpu;
        Backend::Cpu(CpuSearch)
    }

    pub fn is_gpu(&self) -> bool {
        match self {
            Backend::Cpu(_) => false,
            #[cfg(feature = "gpu")]
            Backend::Gpu(_) => true,
        }
    }

    /// Batch size the first brute-force dispatch should use. The accelerator
    /// value is the auto-tuner's starting point.
    pub fn initial_batch_size(&self) -> u64 {
        match self {
            Backend::Cpu(_) => CPU_BATCH_SIZE,
            #[cfg(feature = "gpu")]
            Backend::Gpu(gpu) => gpu.initial_batch_size(),
        }
    }

    /// Run one batch. Matches come back in ascending index order.
    pub fn search(&self, p: &BatchParams) -> Result<Vec<u32>, String> {
        match self {
            Backend::Cpu(cpu) => Ok(cpu.search(p)),
            #[cfg(feature = "gpu")]
            Backend::Gpu(gpu) => gpu.search(p),
        }
    }
}
