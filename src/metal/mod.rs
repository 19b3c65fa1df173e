//! GPU-Accelerated Channel Search - Apple Metal
//!
//! The brute-force inner loop runs entirely on GPU:
//!
//! ```text
//! CPU (minimal)                 GPU (all crypto)
//! ─────────────────            ──────────────────────────────
//! (length, offset,   ───────>  index → name → SHA256 ×2
//!  batch, ct, tag)              ↓ hash byte match
//!                               ↓ HMAC-SHA256 tag check
//! match indices      <───────  atomic append buffer
//! ```
//!
//! Candidates never cross the bus; each thread decodes its own names from
//! the enumeration index and only surviving indices are read back.

mod gpu;

pub use gpu::{GpuSearch, CANDIDATES_PER_THREAD};

/// Check if a Metal GPU is available on this system.
pub fn is_gpu_available() -> bool {
    metal::Device::system_default().is_some()
}
