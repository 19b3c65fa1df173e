//! Search orchestrator.
//!
//! Three sequential phases share one cursor-based resume scheme:
//!
//! 1. **Public** - the well-known broadcast room and its fixed key.
//! 2. **Dictionary** - the hash bucket of the loaded word list, in list order.
//! 3. **Brute force** - every name length in turn, batched through the
//!    selected executor backend.
//!
//! A returned cursor always points strictly *after* the last inspected
//! position, so feeding a successful result's cursor back in skips a false
//! positive and keeps searching.

pub mod filters;
pub mod progress;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::channel::crypto::{
    channel_hash, derive_key, verify_mac, ChannelKey, PUBLIC_ROOM_KEY, PUBLIC_ROOM_NAME,
};
use crate::channel::names::{count_names_for_length, index_to_name, name_to_index, MAX_NAME_LEN};
use crate::executor::{Backend, BatchParams, CpuSearch, CPU_BATCH_SIZE};
use crate::packet::decode_packet;
use crate::wordlist::{filter_words, WordIndex};

use filters::FilterChain;
pub use progress::{Phase, ProgressReport};
use progress::ProgressTracker;

/// Auto-tuner ceiling; one dispatch never exceeds this many candidates.
const MAX_GPU_BATCH: u64 = 1 << 24;

/// Which phase a resume cursor belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeKind {
    Dictionary,
    #[default]
    Bruteforce,
}

/// Knobs for one crack call. `Default` matches the common capture workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CrackOptions {
    /// Upper bound on brute-forced name length.
    pub max_length: u32,
    /// Lower bound on brute-forced name length.
    pub starting_length: u32,
    /// Run the dictionary phase when a word list is loaded.
    pub use_dictionary: bool,
    /// Reject candidates whose decrypted timestamp is outside the window.
    pub use_timestamp_filter: bool,
    /// Half-width of the timestamp window in seconds.
    pub valid_seconds: u64,
    /// Reject candidates whose decrypted text is not clean UTF-8.
    pub use_utf8_filter: bool,
    /// Reject candidates without an attributed sender.
    pub require_sender: bool,
    /// Resume cursor: skip everything up to and including this name.
    pub start_from: Option<String>,
    /// Phase the resume cursor belongs to.
    pub start_from_kind: ResumeKind,
    /// Bypass the accelerator even when present.
    pub force_cpu: bool,
    /// Auto-tune target for one accelerator dispatch, in milliseconds.
    pub gpu_dispatch_ms: u64,
}

impl Default for CrackOptions {
    fn default() -> Self {
        Self {
            max_length: 8,
            starting_length: 1,
            use_dictionary: true,
            use_timestamp_filter: true,
            valid_seconds: 30 * 24 * 3600,
            use_utf8_filter: true,
            require_sender: false,
            start_from: None,
            start_from_kind: ResumeKind::Bruteforce,
            force_cpu: false,
            gpu_dispatch_ms: 1000,
        }
    }
}

/// Outcome of one crack call.
///
/// `resume_from`/`resume_kind` are set on every terminal outcome except a
/// packet parse error.
#[derive(Clone, Debug, Serialize)]
pub struct CrackResult {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "key_as_hex")]
    pub key: Option<ChannelKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u32>,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_kind: Option<ResumeKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn key_as_hex<S: serde::Serializer>(key: &Option<ChannelKey>, s: S) -> Result<S::Ok, S::Error> {
    match key {
        Some(k) => s.serialize_str(&hex::encode(k)),
        None => s.serialize_none(),
    }
}

impl CrackResult {
    fn parse_error(msg: &str) -> Self {
        Self {
            found: false,
            room_name: None,
            key: None,
            message: None,
            timestamp: None,
            aborted: false,
            resume_from: None,
            resume_kind: None,
            error: Some(msg.to_string()),
        }
    }

    fn terminal(aborted: bool, cursor: &Cursor) -> Self {
        Self {
            found: false,
            room_name: None,
            key: None,
            message: None,
            timestamp: None,
            aborted,
            resume_from: Some(cursor.value.clone()),
            resume_kind: Some(cursor.kind),
            error: None,
        }
    }

    fn success(
        name: String,
        key: ChannelKey,
        accepted: filters::AcceptedFrame,
        kind: ResumeKind,
    ) -> Self {
        Self {
            found: true,
            resume_from: Some(name.clone()),
            room_name: Some(name),
            key: Some(key),
            message: Some(accepted.message),
            timestamp: Some(accepted.timestamp),
            aborted: false,
            resume_kind: Some(kind),
            error: None,
        }
    }
}

/// Cross-thread cancellation switch for a running crack.
#[derive(Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct Cursor {
    kind: ResumeKind,
    value: String,
}

/// Where each phase starts, resolved from the resume options.
struct Plan {
    run_public: bool,
    /// First eligible word-list position; `None` skips the dictionary.
    dict_start: Option<usize>,
    brute_length: u32,
    brute_offset: u64,
}

/// The cracking engine. Owns the word list, its index and the abort flag;
/// backends are selected per crack call.
pub struct Cracker {
    words: Vec<String>,
    index: Option<WordIndex>,
    abort: Arc<AtomicBool>,
}

impl Default for Cracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Cracker {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            index: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load a newline-delimited word list from disk. Words are normalized
    /// and filtered to the room-name grammar; returns how many survived.
    pub fn load_wordlist(&mut self, path: &str) -> Result<usize, String> {
        let data =
            fs::read_to_string(path).map_err(|e| format!("Cannot read wordlist {path}: {e}"))?;
        Ok(self.set_wordlist(data.lines()))
    }

    /// Replace the word list from an in-memory sequence and rebuild the
    /// dictionary index.
    pub fn set_wordlist<I, S>(&mut self, words: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.words = filter_words(words);
        self.index = Some(WordIndex::build(&self.words, |_| {}));
        self.words.len()
    }

    pub fn wordlist_len(&self) -> usize {
        self.words.len()
    }

    /// Raise the cancellation flag. The running crack returns within one
    /// batch (brute force) or one word (dictionary).
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Handle for aborting from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(Arc::clone(&self.abort))
    }

    /// Run the three-phase search against one packet.
    pub fn crack(
        &mut self,
        packet_hex: &str,
        opts: &CrackOptions,
        mut on_progress: Option<&mut dyn FnMut(&ProgressReport)>,
    ) -> CrackResult {
        let Some(packet) = decode_packet(packet_hex) else {
            return CrackResult::parse_error("Invalid packet: not a group-text frame");
        };
        self.abort.store(false, Ordering::SeqCst);

        let max_length = opts.max_length.clamp(1, MAX_NAME_LEN);
        let starting_length = opts.starting_length.max(1);
        let plan = self.resolve_plan(opts, starting_length, max_length);
        let chain = FilterChain::from_options(opts);

        let dict_enabled = opts.use_dictionary && self.index.is_some();
        let target = packet.channel_hash;
        let ct = packet.ciphertext.as_slice();
        let mac = packet.cipher_mac;

        // Progress denominator: everything still ahead of the cursor.
        let dict_total = match (&self.index, plan.dict_start) {
            (Some(index), Some(start)) if dict_enabled => index
                .bucket(target)
                .iter()
                .filter(|e| e.list_pos >= start)
                .count() as u64,
            _ => 0,
        };
        let brute_total: u64 = (plan.brute_length..=max_length)
            .map(|len| {
                let count = count_names_for_length(len);
                if len == plan.brute_length {
                    count.saturating_sub(plan.brute_offset)
                } else {
                    count
                }
            })
            .sum();
        let mut tracker =
            ProgressTracker::new(u64::from(plan.run_public) + dict_total + brute_total);

        let mut cursor = match &opts.start_from {
            Some(value) => Cursor {
                kind: opts.start_from_kind,
                value: value.clone(),
            },
            None => Cursor {
                kind: ResumeKind::Dictionary,
                value: PUBLIC_ROOM_NAME.to_string(),
            },
        };

        // Phase A: the well-known public room.
        if plan.run_public {
            tracker.bump(1);
            if channel_hash(&PUBLIC_ROOM_KEY) == target
                && verify_mac(&PUBLIC_ROOM_KEY, ct, mac)
            {
                if let Some(frame) = chain.inspect(&PUBLIC_ROOM_KEY, ct) {
                    // Resuming past this hit starts the dictionary from the
                    // top with Phase A skipped.
                    return CrackResult::success(
                        PUBLIC_ROOM_NAME.to_string(),
                        PUBLIC_ROOM_KEY,
                        frame,
                        ResumeKind::Dictionary,
                    );
                }
            }
        }

        // Phase B: dictionary bucket in word-list order.
        if let (Some(index), Some(start_pos), true) =
            (&self.index, plan.dict_start, dict_enabled)
        {
            for entry in index.bucket(target) {
                if entry.list_pos < start_pos {
                    continue;
                }
                if self.abort.load(Ordering::SeqCst) {
                    return CrackResult::terminal(true, &cursor);
                }
                tracker.bump(1);
                cursor = Cursor {
                    kind: ResumeKind::Dictionary,
                    value: entry.word.clone(),
                };
                if verify_mac(&entry.key, ct, mac) {
                    if let Some(frame) = chain.inspect(&entry.key, ct) {
                        return CrackResult::success(
                            entry.word.clone(),
                            entry.key,
                            frame,
                            ResumeKind::Dictionary,
                        );
                    }
                }
                tracker.maybe_report(
                    Phase::Dictionary,
                    0,
                    entry.list_pos as u64,
                    &mut on_progress,
                );
            }
        }

        // Phase C: brute force, batched through the selected backend.
        let mut backend = Backend::select(opts.force_cpu);
        let initial_batch = backend.initial_batch_size();
        let mut batch_size = initial_batch;
        let mut tuned = false;

        for length in plan.brute_length..=max_length {
            let total = count_names_for_length(length);
            let mut offset = if length == plan.brute_length {
                plan.brute_offset
            } else {
                0
            };

            while offset < total {
                if self.abort.load(Ordering::SeqCst) {
                    return CrackResult::terminal(true, &cursor);
                }

                let this_batch = batch_size.min(total - offset) as u32;
                let params = BatchParams {
                    target_hash: target,
                    length,
                    offset,
                    batch_size: this_batch,
                    ciphertext: Some(ct),
                    cipher_mac: Some(mac),
                };

                let started = Instant::now();
                let matches = match backend.search(&params) {
                    Ok(matches) => matches,
                    Err(err) => {
                        eprintln!("Accelerator dispatch failed ({err}); continuing on CPU");
                        backend = Backend::Cpu(CpuSearch);
                        batch_size = CPU_BATCH_SIZE;
                        tuned = true;
                        continue;
                    }
                };
                let spent = started.elapsed();

                for i in matches {
                    let Some(name) = index_to_name(length, offset + u64::from(i)) else {
                        continue;
                    };
                    let key = derive_key(&name);
                    // Re-verify; accelerator results are treated as hints.
                    if !verify_mac(&key, ct, mac) {
                        continue;
                    }
                    if let Some(frame) = chain.inspect(&key, ct) {
                        return CrackResult::success(name, key, frame, ResumeKind::Bruteforce);
                    }
                }

                tracker.bump(u64::from(this_batch));
                offset += u64::from(this_batch);
                if let Some(name) = last_name_at_or_before(length, offset - 1) {
                    cursor = Cursor {
                        kind: ResumeKind::Bruteforce,
                        value: name,
                    };
                }

                if backend.is_gpu() && !tuned && u64::from(this_batch) == initial_batch {
                    tuned = true;
                    let measured_ms = spent.as_millis() as u64;
                    if measured_ms > 0 {
                        batch_size =
                            tuned_batch_size(initial_batch, opts.gpu_dispatch_ms, measured_ms);
                    }
                }

                tracker.maybe_report(Phase::BruteForce, length, offset, &mut on_progress);
            }
        }

        CrackResult::terminal(false, &cursor)
    }

    fn resolve_plan(&self, opts: &CrackOptions, starting_length: u32, max_length: u32) -> Plan {
        match (&opts.start_from, opts.start_from_kind) {
            (None, _) => Plan {
                run_public: true,
                dict_start: Some(0),
                brute_length: starting_length,
                brute_offset: 0,
            },
            (Some(word), ResumeKind::Dictionary) => {
                // Resume strictly after the word; an unknown word degrades
                // to the top of the list.
                let dict_start = self
                    .words
                    .iter()
                    .position(|w| w == word)
                    .map(|pos| pos + 1)
                    .unwrap_or(0);
                Plan {
                    run_public: false,
                    dict_start: Some(dict_start),
                    brute_length: starting_length,
                    brute_offset: 0,
                }
            }
            (Some(name), ResumeKind::Bruteforce) => {
                let (brute_length, brute_offset) = match name_to_index(name) {
                    Some((len, _)) if len > max_length => (max_length + 1, 0),
                    Some((len, _)) if len < starting_length => (starting_length, 0),
                    Some((len, idx)) => (len, idx + 1),
                    // Malformed cursor: degrade to a fresh brute force.
                    None => (starting_length, 0),
                };
                Plan {
                    run_public: false,
                    dict_start: None,
                    brute_length,
                    brute_offset,
                }
            }
        }
    }
}

/// Newest legal name at or before an enumeration index, skipping backwards
/// over any gap run.
fn last_name_at_or_before(length: u32, index: u64) -> Option<String> {
    let mut i = index;
    loop {
        if let Some(name) = index_to_name(length, i) {
            return Some(name);
        }
        if i == 0 {
            return None;
        }
        i -= 1;
    }
}

/// One-shot auto-tune: scale the initial batch so a dispatch takes about
/// `target_ms`, rounded to the nearest power of two, never below the
/// initial size and never above [`MAX_GPU_BATCH`].
fn tuned_batch_size(initial: u64, target_ms: u64, measured_ms: u64) -> u64 {
    let scaled = initial as f64 * target_ms as f64 / measured_ms as f64;
    let exp = scaled.max(1.0).log2().round().clamp(0.0, 63.0) as u32;
    let pow2 = 1u64 << exp;
    pow2.clamp(initial.next_power_of_two(), MAX_GPU_BATCH)
}
