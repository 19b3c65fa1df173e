//! Dictionary index: a hash-bucketed view of a word list.
//!
//! Every surviving word is keyed once up front; bucket `b` holds the words
//! whose channel hash is `b`, in word-list order. A crack against one packet
//! then only walks a single bucket instead of the whole list.

use rayon::prelude::*;

use crate::channel::crypto::{channel_hash, derive_key, ChannelKey};
use crate::channel::names::is_valid_name;

/// Words are keyed in chunks of this size; build progress is reported after
/// each chunk.
const BUILD_CHUNK: usize = 10_000;

/// A dictionary word with its precomputed key and its position in the
/// original word list (used by resume cursors).
#[derive(Clone, Debug)]
pub struct IndexedWord {
    pub word: String,
    pub key: ChannelKey,
    pub list_pos: usize,
}

/// 256 buckets of [`IndexedWord`], indexed by channel hash.
pub struct WordIndex {
    buckets: Vec<Vec<IndexedWord>>,
}

impl WordIndex {
    /// Build the index in one pass over the list. `progress` receives the
    /// number of words keyed so far, roughly every [`BUILD_CHUNK`] words.
    pub fn build(words: &[String], mut progress: impl FnMut(usize)) -> Self {
        let mut buckets: Vec<Vec<IndexedWord>> = (0..256).map(|_| Vec::new()).collect();

        let mut done = 0usize;
        for chunk in words.chunks(BUILD_CHUNK) {
            let keyed: Vec<(ChannelKey, u8)> = chunk
                .par_iter()
                .map(|word| {
                    let key = derive_key(word);
                    let hash = channel_hash(&key);
                    (key, hash)
                })
                .collect();

            for (word, (key, hash)) in chunk.iter().zip(keyed) {
                buckets[hash as usize].push(IndexedWord {
                    word: word.clone(),
                    key,
                    list_pos: done,
                });
                done += 1;
            }
            progress(done);
        }

        WordIndex { buckets }
    }

    /// Words whose channel hash equals `hash`, in word-list order.
    pub fn bucket(&self, hash: u8) -> &[IndexedWord] {
        &self.buckets[hash as usize]
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }
}

/// Normalize a raw word-list entry: trim, lowercase, and keep it only if it
/// is a legal room name.
pub fn normalize_word(raw: &str) -> Option<String> {
    let word = raw.trim().to_lowercase();
    if is_valid_name(&word) {
        Some(word)
    } else {
        None
    }
}

/// Filter a raw word sequence down to legal room names.
pub fn filter_words<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|w| normalize_word(w.as_ref()))
        .collect()
}
