pub mod crypto;
pub mod names;

pub use crypto::{channel_hash, derive_key, ChannelKey, PlainFrame, KEY_LEN};
pub use names::{count_names_for_length, index_to_name, is_valid_name, name_to_index};
