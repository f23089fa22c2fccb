//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that stays inside the user key space.

use proptest::prelude::*;
use std::collections::BTreeMap;
use strictkv_backend::{KeySelector, StreamingMode};
use strictkv_core::RangeOptions;

/// Strategy for user keys: 1 to 12 bytes, never starting with `0xff`.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    (0u8..0xff, prop::collection::vec(any::<u8>(), 0..12)).prop_map(|(first, rest)| {
        let mut key = Vec::with_capacity(rest.len() + 1);
        key.push(first);
        key.extend(rest);
        key
    })
}

/// Strategy for values (arbitrary bytes, up to 256).
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for a small ordered data set.
pub fn dataset_strategy(max_rows: usize) -> impl Strategy<Value = BTreeMap<Vec<u8>, Vec<u8>>> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 0..max_rows)
}

/// Strategy for selectors anchored on a user key with a small offset.
pub fn selector_strategy() -> impl Strategy<Value = KeySelector> {
    (key_strategy(), any::<bool>(), -4i32..=4)
        .prop_map(|(key, or_equal, offset)| KeySelector::new(key, or_equal, offset))
}

/// Strategy for streaming modes.
pub fn streaming_mode_strategy() -> impl Strategy<Value = StreamingMode> {
    prop_oneof![
        Just(StreamingMode::WantAll),
        Just(StreamingMode::Iterator),
        Just(StreamingMode::Small),
        Just(StreamingMode::Medium),
        Just(StreamingMode::Large),
        Just(StreamingMode::Serial),
    ]
}

/// Strategy for range options (no `Exact`, which needs a limit).
pub fn range_options_strategy() -> impl Strategy<Value = RangeOptions> {
    (0usize..40, streaming_mode_strategy(), any::<bool>()).prop_map(|(limit, mode, reverse)| {
        RangeOptions::new().limit(limit).mode(mode).reverse(reverse)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn keys_stay_in_user_space(key in key_strategy()) {
            prop_assert!(!key.is_empty());
            prop_assert!(key[0] != 0xff);
        }

        #[test]
        fn selectors_keep_small_offsets(sel in selector_strategy()) {
            prop_assert!((-4..=4).contains(&sel.offset()));
        }
    }
}
