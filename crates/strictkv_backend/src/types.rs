//! Value types shared between the backend and its clients.

use bytes::Bytes;
use std::fmt;
use std::ops::{Add, Sub};

/// A resolvable pointer into the ordered key space.
///
/// A selector names "the last key less than (or equal to) `key`, then move
/// `offset` keys forward". Resolution happens inside the backend because it
/// depends on which keys exist; offset arithmetic is pure.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeySelector {
    key: Bytes,
    or_equal: bool,
    offset: i32,
}

impl KeySelector {
    /// Builds a selector from its raw parts.
    pub fn new(key: impl AsRef<[u8]>, or_equal: bool, offset: i32) -> Self {
        Self {
            key: Bytes::copy_from_slice(key.as_ref()),
            or_equal,
            offset,
        }
    }

    /// The greatest key strictly less than `key`.
    pub fn last_less_than(key: impl AsRef<[u8]>) -> Self {
        Self::new(key, false, 0)
    }

    /// The greatest key less than or equal to `key`.
    pub fn last_less_or_equal(key: impl AsRef<[u8]>) -> Self {
        Self::new(key, true, 0)
    }

    /// The smallest key strictly greater than `key`.
    pub fn first_greater_than(key: impl AsRef<[u8]>) -> Self {
        Self::new(key, true, 1)
    }

    /// The smallest key greater than or equal to `key`.
    pub fn first_greater_or_equal(key: impl AsRef<[u8]>) -> Self {
        Self::new(key, false, 1)
    }

    /// The reference key.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Whether the reference key itself counts as "less".
    #[must_use]
    pub fn or_equal(&self) -> bool {
        self.or_equal
    }

    /// Number of keys to move from the anchor.
    #[must_use]
    pub fn offset(&self) -> i32 {
        self.offset
    }
}

impl Add<i32> for KeySelector {
    type Output = KeySelector;

    fn add(mut self, rhs: i32) -> KeySelector {
        self.offset = self.offset.wrapping_add(rhs);
        self
    }
}

impl Sub<i32> for KeySelector {
    type Output = KeySelector;

    fn sub(mut self, rhs: i32) -> KeySelector {
        self.offset = self.offset.wrapping_sub(rhs);
        self
    }
}

impl fmt::Debug for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.or_equal, self.offset) {
            (false, 0) => Some("last_less_than"),
            (true, 0) => Some("last_less_or_equal"),
            (true, 1) => Some("first_greater_than"),
            (false, 1) => Some("first_greater_or_equal"),
            _ => None,
        };
        let key = self.key.escape_ascii();
        match name {
            Some(name) => write!(f, "{name}(b\"{key}\")"),
            None => write!(
                f,
                "KeySelector(b\"{key}\", or_equal={}, offset={})",
                self.or_equal, self.offset
            ),
        }
    }
}

/// A key together with its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyValue {
    /// The key.
    pub key: Bytes,
    /// The value stored under `key`.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a pair, copying both slices.
    pub fn new(key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self {
            key: Bytes::copy_from_slice(key.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
        }
    }
}

/// Prefetch hint for range reads. Never changes which rows are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamingMode {
    /// Fetch the whole range as fast as possible.
    WantAll,
    /// Start small and grow chunk sizes as iteration proceeds.
    #[default]
    Iterator,
    /// Fetch exactly `limit` rows in one chunk. Requires a limit.
    Exact,
    /// Small chunks.
    Small,
    /// Medium chunks.
    Medium,
    /// Large chunks.
    Large,
    /// Very large chunks, one at a time.
    Serial,
}

impl StreamingMode {
    /// Native code of the mode.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::WantAll => -2,
            Self::Iterator => -1,
            Self::Exact => 0,
            Self::Small => 1,
            Self::Medium => 2,
            Self::Large => 3,
            Self::Serial => 4,
        }
    }
}

/// Server-side atomic mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    /// Little-endian integer addition.
    Add,
    /// Bitwise AND.
    BitAnd,
    /// Bitwise OR.
    BitOr,
    /// Bitwise XOR.
    BitXor,
    /// Append if the result fits in the value size limit.
    AppendIfFits,
    /// Little-endian unsigned maximum.
    Max,
    /// Little-endian unsigned minimum.
    Min,
    /// Write with the commit versionstamp spliced into the key.
    SetVersionstampedKey,
    /// Write with the commit versionstamp spliced into the value.
    SetVersionstampedValue,
    /// Lexicographic minimum.
    ByteMin,
    /// Lexicographic maximum.
    ByteMax,
    /// Clear the key if its value equals the operand.
    CompareAndClear,
}

impl MutationType {
    /// Every mutation kind, in code order.
    pub const ALL: [MutationType; 12] = [
        Self::Add,
        Self::BitAnd,
        Self::BitOr,
        Self::BitXor,
        Self::AppendIfFits,
        Self::Max,
        Self::Min,
        Self::SetVersionstampedKey,
        Self::SetVersionstampedValue,
        Self::ByteMin,
        Self::ByteMax,
        Self::CompareAndClear,
    ];

    /// Native code of the mutation.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Add => 2,
            Self::BitAnd => 6,
            Self::BitOr => 7,
            Self::BitXor => 8,
            Self::AppendIfFits => 9,
            Self::Max => 12,
            Self::Min => 13,
            Self::SetVersionstampedKey => 14,
            Self::SetVersionstampedValue => 15,
            Self::ByteMin => 16,
            Self::ByteMax => 17,
            Self::CompareAndClear => 20,
        }
    }

    /// Looks a mutation up by native code.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }
}

/// One range read request as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    /// Inclusive begin boundary.
    pub begin: KeySelector,
    /// Exclusive end boundary.
    pub end: KeySelector,
    /// Maximum rows for this request; `0` is unlimited.
    pub limit: usize,
    /// Prefetch hint.
    pub mode: StreamingMode,
    /// 1-based chunk number within one logical scan.
    pub iteration: u32,
    /// Whether the read skips conflict tracking.
    pub snapshot: bool,
    /// Whether rows come back in descending key order.
    pub reverse: bool,
}

/// One chunk of a range read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeChunk {
    /// Rows in scan order.
    pub key_values: Vec<KeyValue>,
    /// Whether rows remain in the requested range past this chunk.
    pub more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn named_constructors() {
        let sel = KeySelector::first_greater_than(b"a");
        assert_eq!(sel.key(), b"a");
        assert!(sel.or_equal());
        assert_eq!(sel.offset(), 1);
        assert_eq!(format!("{sel:?}"), "first_greater_than(b\"a\")");
    }

    #[test]
    fn arithmetic_keeps_anchor() {
        let sel = KeySelector::first_greater_or_equal(b"k") + 3 - 1;
        assert_eq!(sel.key(), b"k");
        assert!(!sel.or_equal());
        assert_eq!(sel.offset(), 3);
    }

    #[test]
    fn arithmetic_near_the_bounds_composes() {
        let sel = KeySelector::first_greater_or_equal(b"k");
        assert_eq!(
            sel.clone() + i32::MAX + (-5),
            sel.clone() + (i32::MAX - 5)
        );
        assert_eq!((sel.clone() + i32::MAX - i32::MAX).offset(), 1);
        assert_eq!((sel + i32::MAX + 1).offset(), i32::MIN + 1);
    }

    #[test]
    fn mutation_codes_round_trip() {
        for m in MutationType::ALL {
            assert_eq!(MutationType::from_code(m.code()), Some(m));
        }
        assert_eq!(MutationType::from_code(3), None);
    }

    proptest! {
        #[test]
        fn add_is_associative(
            key in prop::collection::vec(any::<u8>(), 0..8),
            or_equal in any::<bool>(),
            start in any::<i32>(),
            n in any::<i32>(),
            m in any::<i32>(),
        ) {
            let sel = KeySelector::new(&key, or_equal, start);
            prop_assert_eq!(sel.clone() + n + m, sel + n.wrapping_add(m));
        }
    }
}
