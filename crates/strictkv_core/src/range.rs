//! Range reads.
//!
//! A range read is described by two [`KeySelector`]s and a set of
//! [`RangeOptions`]. Nothing is read until the [`RangeResult`] is consumed,
//! either all at once with [`RangeResult::get_slice`] or lazily with
//! [`RangeResult::iter`].
//!
//! ## Pagination
//!
//! The backend answers in chunks. After each chunk the iterator moves the
//! near boundary past the last key it received: forward scans continue at
//! `first_greater_than(last)`, reverse scans end at
//! `first_greater_or_equal(last)`. A key is therefore never returned twice
//! and the scan always makes progress.

use crate::error::{Error, Result};
use crate::transaction::Transaction;
use bytes::Bytes;
use std::iter::FusedIterator;
use strictkv_backend::{KeySelector, KeyValue, RangeRequest, StreamingMode};

/// Options for a range read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeOptions {
    /// Maximum number of rows; `0` is unlimited.
    pub limit: usize,
    /// Prefetch hint for the backend.
    pub mode: StreamingMode,
    /// Return rows in descending key order.
    pub reverse: bool,
}

impl RangeOptions {
    /// Unlimited, forward, `Iterator` mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the row limit.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the streaming mode.
    #[must_use]
    pub const fn mode(mut self, mode: StreamingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the scan direction.
    #[must_use]
    pub const fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}

/// A half-open range of concrete keys, `[begin, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRange {
    /// Inclusive begin key.
    pub begin: Bytes,
    /// Exclusive end key.
    pub end: Bytes,
}

impl KeyRange {
    /// Creates a range from two keys.
    pub fn new(begin: impl AsRef<[u8]>, end: impl AsRef<[u8]>) -> Self {
        Self {
            begin: Bytes::copy_from_slice(begin.as_ref()),
            end: Bytes::copy_from_slice(end.as_ref()),
        }
    }
}

/// A range bounded by two selectors, resolved by the backend at read time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectorRange {
    /// Selector for the first key in the range.
    pub begin: KeySelector,
    /// Selector for the first key past the range.
    pub end: KeySelector,
}

impl SelectorRange {
    /// Creates a range from two selectors.
    #[must_use]
    pub fn new(begin: KeySelector, end: KeySelector) -> Self {
        Self { begin, end }
    }
}

impl From<KeyRange> for SelectorRange {
    fn from(range: KeyRange) -> Self {
        Self {
            begin: KeySelector::first_greater_or_equal(&range.begin),
            end: KeySelector::first_greater_or_equal(&range.end),
        }
    }
}

impl From<(KeySelector, KeySelector)> for SelectorRange {
    fn from((begin, end): (KeySelector, KeySelector)) -> Self {
        Self { begin, end }
    }
}

/// The smallest key greater than every key starting with `prefix`.
///
/// Trailing `0xff` bytes are dropped and the last remaining byte is
/// incremented. A prefix made only of `0xff` bytes has no such key.
pub fn strinc(prefix: &[u8]) -> Result<Bytes> {
    let Some(last) = prefix.iter().rposition(|&b| b != 0xff) else {
        return Err(Error::invalid_operation(
            "key must contain at least one byte not equal to 0xFF",
        ));
    };
    let mut end = prefix[..=last].to_vec();
    end[last] += 1;
    Ok(Bytes::from(end))
}

/// The range of every key starting with `prefix`.
///
/// The empty prefix covers the whole user key space, `["", "\xff")`.
pub fn prefix_range(prefix: &[u8]) -> Result<KeyRange> {
    if prefix.is_empty() {
        return Ok(KeyRange::new(b"", b"\xff"));
    }
    Ok(KeyRange {
        begin: Bytes::copy_from_slice(prefix),
        end: strinc(prefix)?,
    })
}

/// A lazily evaluated range read bound to its transaction.
#[derive(Debug, Clone)]
pub struct RangeResult<'a> {
    tr: &'a Transaction,
    range: SelectorRange,
    options: RangeOptions,
    snapshot: bool,
}

impl<'a> RangeResult<'a> {
    pub(crate) fn new(
        tr: &'a Transaction,
        range: SelectorRange,
        options: RangeOptions,
        snapshot: bool,
    ) -> Self {
        Self {
            tr,
            range,
            options,
            snapshot,
        }
    }

    /// Returns an iterator that fetches chunks as it goes.
    #[must_use]
    pub fn iter(&self) -> RangeIterator<'a> {
        RangeIterator::new(self.tr, self.range.clone(), self.options, self.snapshot)
    }

    /// Reads the whole range.
    ///
    /// The default `Iterator` mode is upgraded to `WantAll`, since every
    /// row is wanted anyway.
    pub fn get_slice(&self) -> Result<Vec<KeyValue>> {
        let mut options = self.options;
        if options.mode == StreamingMode::Iterator {
            options.mode = StreamingMode::WantAll;
        }
        RangeIterator::new(self.tr, self.range.clone(), options, self.snapshot).collect()
    }
}

impl<'a> IntoIterator for RangeResult<'a> {
    type Item = Result<KeyValue>;
    type IntoIter = RangeIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        RangeIterator::new(self.tr, self.range, self.options, self.snapshot)
    }
}

impl<'a> IntoIterator for &RangeResult<'a> {
    type Item = Result<KeyValue>;
    type IntoIter = RangeIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the rows of a range read.
///
/// Yields `Err` at most once; after an error, or after the last row, it
/// only yields `None`.
#[derive(Debug)]
pub struct RangeIterator<'a> {
    tr: &'a Transaction,
    begin: KeySelector,
    end: KeySelector,
    options: RangeOptions,
    snapshot: bool,
    iteration: u32,
    received: usize,
    buffer: std::vec::IntoIter<KeyValue>,
    more: bool,
    done: bool,
}

impl<'a> RangeIterator<'a> {
    fn new(
        tr: &'a Transaction,
        range: SelectorRange,
        options: RangeOptions,
        snapshot: bool,
    ) -> Self {
        Self {
            tr,
            begin: range.begin,
            end: range.end,
            options,
            snapshot,
            iteration: 0,
            received: 0,
            buffer: Vec::new().into_iter(),
            more: true,
            done: false,
        }
    }

    fn fetch(&mut self) -> Result<()> {
        self.iteration += 1;
        let limit = if self.options.limit > 0 {
            self.options.limit - self.received
        } else {
            0
        };
        let request = RangeRequest {
            begin: self.begin.clone(),
            end: self.end.clone(),
            limit,
            mode: self.options.mode,
            iteration: self.iteration,
            snapshot: self.snapshot,
            reverse: self.options.reverse,
        };
        let chunk = self.tr.range_chunk(&request).get()?;
        self.received += chunk.key_values.len();

        let limit_reached = self.options.limit > 0 && self.received >= self.options.limit;
        self.more = chunk.more && !limit_reached;
        match chunk.key_values.last() {
            Some(last) if self.options.reverse => {
                self.end = KeySelector::first_greater_or_equal(&last.key);
            }
            Some(last) => {
                self.begin = KeySelector::first_greater_than(&last.key);
            }
            None => self.more = false,
        }
        tracing::trace!(
            iteration = self.iteration,
            rows = chunk.key_values.len(),
            more = self.more,
            "fetched range chunk"
        );
        self.buffer = chunk.key_values.into_iter();
        Ok(())
    }
}

impl Iterator for RangeIterator<'_> {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(kv) = self.buffer.next() {
                return Some(Ok(kv));
            }
            if !self.more {
                self.done = true;
                return None;
            }
            if let Err(err) = self.fetch() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

impl FusedIterator for RangeIterator<'_> {}
