//! Multi-version key store and committed-write log.

use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// One committed version of a key. `None` is a tombstone.
type Version = (i64, Option<Bytes>);

/// Keys with their version history, plus the write ranges of recent
/// commits for optimistic conflict checks.
///
/// History older than the horizon is dropped by [`prune`](Self::prune).
/// Reads and conflict checks below the horizon are answered with
/// `transaction_too_old` by the engine.
#[derive(Debug, Default)]
pub(crate) struct VersionedStore {
    keys: BTreeMap<Bytes, Vec<Version>>,
    write_log: Vec<(i64, Vec<(Bytes, Bytes)>)>,
    committed: i64,
    horizon: i64,
    /// Keys whose history may still shrink once the horizon moves.
    uncompacted: BTreeSet<Bytes>,
}

impl VersionedStore {
    pub(crate) fn new() -> Self {
        Self {
            keys: BTreeMap::new(),
            write_log: Vec::new(),
            committed: 1,
            horizon: 0,
            uncompacted: BTreeSet::new(),
        }
    }

    /// Latest committed version.
    pub(crate) fn committed_version(&self) -> i64 {
        self.committed
    }

    /// Oldest version whose reads and conflict checks are still exact.
    pub(crate) fn horizon(&self) -> i64 {
        self.horizon
    }

    /// Forgets history no reader at or above `horizon` can observe.
    pub(crate) fn prune(&mut self, horizon: i64) {
        let horizon = horizon.min(self.committed);
        if horizon <= self.horizon {
            return;
        }
        self.horizon = horizon;

        let stale = self.write_log.partition_point(|(v, _)| *v <= horizon);
        self.write_log.drain(..stale);

        let keys = std::mem::take(&mut self.uncompacted);
        for key in keys {
            let Some(history) = self.keys.get_mut(&key) else {
                continue;
            };
            compact(history, horizon);
            let settled = matches!(history.as_slice(), [(v, _)] if *v <= horizon);
            if !settled {
                self.uncompacted.insert(key);
            } else if history[0].1.is_none() {
                self.keys.remove(&key);
            }
        }
    }

    /// Number of versions held across every key.
    #[cfg(test)]
    pub(crate) fn retained_versions(&self) -> usize {
        self.keys.values().map(Vec::len).sum()
    }

    /// Number of commits still tracked for conflict checks.
    #[cfg(test)]
    pub(crate) fn logged_commits(&self) -> usize {
        self.write_log.len()
    }

    /// Value of `key` as of `version`.
    pub(crate) fn read_at(&self, key: &[u8], version: i64) -> Option<Bytes> {
        self.keys
            .get(key)
            .and_then(|history| visible(history, version))
    }

    /// Latest committed value of `key`.
    pub(crate) fn latest(&self, key: &[u8]) -> Option<Bytes> {
        self.read_at(key, self.committed)
    }

    /// Live keys in `[begin, end)` as of `version`, ascending.
    pub(crate) fn range_at(&self, begin: &[u8], end: &[u8], version: i64) -> Vec<(Bytes, Bytes)> {
        if begin >= end {
            return Vec::new();
        }
        self.keys
            .range::<[u8], _>((Bound::Included(begin), Bound::Excluded(end)))
            .filter_map(|(key, history)| visible(history, version).map(|v| (key.clone(), v)))
            .collect()
    }

    /// Returns true if a commit newer than `since` wrote into any of `ranges`.
    pub(crate) fn conflicts(&self, since: i64, ranges: &[(Bytes, Bytes)]) -> bool {
        self.write_log
            .iter()
            .rev()
            .take_while(|(version, _)| *version > since)
            .any(|(_, writes)| {
                writes
                    .iter()
                    .any(|(wb, we)| ranges.iter().any(|(rb, re)| wb < re && rb < we))
            })
    }

    /// Installs a commit at the next version and returns it.
    pub(crate) fn commit(
        &mut self,
        updates: Vec<(Bytes, Option<Bytes>)>,
        write_ranges: Vec<(Bytes, Bytes)>,
    ) -> i64 {
        let version = self.committed + 1;
        for (key, value) in updates {
            self.keys.entry(key.clone()).or_default().push((version, value));
            self.uncompacted.insert(key);
        }
        if !write_ranges.is_empty() {
            self.write_log.push((version, write_ranges));
        }
        self.committed = version;
        version
    }

    /// Keys with any live version in `[begin, end)` at `version`, used when
    /// a range clear has to be expanded into tombstones.
    pub(crate) fn live_keys(&self, begin: &[u8], end: &[u8], version: i64) -> Vec<Bytes> {
        self.range_at(begin, end, version)
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }
}

/// Drops versions shadowed at `horizon`, keeping the one visible there.
fn compact(history: &mut Vec<Version>, horizon: i64) {
    let visible_at = history.partition_point(|(v, _)| *v <= horizon);
    if visible_at > 1 {
        history.drain(..visible_at - 1);
    }
}

fn visible(history: &[Version], version: i64) -> Option<Bytes> {
    history
        .iter()
        .rev()
        .find(|(v, _)| *v <= version)
        .and_then(|(_, value)| value.clone())
}
