//! Registered watches.

use crate::completion::Completer;
use bytes::Bytes;
use std::collections::BTreeMap;

struct Watcher {
    /// Committed value the watch was registered against.
    value: Option<Bytes>,
    done: Completer<()>,
}

/// Watches that survived their transaction's commit, keyed by watched key.
#[derive(Default)]
pub(crate) struct WatchRegistry {
    watchers: BTreeMap<Bytes, Vec<Watcher>>,
}

impl WatchRegistry {
    /// Registers a watch. If `current` already differs from `value` it fires at once.
    pub(crate) fn register(
        &mut self,
        key: Bytes,
        value: Option<Bytes>,
        current: Option<Bytes>,
        done: Completer<()>,
    ) {
        if value != current {
            done.succeed(());
            return;
        }
        self.watchers
            .entry(key)
            .or_default()
            .push(Watcher { value, done });
    }

    /// Fires every watch on `key` whose registered value differs from `value`.
    pub(crate) fn notify(&mut self, key: &[u8], value: &Option<Bytes>) -> usize {
        let Some(list) = self.watchers.get_mut(key) else {
            return 0;
        };
        let mut fired = 0;
        let mut kept = Vec::with_capacity(list.len());
        for watcher in list.drain(..) {
            if watcher.done.is_cancelled() || watcher.done.is_abandoned() {
                continue;
            }
            if &watcher.value != value {
                watcher.done.succeed(());
                fired += 1;
            } else {
                kept.push(watcher);
            }
        }
        if kept.is_empty() {
            self.watchers.remove(key);
        } else {
            *list = kept;
        }
        fired
    }

    /// Drops watches nobody can observe any more, then returns how many remain.
    pub(crate) fn live_count(&mut self) -> usize {
        self.watchers.retain(|_, list| {
            list.retain(|w| !w.done.is_cancelled() && !w.done.is_abandoned());
            !list.is_empty()
        });
        self.watchers.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::completion;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn fires_on_change_only() {
        let mut registry = WatchRegistry::default();
        let (tx, rx) = completion();
        registry.register(b("k"), Some(b("1")), Some(b("1")), tx);
        assert_eq!(registry.notify(b"k", &Some(b("1"))), 0);
        assert!(!rx.is_ready());
        assert_eq!(registry.notify(b"k", &Some(b("2"))), 1);
        assert_eq!(rx.result(), Ok(()));
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn fires_immediately_when_stale() {
        let mut registry = WatchRegistry::default();
        let (tx, rx) = completion();
        registry.register(b("k"), None, Some(b("x")), tx);
        assert!(rx.is_ready());
    }

    #[test]
    fn prunes_cancelled_and_abandoned() {
        let mut registry = WatchRegistry::default();
        let (tx1, rx1) = completion();
        let (tx2, rx2) = completion();
        registry.register(b("a"), None, None, tx1);
        registry.register(b("b"), None, None, tx2);
        assert_eq!(registry.live_count(), 2);
        rx1.cancel();
        drop(rx2);
        assert_eq!(registry.live_count(), 0);
    }
}
