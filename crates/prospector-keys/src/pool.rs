//! Per-service key pool with round-robin selection.
//!
//! The pool keeps a cursor that always rests on a usable key while one
//! exists. When every key is exhausted the pool offers the most recently
//! exhausted key once as a reset probe, so a quota that has since been
//! restored is noticed without hammering the service. While that probe is
//! in flight every other caller is told to wait for its verdict.

use crate::key::ApiKey;
use serde::Serialize;

#[derive(Debug, Clone)]
struct KeyEntry {
    key: ApiKey,
    exhausted: bool,
    last_failure: Option<String>,
}

/// A key handed out by a pool, with the position needed to report on it.
#[derive(Debug, Clone)]
pub struct KeyLease {
    /// Service the key belongs to
    pub service: String,
    /// Position of the key within its pool
    pub index: usize,
    /// The key itself
    pub key: ApiKey,
}

/// Outcome of asking a pool for a key.
#[derive(Debug, Clone)]
pub enum Selection {
    /// A usable key
    Key(KeyLease),
    /// All keys are exhausted; this one should be probed before giving up
    ResetProbe(KeyLease),
    /// A reset probe is in flight; ask again once it settles
    Probing,
    /// All keys are exhausted and the reset probe has been spent
    Exhausted,
}

/// Snapshot of a pool for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Service name
    pub service: String,
    /// Number of keys in the pool
    pub total: usize,
    /// Number of keys currently exhausted
    pub exhausted: usize,
    /// Most recent failure reason, if any
    pub last_failure: Option<String>,
}

/// Ordered keys for one service.
#[derive(Debug, Clone)]
pub struct KeyPool {
    service: String,
    entries: Vec<KeyEntry>,
    cursor: usize,
    last_exhausted: Option<usize>,
    reset_probed: bool,
    probing: bool,
}

impl KeyPool {
    /// Create a pool; key order is preserved.
    #[must_use]
    pub fn new(service: impl Into<String>, keys: Vec<ApiKey>) -> Self {
        Self {
            service: service.into(),
            entries: keys
                .into_iter()
                .map(|key| KeyEntry {
                    key,
                    exhausted: false,
                    last_failure: None,
                })
                .collect(),
            cursor: 0,
            last_exhausted: None,
            reset_probed: false,
            probing: false,
        }
    }

    /// Service this pool belongs to.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys not currently exhausted.
    #[must_use]
    pub fn available(&self) -> usize {
        self.entries.iter().filter(|e| !e.exhausted).count()
    }

    /// Whether every key is exhausted.
    #[must_use]
    pub fn all_exhausted(&self) -> bool {
        self.available() == 0
    }

    /// Whether the key at `index` is exhausted.
    #[must_use]
    pub fn is_exhausted(&self, index: usize) -> bool {
        self.entries.get(index).is_some_and(|e| e.exhausted)
    }

    /// Pick the next key.
    pub fn select(&mut self) -> Selection {
        if self.entries.is_empty() {
            return Selection::Exhausted;
        }

        if !self.entries[self.cursor].exhausted {
            let lease = self.lease(self.cursor);
            self.cursor = self.next_usable((self.cursor + 1) % self.entries.len());
            return Selection::Key(lease);
        }

        if self.probing {
            return Selection::Probing;
        }

        if !self.reset_probed {
            if let Some(index) = self.last_exhausted {
                self.reset_probed = true;
                self.probing = true;
                return Selection::ResetProbe(self.lease(index));
            }
        }

        Selection::Exhausted
    }

    /// Lease a specific key regardless of its state.
    #[must_use]
    pub fn lease_at(&self, index: usize) -> Option<KeyLease> {
        (index < self.entries.len()).then(|| self.lease(index))
    }

    /// Flag a key as exhausted and move the cursor off it.
    pub fn mark_exhausted(&mut self, index: usize, reason: &str) {
        let Some(entry) = self.entries.get_mut(index) else {
            return;
        };
        entry.exhausted = true;
        entry.last_failure = Some(reason.to_string());
        self.last_exhausted = Some(index);

        if self.cursor == index {
            self.cursor = self.next_usable((index + 1) % self.entries.len());
        }
    }

    /// Clear every exhausted flag and resume rotation at `index`.
    ///
    /// The reset probe stays spent until [`KeyPool::rearm`].
    pub fn reset(&mut self, index: usize) {
        for entry in &mut self.entries {
            entry.exhausted = false;
        }
        if index < self.entries.len() {
            self.cursor = index;
        }
    }

    /// Allow one more reset probe.
    pub fn rearm(&mut self) {
        self.reset_probed = false;
    }

    /// Record that the outstanding reset probe has settled.
    pub fn end_probe(&mut self) {
        self.probing = false;
    }

    /// Whether a reset probe is in flight.
    #[must_use]
    pub fn is_probing(&self) -> bool {
        self.probing
    }

    /// Snapshot for diagnostics.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            service: self.service.clone(),
            total: self.entries.len(),
            exhausted: self.entries.len() - self.available(),
            last_failure: self
                .last_exhausted
                .and_then(|i| self.entries[i].last_failure.clone()),
        }
    }

    fn lease(&self, index: usize) -> KeyLease {
        KeyLease {
            service: self.service.clone(),
            index,
            key: self.entries[index].key.clone(),
        }
    }

    /// First non-exhausted index at or after `from`, wrapping. Returns `from`
    /// when every key is exhausted.
    fn next_usable(&self, from: usize) -> usize {
        let len = self.entries.len();
        (0..len)
            .map(|offset| (from + offset) % len)
            .find(|&i| !self.entries[i].exhausted)
            .unwrap_or(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> KeyPool {
        KeyPool::new(
            "finder",
            (0..n).map(|i| ApiKey::new(format!("key-{i}"))).collect(),
        )
    }

    fn selected_index(selection: Selection) -> usize {
        match selection {
            Selection::Key(lease) => lease.index,
            other => panic!("expected a key, got {other:?}"),
        }
    }

    #[test]
    fn test_round_robin() {
        let mut pool = pool(3);
        let order: Vec<usize> = (0..6).map(|_| selected_index(pool.select())).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_exhausted_keys_are_skipped() {
        let mut pool = pool(3);
        pool.mark_exhausted(1, "429");

        let order: Vec<usize> = (0..4).map(|_| selected_index(pool.select())).collect();
        assert_eq!(order, vec![0, 2, 0, 2]);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_cursor_moves_off_exhausted_key() {
        let mut pool = pool(3);
        pool.mark_exhausted(0, "401");
        assert_eq!(selected_index(pool.select()), 1);
    }

    #[test]
    fn test_reset_probe_offered_once() {
        let mut pool = pool(2);
        pool.mark_exhausted(0, "429");
        pool.mark_exhausted(1, "429");
        assert!(pool.all_exhausted());

        match pool.select() {
            Selection::ResetProbe(lease) => assert_eq!(lease.index, 1),
            other => panic!("expected reset probe, got {other:?}"),
        }
        pool.end_probe();
        assert!(matches!(pool.select(), Selection::Exhausted));

        pool.rearm();
        assert!(matches!(pool.select(), Selection::ResetProbe(_)));
    }

    #[test]
    fn test_callers_wait_while_reset_check_in_flight() {
        let mut pool = pool(2);
        pool.mark_exhausted(0, "429");
        pool.mark_exhausted(1, "429");

        assert!(matches!(pool.select(), Selection::ResetProbe(_)));
        assert!(pool.is_probing());
        assert!(matches!(pool.select(), Selection::Probing));
        assert!(matches!(pool.select(), Selection::Probing));

        // Verdict: the key works again.
        pool.reset(1);
        pool.end_probe();
        assert!(!pool.is_probing());
        assert_eq!(selected_index(pool.select()), 1);
    }

    #[test]
    fn test_reset_resumes_rotation() {
        let mut pool = pool(2);
        pool.mark_exhausted(0, "429");
        pool.mark_exhausted(1, "429");
        pool.reset(1);

        assert_eq!(pool.available(), 2);
        assert_eq!(selected_index(pool.select()), 1);
        assert_eq!(selected_index(pool.select()), 0);
    }

    #[test]
    fn test_empty_pool_is_exhausted() {
        let mut pool = pool(0);
        assert!(pool.is_empty());
        assert!(matches!(pool.select(), Selection::Exhausted));
    }

    #[test]
    fn test_status() {
        let mut pool = pool(3);
        pool.mark_exhausted(2, "quota exceeded");
        let status = pool.status();
        assert_eq!(status.total, 3);
        assert_eq!(status.exhausted, 1);
        assert_eq!(status.last_failure.as_deref(), Some("quota exceeded"));
    }
}
