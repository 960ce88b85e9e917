use crate::{IterError, IterResult, Map};
use std::hash::Hash;
use tracing::trace;

/// A bidirectional traversal over a private copy of the map.
///
/// The copy is taken when the iterator is created; afterwards it holds no lock
/// and has no link to the source map. Changes to the source are not visible.
///
/// A fresh iterator is positioned before the first key, so `next` yields the
/// first element. After [`SnapshotIter::close`] every movement returns `false`
/// and the accessors fail with [`IterError::Closed`].
///
/// # Examples
/// ```
/// use syncmap::SyncMap;
///
/// let map = SyncMap::from_map([("a", 1), ("b", 2), ("c", 3)]);
/// let mut it = map.snapshot_by(|a, b| a < b);
/// map.delete(["a"]);
///
/// assert!(it.end());
/// assert_eq!(it.key(), Ok(&"c"));
/// assert!(it.prev());
/// assert!(it.prev());
/// assert_eq!(it.key(), Ok(&"a"));
/// assert_eq!(it.val(), Ok(&1));
/// assert!(!it.prev());
/// it.close();
/// ```
#[derive(Debug)]
pub struct SnapshotIter<K, V> {
    /// `None` once closed.
    map: Option<Map<K, V>>,
    keys: Vec<K>,
    /// 0 is before the first key, `n` is on `keys[n - 1]`.
    pos: usize,
}

impl<K, V> SnapshotIter<K, V>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn capture(map: Map<K, V>, sort: impl FnOnce(&mut [K])) -> Self {
        let mut keys: Vec<K> = map.keys().cloned().collect();
        sort(&mut keys);
        trace!(entries = keys.len(), "snapshot iterator created");
        Self {
            map: Some(map),
            keys,
            pos: 0,
        }
    }
}

impl<K, V> SnapshotIter<K, V>
where
    K: Eq + Hash,
{
    /// Moves forward by one. Returns `false` on the last key.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.is_closed() || self.pos >= self.keys.len() {
            return false;
        }
        self.pos += 1;
        true
    }

    /// Moves backward by one. Returns `false` on the first key or before it.
    pub fn prev(&mut self) -> bool {
        if self.is_closed() || self.pos <= 1 {
            return false;
        }
        self.pos -= 1;
        true
    }

    /// Moves before the first key, so that the next `next` yields it.
    /// Returns `false` if the snapshot is empty.
    pub fn rewind(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.pos = 0;
        !self.keys.is_empty()
    }

    /// Moves onto the last key. Returns `false` if the snapshot is empty.
    pub fn end(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.pos = self.keys.len();
        !self.keys.is_empty()
    }

    /// Returns the current key. Fails with [`IterError::Closed`] once closed or
    /// while positioned before the first key.
    pub fn key(&self) -> IterResult<&K> {
        if self.is_closed() {
            return Err(IterError::Closed);
        }
        match self.pos {
            0 => Err(IterError::Closed),
            pos => Ok(&self.keys[pos - 1]),
        }
    }

    /// Returns the value copied for the current key.
    pub fn val(&self) -> IterResult<&V> {
        let key = self.key()?;
        let map = self.map.as_ref().ok_or(IterError::Closed)?;
        match map.get(key) {
            Some(value) => Ok(value),
            None => panic!("impossible: snapshot key without a value"),
        }
    }
}

impl<K, V> SnapshotIter<K, V> {
    /// Number of entries in the snapshot. Zero once closed.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether [`SnapshotIter::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.map.is_none()
    }

    /// Drops the copy and the cursor.
    pub fn close(&mut self) {
        if self.map.take().is_some() {
            self.keys = Vec::new();
            self.pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncMap;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_both_directions() {
        let _ = tracing_subscriber::fmt::try_init();
        let map = SyncMap::from_map([("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5)]);
        let mut asc = map.snapshot_by(|a, b| a < b);
        let mut desc = map.snapshot_by(|a, b| a > b);

        let mut keys = Vec::new();
        while asc.next() {
            keys.push(*asc.key().unwrap());
        }
        assert_eq!(keys, ["a", "b", "c", "d", "e"]);

        // Mutating the source while snapshots are alive is fine.
        map.delete([&keys[0]]);
        assert_eq!(map.get("a"), None);

        assert!(desc.end());
        assert_eq!(desc.key(), Ok(&"a"));
        assert_eq!(desc.val(), Ok(&1));
        assert!(desc.rewind());
        assert!(asc.end());

        while desc.next() {
            assert_eq!(desc.key(), asc.key());
            assert_eq!(desc.val(), asc.val());
            asc.prev();
        }
        assert_eq!(asc.key(), Ok(&"a"));

        for it in [&mut asc, &mut desc] {
            it.close();
            assert!(it.is_closed());
            assert!(!it.next());
            assert!(!it.prev());
            assert!(!it.end());
            assert!(!it.rewind());
            assert_eq!(it.key(), Err(IterError::Closed));
            assert_eq!(it.val(), Err(IterError::Closed));
        }
        asc.close();
    }

    #[test]
    fn test_snapshot_boundaries() {
        let map = SyncMap::from_map([(1, "one"), (2, "two")]);
        let mut it = map.snapshot_by(|a, b| a < b);
        assert_eq!(it.len(), 2);
        assert_eq!(it.key(), Err(IterError::Closed));
        assert_eq!(it.val().unwrap_err().to_string(), "iterator closed");
        assert!(!it.prev());
        assert_eq!(it.key(), Err(IterError::Closed));

        assert!(it.next());
        assert!(!it.prev());
        assert_eq!(it.key(), Ok(&1));
        assert!(it.next());
        assert!(!it.next());
        assert_eq!(it.key(), Ok(&2));
        assert_eq!(it.val(), Ok(&"two"));

        assert!(it.rewind());
        assert_eq!(it.key(), Err(IterError::Closed));
        assert!(it.next());
        assert_eq!(it.key(), Ok(&1));

        let map = SyncMap::<u32, u32>::new();
        let mut it = map.snapshot();
        assert!(it.is_empty());
        assert!(!it.next());
        assert!(!it.end());
        assert!(!it.rewind());
        assert_eq!(it.key(), Err(IterError::Closed));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let map = Arc::new(SyncMap::from_map((0..64u32).map(|i| (i, i))));
        let mut it = map.snapshot();

        let writer = {
            let map = map.clone();
            std::thread::spawn(move || {
                for i in 0..64u32 {
                    map.delete([&i]);
                    map.set(i + 100, i);
                }
            })
        };
        writer.join().unwrap();
        assert!(map.keys().iter().all(|k| *k >= 100));

        let mut seen = 0;
        while it.next() {
            let k = *it.key().unwrap();
            assert!(k < 64);
            assert_eq!(it.val(), Ok(&k));
            seen += 1;
        }
        assert_eq!(seen, 64);
    }
}
