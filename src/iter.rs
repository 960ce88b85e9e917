use crate::{IterError, IterResult, SyncMap};
use std::hash::Hash;
use tracing::trace;

/// A traversal that holds the map's read lock while it is open.
///
/// The keys are captured when the iterator is opened; each value is looked up
/// in the still-locked map when it is asked for. No writer can run between
/// opening and closing, so the view stays consistent for the whole traversal.
///
/// The lock is released by [`Iter::close`]. Dropping an iterator that was not
/// closed releases it as well. Leaking one (e.g. with `std::mem::forget`)
/// blocks every writer of the map forever.
///
/// # Examples
/// ```
/// use syncmap::{IterError, SyncMap};
///
/// let map = SyncMap::from_map([("foo", "bar"), ("bar", "foo")]);
/// let mut it = map.iter();
/// while it.next() {
///     let key = it.key().unwrap();
///     let value = it.val().unwrap();
///     assert_ne!(key, value);
/// }
/// it.close();
/// assert_eq!(it.key(), Err(IterError::Closed));
///
/// // Writers may proceed again.
/// map.set("baz", "qux");
/// ```
pub struct Iter<'a, K, V> {
    /// `None` once closed.
    map: Option<&'a SyncMap<K, V>>,
    keys: Vec<K>,
    cursor: Option<usize>,
}

impl<'a, K, V> Iter<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn open(map: &'a SyncMap<K, V>, sort: impl FnOnce(&mut [K])) -> Self {
        map.read_lock();
        // Built before sorting so that a panicking comparator still unlocks on drop.
        let mut iter = Self {
            map: Some(map),
            keys: Vec::new(),
            cursor: None,
        };
        iter.keys = unsafe { map.map_unchecked() }.keys().cloned().collect();
        sort(&mut iter.keys);
        trace!(keys = iter.keys.len(), "live iterator opened");
        iter
    }
}

impl<K, V> Iter<'_, K, V>
where
    K: Eq + Hash,
{
    /// Moves to the next key. Returns `false` once all keys have been visited;
    /// the cursor then stays on the last key.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.map.is_none() {
            return false;
        }
        let next = self.cursor.map_or(0, |c| c + 1);
        if next >= self.keys.len() {
            return false;
        }
        self.cursor = Some(next);
        true
    }

    /// Returns the current key. Fails with [`IterError::Closed`] once closed or
    /// before the first successful `next`.
    pub fn key(&self) -> IterResult<&K> {
        if self.map.is_none() {
            return Err(IterError::Closed);
        }
        let cursor = self.cursor.ok_or(IterError::Closed)?;
        Ok(&self.keys[cursor])
    }

    /// Returns the value stored for the current key.
    pub fn val(&self) -> IterResult<&V> {
        let key = self.key()?;
        let map = self.map.ok_or(IterError::Closed)?;
        // Safety: `map` is only set while this iterator owns a read hold.
        match unsafe { map.map_unchecked() }.get(key) {
            Some(value) => Ok(value),
            None => panic!("impossible: key vanished while the read lock is held"),
        }
    }
}

impl<K, V> Iter<'_, K, V> {
    /// Number of keys captured when the iterator was opened.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the iterator captured no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether [`Iter::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.map.is_none()
    }

    /// Drops the captured keys and releases the read lock.
    ///
    /// Further calls are no-ops.
    pub fn close(&mut self) {
        if let Some(map) = self.map.take() {
            let keys = std::mem::take(&mut self.keys).len();
            self.cursor = None;
            // Safety: the hold was taken in `open` and `map` was still set.
            unsafe { map.read_unlock() };
            trace!(keys, "live iterator closed");
        }
    }
}

impl<K, V> Drop for Iter<'_, K, V> {
    fn drop(&mut self) {
        self.close();
    }
}
