use crate::{Iter, RwLock, SnapshotIter};
use foldhash::fast::RandomState;
use std::borrow::Borrow;
use std::cell::UnsafeCell;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use tracing::trace;

/// A plain, unsynchronized map as handed out by [`SyncMap::raw`] and
/// [`SyncMap::filter`].
pub type Map<K, V> = HashMap<K, V, RandomState>;

/// A thread-safe hashmap guarded by a single reader-writer lock.
///
/// Reads (`get`, `len`, `keys`, `raw`, `filter`, ...) share the lock, mutations
/// (`set`, `cas`, `delete`, `merge`, ...) take it exclusively. Two traversal
/// styles are offered:
///
/// * [`SyncMap::iter`] returns an [`Iter`] that holds the read lock until it is
///   closed. Writers are blocked for that whole time.
/// * [`SyncMap::snapshot`] returns a [`SnapshotIter`] over a private copy. It
///   holds no lock after construction.
///
/// # Examples
/// ```
/// use syncmap::SyncMap;
///
/// let map = SyncMap::from_map([("one".to_string(), 1), ("two".to_string(), 2)]);
/// map.set("three".to_string(), 3);
/// assert!(!map.cas("one".to_string(), 100));
/// assert_eq!(map.get("one"), Some(1));
///
/// map.delete(["two", "missing"]);
/// assert_eq!(map.len(), 2);
/// ```
pub struct SyncMap<K, V> {
    lock: RwLock,
    map: UnsafeCell<Map<K, V>>,
}

// Safety: the inner map is only reached through `lock`, exactly like `std::sync::RwLock`.
unsafe impl<K: Send, V: Send> Send for SyncMap<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for SyncMap<K, V> {}

impl<K: Eq + Hash, V> Default for SyncMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> SyncMap<K, V> {
    /// Creates an empty `SyncMap`.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty `SyncMap` able to hold `capacity` entries without
    /// reallocating.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The initial capacity of the hashmap.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lock: RwLock::new(),
            map: UnsafeCell::new(HashMap::with_capacity_and_hasher(
                capacity,
                RandomState::default(),
            )),
        }
    }

    /// Creates a `SyncMap` seeded with `initial`.
    ///
    /// The entries are overwrite-merged into an empty map, so for duplicate
    /// keys the last one wins. An empty `initial` gives an empty map.
    pub fn from_map<I>(initial: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let map = Self::new();
        map.merge(initial, true);
        map
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Gets a copy of the value stored for `key`, or `None` if the key is absent.
    ///
    /// # Examples
    /// ```
    /// use syncmap::SyncMap;
    ///
    /// let map = SyncMap::<String, u32>::new();
    /// map.set("key".to_string(), 42);
    /// assert_eq!(map.get("key"), Some(42));
    /// assert_eq!(map.get("missing"), None);
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        V: Clone,
        Q: Eq + Hash + ?Sized,
    {
        self.read().get(key).cloned()
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.read().contains_key(key)
    }

    /// Inserts `value` for `key`, replacing any previous value.
    pub fn set(&self, key: K, value: V) {
        self.write().insert(key, value);
    }

    /// Check-and-set: inserts `value` only if `key` is absent.
    ///
    /// Returns `true` if the value was inserted. An existing value is never
    /// overwritten.
    ///
    /// # Examples
    /// ```
    /// use syncmap::SyncMap;
    ///
    /// let map = SyncMap::<u32, &str>::new();
    /// assert!(map.cas(1, "first"));
    /// assert!(!map.cas(1, "second"));
    /// assert_eq!(map.get(&1), Some("first"));
    /// ```
    pub fn cas(&self, key: K, value: V) -> bool {
        match self.write().entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
        }
    }

    /// Removes `key` and returns its value, if it was present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.write().remove(key)
    }

    /// Removes every given key. Absent keys are ignored, and an empty list does
    /// not touch the lock at all.
    ///
    /// All keys are removed under one write lock, so readers never observe a
    /// partially applied delete.
    pub fn delete<'q, Q, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'q Q>,
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized + 'q,
    {
        let mut keys = keys.into_iter().peekable();
        if keys.peek().is_none() {
            return;
        }

        let mut map = self.write();
        let removed = keys.filter(|key| map.remove(*key).is_some()).count();
        drop(map);
        trace!(removed, "delete");
    }

    /// Merges `source` into this map under one write lock.
    ///
    /// With `overwrite` set every source entry is written. Without it, keys
    /// that already exist keep their current value. An empty `source` is a
    /// no-op.
    pub fn merge<I>(&self, source: I, overwrite: bool)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut source = source.into_iter().peekable();
        if source.peek().is_none() {
            return;
        }

        let mut map = self.write();
        let mut written = 0usize;
        for (key, value) in source {
            if overwrite {
                map.insert(key, value);
                written += 1;
            } else if let Entry::Vacant(entry) = map.entry(key) {
                entry.insert(value);
                written += 1;
            }
        }
        drop(map);
        trace!(written, overwrite, "merge");
    }

    /// Returns a detached copy of the whole map.
    pub fn raw(&self) -> Map<K, V>
    where
        K: Clone,
        V: Clone,
    {
        Map::clone(&self.read())
    }

    /// Returns every key exactly once, in no particular order.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.read().keys().cloned().collect()
    }

    /// Returns a copy of the entries for which `predicate` holds.
    ///
    /// # Examples
    /// ```
    /// use syncmap::SyncMap;
    ///
    /// let map = SyncMap::from_map([(1, 1u32), (3, 2), (5, 10), (8, 64), (9, 24)]);
    /// let filtered = map.filter(|k, v| v % *k as u32 == 0);
    /// assert_eq!(filtered.len(), 3);
    /// assert_eq!(filtered.get(&8), Some(&64));
    /// ```
    pub fn filter<F>(&self, mut predicate: F) -> Map<K, V>
    where
        F: FnMut(&K, &V) -> bool,
        K: Clone,
        V: Clone,
    {
        self.read()
            .iter()
            .filter(|(k, v)| predicate(*k, *v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Opens a live iterator in unspecified key order.
    ///
    /// **Locking behaviour:** the read lock is held until [`Iter::close`] is
    /// called or the iterator is dropped. Every writer blocks until then, and
    /// calling a mutating method on this map from the same thread deadlocks.
    /// Other readers and iterators proceed normally.
    pub fn iter(&self) -> Iter<'_, K, V>
    where
        K: Clone,
    {
        Iter::open(self, |_| {})
    }

    /// Opens a live iterator whose keys are stable-sorted by `less`.
    ///
    /// `less(a, b)` must return whether `a` goes before `b` and must be a strict
    /// weak ordering. Keys that compare equal keep their captured order.
    ///
    /// # Examples
    /// ```
    /// use syncmap::SyncMap;
    ///
    /// let map = SyncMap::from_map([(21, "a"), (1, "b"), (3, "c"), (2, "d")]);
    /// let mut it = map.iter_by(|a, b| a < b);
    /// let mut keys = vec![];
    /// while it.next() {
    ///     keys.push(*it.key().unwrap());
    /// }
    /// it.close();
    /// assert_eq!(keys, [1, 2, 3, 21]);
    /// ```
    pub fn iter_by<F>(&self, less: F) -> Iter<'_, K, V>
    where
        K: Clone,
        F: FnMut(&K, &K) -> bool,
    {
        Iter::open(self, |keys| sort_keys(keys, less))
    }

    /// Runs `f` with a live iterator that is closed as soon as `f` returns.
    pub fn with_iter<F, R>(&self, f: F) -> R
    where
        K: Clone,
        F: FnOnce(&mut Iter<'_, K, V>) -> R,
    {
        let mut iter = self.iter();
        let ret = f(&mut iter);
        iter.close();
        ret
    }

    /// Like [`SyncMap::with_iter`], with keys stable-sorted by `less`.
    pub fn with_iter_by<L, F, R>(&self, less: L, f: F) -> R
    where
        K: Clone,
        L: FnMut(&K, &K) -> bool,
        F: FnOnce(&mut Iter<'_, K, V>) -> R,
    {
        let mut iter = self.iter_by(less);
        let ret = f(&mut iter);
        iter.close();
        ret
    }

    /// Copies the map and returns a bidirectional iterator over the copy.
    ///
    /// The lock is only held while copying. Later changes to this map are
    /// invisible to the snapshot.
    pub fn snapshot(&self) -> SnapshotIter<K, V>
    where
        K: Clone,
        V: Clone,
    {
        SnapshotIter::capture(self.raw(), |_| {})
    }

    /// Like [`SyncMap::snapshot`], with keys stable-sorted by `less`.
    pub fn snapshot_by<F>(&self, less: F) -> SnapshotIter<K, V>
    where
        K: Clone,
        V: Clone,
        F: FnMut(&K, &K) -> bool,
    {
        SnapshotIter::capture(self.raw(), |keys| sort_keys(keys, less))
    }

    fn read(&self) -> ReadGuard<'_, K, V> {
        self.lock.read();
        ReadGuard { map: self }
    }

    fn write(&self) -> WriteGuard<'_, K, V> {
        self.lock.write();
        WriteGuard { map: self }
    }
}

impl<K, V> SyncMap<K, V> {
    /// Takes the read lock without a guard. Must be paired with `read_unlock`.
    pub(crate) fn read_lock(&self) {
        self.lock.read();
    }

    /// # Safety
    /// The caller must own a read hold taken by `read_lock`.
    pub(crate) unsafe fn read_unlock(&self) {
        self.lock.read_unlock();
    }

    /// # Safety
    /// The caller must hold the read lock for as long as the reference lives.
    pub(crate) unsafe fn map_unchecked(&self) -> &Map<K, V> {
        unsafe { &*self.map.get() }
    }
}

impl<K, V> Clone for SyncMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Builds an independent map from a copy of the current entries.
    fn clone(&self) -> Self {
        let map = self.read();
        let clone = Self::with_capacity(map.len());
        clone.merge(map.iter().map(|(k, v)| (k.clone(), v.clone())), true);
        trace!(len = map.len(), "clone");
        clone
    }
}

impl<K: Eq + Hash, V> From<HashMap<K, V>> for SyncMap<K, V> {
    fn from(map: HashMap<K, V>) -> Self {
        Self::from_map(map)
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for SyncMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_map(iter)
    }
}

impl<K, V> fmt::Debug for SyncMap<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.read().iter()).finish()
    }
}

/// Stable sort driven by a "goes before" predicate.
fn sort_keys<K>(keys: &mut [K], mut less: impl FnMut(&K, &K) -> bool) {
    keys.sort_by(|a, b| {
        if less(a, b) {
            Ordering::Less
        } else if less(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    });
}

/// An RAII guard for a shared hold on the map.
struct ReadGuard<'a, K, V> {
    map: &'a SyncMap<K, V>,
}

impl<K, V> Deref for ReadGuard<'_, K, V> {
    type Target = Map<K, V>;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.map.map.get() }
    }
}

impl<K, V> Drop for ReadGuard<'_, K, V> {
    fn drop(&mut self) {
        self.map.lock.read_unlock();
    }
}

/// An RAII guard for an exclusive hold on the map.
struct WriteGuard<'a, K, V> {
    map: &'a SyncMap<K, V>,
}

impl<K, V> Deref for WriteGuard<'_, K, V> {
    type Target = Map<K, V>;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.map.map.get() }
    }
}

impl<K, V> DerefMut for WriteGuard<'_, K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.map.map.get() }
    }
}

impl<K, V> Drop for WriteGuard<'_, K, V> {
    fn drop(&mut self) {
        self.map.lock.write_unlock();
    }
}
