// Modified from https://github.com/rust-lang/rust/blob/master/library/std/src/sys/sync/rwlock/futex.rs
use std::sync::atomic::{
    AtomicU32,
    Ordering::{Acquire, Relaxed, Release},
};

/// A raw reader-writer lock on top of a single futex word.
///
/// Unlike `std::sync::RwLock` there are no guards: every `read` must be paired
/// with a `read_unlock` and every `write` with a `write_unlock`. This lets a read
/// hold outlive the scope that acquired it.
///
/// Readers are preferred. A writer waiting for the lock does not stop new
/// readers from entering, so a thread that already holds a read lock can always
/// take another one.
pub struct RwLock {
    // Bits 0..30: number of readers, or MASK if write-locked.
    // Bit 30: some thread is sleeping on the futex.
    state: AtomicU32,
}

const READ_LOCKED: u32 = 1;
const MASK: u32 = (1 << 30) - 1;
const WRITE_LOCKED: u32 = MASK;
const MAX_READERS: u32 = MASK - 1;
const WAITING: u32 = 1 << 30;

#[inline]
fn is_unlocked(state: u32) -> bool {
    state & MASK == 0
}

#[inline]
fn is_read_lockable(state: u32) -> bool {
    state & MASK < MAX_READERS
}

impl RwLock {
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn try_read(&self) -> bool {
        self.state
            .fetch_update(Acquire, Relaxed, |s| {
                is_read_lockable(s).then_some(s + READ_LOCKED)
            })
            .is_ok()
    }

    #[inline]
    pub fn read(&self) {
        if !self.try_read() {
            self.read_contended();
        }
    }

    #[cold]
    fn read_contended(&self) {
        let mut state = self.spin(is_read_lockable);

        loop {
            if is_read_lockable(state) {
                match self.state.compare_exchange_weak(
                    state,
                    state + READ_LOCKED,
                    Acquire,
                    Relaxed,
                ) {
                    Ok(_) => return, // Locked!
                    Err(s) => {
                        state = s;
                        continue;
                    }
                }
            }

            if state & MASK == MAX_READERS {
                panic!("too many active read locks on RwLock");
            }

            if !self.mark_waiting(&mut state) {
                continue;
            }

            atomic_wait::wait(&self.state, state);

            state = self.spin(is_read_lockable);
        }
    }

    #[inline]
    pub fn try_write(&self) -> bool {
        self.state
            .fetch_update(Acquire, Relaxed, |s| {
                is_unlocked(s).then_some(s + WRITE_LOCKED)
            })
            .is_ok()
    }

    #[inline]
    pub fn write(&self) {
        if !self.try_write() {
            self.write_contended();
        }
    }

    #[cold]
    fn write_contended(&self) {
        let mut state = self.spin(is_unlocked);

        loop {
            if is_unlocked(state) {
                // Keep the waiting bit: other sleepers still need a wake-up later.
                match self.state.compare_exchange_weak(
                    state,
                    state + WRITE_LOCKED,
                    Acquire,
                    Relaxed,
                ) {
                    Ok(_) => return, // Locked!
                    Err(s) => {
                        state = s;
                        continue;
                    }
                }
            }

            if !self.mark_waiting(&mut state) {
                continue;
            }

            atomic_wait::wait(&self.state, state);

            state = self.spin(is_unlocked);
        }
    }

    #[inline]
    pub fn read_unlock(&self) {
        let state = self.state.fetch_sub(READ_LOCKED, Release) - READ_LOCKED;
        debug_assert!(state & MASK < MAX_READERS);
        if is_unlocked(state) && state & WAITING != 0 {
            self.wake();
        }
    }

    #[inline]
    pub fn write_unlock(&self) {
        let state = self.state.fetch_sub(WRITE_LOCKED, Release) - WRITE_LOCKED;
        debug_assert!(is_unlocked(state));
        if state & WAITING != 0 {
            self.wake();
        }
    }

    /// Sets the waiting bit before going to sleep. On `false` the state changed
    /// underneath us and `state` holds the fresh value.
    fn mark_waiting(&self, state: &mut u32) -> bool {
        if *state & WAITING != 0 {
            return true;
        }
        match self
            .state
            .compare_exchange(*state, *state | WAITING, Relaxed, Relaxed)
        {
            Ok(_) => {
                *state |= WAITING;
                true
            }
            Err(s) => {
                *state = s;
                false
            }
        }
    }

    fn spin(&self, ready: impl Fn(u32) -> bool) -> u32 {
        let mut spin = 100;
        loop {
            // We only use `load` while spinning, to be easier on the caches.
            let state = self.state.load(Relaxed);

            // Stop spinning once the lock is available, or when others are
            // already asleep (no point in spinning ahead of them).
            if ready(state) || state & WAITING != 0 || spin == 0 {
                return state;
            }

            std::hint::spin_loop();
            spin -= 1;
        }
    }

    #[cold]
    fn wake(&self) {
        // Every sleeper waits on a value with WAITING set, so clearing the bit
        // before waking cannot lose anyone: late sleepers see a changed value.
        self.state.fetch_and(!WAITING, Relaxed);
        atomic_wait::wake_all(&self.state);
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_rwlock_exclusive_write() {
        let lock = Arc::new(RwLock::new());
        let current = Arc::new(AtomicU32::new(0));
        const N: usize = 8;
        const M: usize = 1 << 16;

        let mut tasks = vec![];
        for _ in 0..N {
            let lock = lock.clone();
            let current = current.clone();
            tasks.push(std::thread::spawn(move || {
                for _ in 0..M {
                    lock.write();
                    assert_eq!(current.fetch_add(1, Acquire), 0);
                    current.fetch_sub(1, Acquire);
                    lock.write_unlock();
                }
            }));
        }
        for task in tasks {
            task.join().unwrap();
        }
    }

    #[test]
    fn test_rwlock_try() {
        let lock = RwLock::new();
        assert!(lock.try_read());
        assert!(lock.try_read());
        assert!(!lock.try_write());
        lock.read_unlock();
        assert!(!lock.try_write());
        lock.read_unlock();
        assert!(lock.try_write());
        assert!(!lock.try_read());
        assert!(!lock.try_write());
        lock.write_unlock();
        assert!(lock.try_read());
        lock.read_unlock();
    }

    #[test]
    fn test_rwlock_reentrant_read() {
        let lock = RwLock::new();
        lock.read();
        lock.read();
        lock.read_unlock();
        lock.read_unlock();
        lock.write();
        lock.write_unlock();
    }

    #[test]
    fn test_rwlock_readers_exclude_writers() {
        let lock = Arc::new(RwLock::new());
        let readers = Arc::new(AtomicUsize::new(0));
        let writers = Arc::new(AtomicUsize::new(0));
        const THREAD_COUNT: usize = 4;
        const ITERATIONS: usize = 10000;

        let mut handles = vec![];

        for i in 0..THREAD_COUNT * 2 {
            let lock = Arc::clone(&lock);
            let readers = Arc::clone(&readers);
            let writers = Arc::clone(&writers);

            handles.push(std::thread::spawn(move || {
                for _ in 0..ITERATIONS {
                    if i % 2 == 0 {
                        lock.read();
                        readers.fetch_add(1, Acquire);
                        assert_eq!(writers.load(Acquire), 0);
                        std::thread::yield_now();
                        readers.fetch_sub(1, Release);
                        lock.read_unlock();
                    } else {
                        lock.write();
                        assert_eq!(writers.fetch_add(1, Acquire), 0);
                        assert_eq!(readers.load(Acquire), 0);
                        std::thread::yield_now();
                        writers.fetch_sub(1, Release);
                        lock.write_unlock();
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(lock.try_write());
        lock.write_unlock();
    }

    #[test]
    fn test_rwlock_writer_waits_for_reader() {
        let lock = Arc::new(RwLock::new());
        let written = Arc::new(AtomicU32::new(0));
        lock.read();

        let writer = {
            let lock = lock.clone();
            let written = written.clone();
            std::thread::spawn(move || {
                lock.write();
                written.store(1, Release);
                lock.write_unlock();
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(written.load(Acquire), 0);
        // A waiting writer does not keep new readers out.
        assert!(lock.try_read());
        lock.read_unlock();

        lock.read_unlock();
        writer.join().unwrap();
        assert_eq!(written.load(Acquire), 1);
    }
}
