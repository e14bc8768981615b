use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Entries below this count are never swept
const MIN_SWEEP_THRESHOLD: usize = 64;

struct MemoEntry<T> {
    page: Weak<T>,
    reward: f64,
}

struct MemoState<T> {
    entries: HashMap<usize, MemoEntry<T>>,
    sweep_at: usize,
}

/// Per-page reward cache that never keeps a page alive.
///
/// Entries are keyed by the address of the page's `Arc` and hold only a
/// `Weak` handle. A `Weak` keeps the allocation reserved, so a live page can
/// never share an address with a stale entry. Entries of dropped pages are
/// swept whenever the map doubles in size.
pub struct RewardMemo<T> {
    state: Mutex<MemoState<T>>,
}

impl<T> Default for RewardMemo<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoState {
                entries: HashMap::new(),
                sweep_at: MIN_SWEEP_THRESHOLD,
            }),
        }
    }
}

impl<T> RewardMemo<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized reward for `page`, computing it on first use
    pub fn get_or_compute<F>(&self, page: &Arc<T>, compute: F) -> f64
    where
        F: FnOnce(&T) -> f64,
    {
        match self.get_or_try_compute::<std::convert::Infallible, _>(page, |page| Ok(compute(page))) {
            Ok(reward) => reward,
            Err(never) => match never {},
        }
    }

    /// Fallible variant; a failed computation is not memoized.
    ///
    /// The memo stays locked while `compute` runs, so a page is computed once
    /// even when queried from several threads. `compute` must not reenter the memo.
    pub fn get_or_try_compute<E, F>(&self, page: &Arc<T>, compute: F) -> Result<f64, E>
    where
        F: FnOnce(&T) -> Result<f64, E>,
    {
        let key = Arc::as_ptr(page) as *const () as usize;
        let mut state = self.lock();

        if let Some(entry) = state.entries.get(&key) {
            if entry.page.strong_count() > 0 {
                return Ok(entry.reward);
            }
        }

        let reward = compute(page)?;
        state.entries.insert(
            key,
            MemoEntry {
                page: Arc::downgrade(page),
                reward,
            },
        );

        if state.entries.len() >= state.sweep_at {
            Self::sweep(&mut state);
        }

        Ok(reward)
    }

    /// Memoized reward of `page`, if any
    pub fn get(&self, page: &Arc<T>) -> Option<f64> {
        let key = Arc::as_ptr(page) as *const () as usize;
        let state = self.lock();
        state
            .entries
            .get(&key)
            .filter(|entry| entry.page.strong_count() > 0)
            .map(|entry| entry.reward)
    }

    /// Drop entries whose page is gone, returning how many were removed
    pub fn purge(&self) -> usize {
        let mut state = self.lock();
        Self::sweep(&mut state)
    }

    /// Number of entries, including ones not yet swept
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(state: &mut MemoState<T>) -> usize {
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.page.strong_count() > 0);
        state.sweep_at = (state.entries.len() * 2).max(MIN_SWEEP_THRESHOLD);
        before - state.entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoState<T>> {
        // Entries are plain numbers, a panicking compute leaves nothing half-written
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
