//! Per-batch-size session cache with LRU eviction
//!
//! Every distinct batch size needs its own session, because tensors are
//! bound at creation with a fixed leading dimension. The cache keeps up to
//! `max_entries` of them and destroys the least recently used one when a new
//! size arrives.

use crate::error::{EmbeddingError, Result};
use std::collections::{HashMap, VecDeque};

/// A cached value holding native resources that must be released explicitly
pub trait CachedResource {
    /// Release native resources. Must be safe to call more than once.
    fn destroy(&mut self) -> Result<()>;
}

/// Bounded map from batch size to session, evicting least recently used
#[derive(Debug)]
pub struct BatchSessionCache<S: CachedResource> {
    max_entries: usize,
    entries: HashMap<usize, S>,
    /// Front is least recently used, back is most recently used.
    order: VecDeque<usize>,
}

impl<S: CachedResource> BatchSessionCache<S> {
    pub fn new(max_entries: usize) -> Result<Self> {
        if max_entries == 0 {
            return Err(EmbeddingError::Config(
                "max cached batch sessions must be > 0".to_string(),
            ));
        }
        Ok(Self {
            max_entries,
            entries: HashMap::with_capacity(max_entries),
            order: VecDeque::with_capacity(max_entries),
        })
    }

    /// Get the session for `batch_size`, creating it with `create` if absent.
    ///
    /// When the cache is full the least recently used entry is removed and
    /// destroyed before `create` runs. A failed destroy is returned as an
    /// error, but the evicted entry is gone either way.
    pub fn acquire<F>(&mut self, batch_size: usize, create: F) -> Result<&mut S>
    where
        F: FnOnce(usize) -> Result<S>,
    {
        if batch_size == 0 {
            return Err(EmbeddingError::InvalidInput(
                "batch size must be > 0".to_string(),
            ));
        }

        if !self.entries.contains_key(&batch_size) {
            if self.entries.len() >= self.max_entries {
                self.evict_oldest()?;
            }
            let session = create(batch_size)?;
            log::debug!("Cached session for batch size {}", batch_size);
            self.entries.insert(batch_size, session);
        }
        self.touch(batch_size);

        self.entries.get_mut(&batch_size).ok_or_else(|| {
            EmbeddingError::InvalidInput(format!("batch-{} session missing from cache", batch_size))
        })
    }

    /// Destroy every cached session and empty the cache.
    ///
    /// All entries are removed even when some fail to destroy; the failures
    /// are joined into one error.
    pub fn close(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        for (batch_size, mut session) in self.entries.drain() {
            if let Err(e) = session.destroy() {
                errors.push(e.context(format!("failed to destroy batch-{} session", batch_size)));
            }
        }
        self.order.clear();
        match EmbeddingError::join(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, batch_size: usize) -> bool {
        self.entries.contains_key(&batch_size)
    }

    /// Cached batch sizes from least to most recently used.
    pub fn cached_batch_sizes(&self) -> Vec<usize> {
        self.order.iter().copied().collect()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn touch(&mut self, batch_size: usize) {
        self.order.retain(|&b| b != batch_size);
        self.order.push_back(batch_size);
    }

    fn evict_oldest(&mut self) -> Result<()> {
        let Some(oldest) = self.order.pop_front() else {
            return Ok(());
        };
        let Some(mut session) = self.entries.remove(&oldest) else {
            return Ok(());
        };
        log::debug!("Evicting session for batch size {}", oldest);
        session
            .destroy()
            .map_err(|e| e.context(format!("failed to evict batch-{} session", oldest)))
    }
}

impl<S: CachedResource> Drop for BatchSessionCache<S> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            if let Err(e) = self.close() {
                log::warn!("Failed to release cached sessions on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct FakeSession {
        batch_size: usize,
        destroyed: Rc<RefCell<Vec<usize>>>,
        fail_destroy: bool,
    }

    impl CachedResource for FakeSession {
        fn destroy(&mut self) -> Result<()> {
            self.destroyed.borrow_mut().push(self.batch_size);
            if self.fail_destroy {
                return Err(EmbeddingError::InvalidInput("boom".to_string()));
            }
            Ok(())
        }
    }

    fn factory(
        destroyed: &Rc<RefCell<Vec<usize>>>,
        fail_destroy: bool,
    ) -> impl Fn(usize) -> Result<FakeSession> + '_ {
        move |batch_size| {
            Ok(FakeSession {
                batch_size,
                destroyed: Rc::clone(destroyed),
                fail_destroy,
            })
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(BatchSessionCache::<FakeSession>::new(0).is_err());
    }

    #[test]
    fn test_reuses_cached_session() {
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let mut cache = BatchSessionCache::new(2).unwrap();
        let create = factory(&destroyed, false);

        cache.acquire(1, &create).unwrap();
        let mut calls = 0;
        let session = cache
            .acquire(1, |b| {
                calls += 1;
                create(b)
            })
            .unwrap();
        assert_eq!(session.batch_size, 1);
        assert_eq!(calls, 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let mut cache = BatchSessionCache::new(2).unwrap();
        let create = factory(&destroyed, false);

        cache.acquire(1, &create).unwrap();
        cache.acquire(2, &create).unwrap();
        cache.acquire(1, &create).unwrap();
        cache.acquire(3, &create).unwrap();

        assert!(cache.contains(1));
        assert!(cache.contains(3));
        assert!(!cache.contains(2));
        assert_eq!(cache.cached_batch_sizes(), vec![1, 3]);
        assert_eq!(*destroyed.borrow(), vec![2]);
    }

    #[test]
    fn test_zero_batch_rejected() {
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let mut cache = BatchSessionCache::new(1).unwrap();
        assert!(cache.acquire(0, factory(&destroyed, false)).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_create_leaves_cache_unchanged() {
        let mut cache: BatchSessionCache<FakeSession> = BatchSessionCache::new(2).unwrap();
        let result = cache.acquire(4, |_| Err(EmbeddingError::InvalidInput("nope".into())));
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert!(cache.cached_batch_sizes().is_empty());
    }

    #[test]
    fn test_cache_stays_usable_after_failed_create() {
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let mut cache = BatchSessionCache::new(2).unwrap();
        let create = factory(&destroyed, false);
        cache.acquire(1, &create).unwrap();

        let err = cache
            .acquire(2, |_| Err(EmbeddingError::InvalidInput("model rejected".into())))
            .unwrap_err();
        assert!(err.to_string().contains("model rejected"));
        assert_eq!(cache.cached_batch_sizes(), vec![1]);

        assert_eq!(cache.acquire(2, &create).unwrap().batch_size, 2);
        let mut calls = 0;
        cache
            .acquire(1, |b| {
                calls += 1;
                create(b)
            })
            .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(cache.cached_batch_sizes(), vec![2, 1]);
        assert!(destroyed.borrow().is_empty());
    }

    #[test]
    fn test_eviction_failure_drops_entry() {
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let mut cache = BatchSessionCache::new(1).unwrap();
        cache.acquire(1, factory(&destroyed, true)).unwrap();

        let err = cache.acquire(2, factory(&destroyed, false)).unwrap_err();
        assert!(err.to_string().contains("failed to evict batch-1 session"));
        assert!(cache.is_empty());

        cache.acquire(2, factory(&destroyed, false)).unwrap();
        assert_eq!(cache.cached_batch_sizes(), vec![2]);
    }

    #[test]
    fn test_close_joins_failures_and_is_repeatable() {
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let mut cache = BatchSessionCache::new(4).unwrap();
        cache.acquire(1, factory(&destroyed, true)).unwrap();
        cache.acquire(2, factory(&destroyed, true)).unwrap();
        cache.acquire(3, factory(&destroyed, false)).unwrap();

        match cache.close() {
            Err(EmbeddingError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected joined errors, got {other:?}"),
        }
        assert!(cache.is_empty());
        assert_eq!(destroyed.borrow().len(), 3);

        cache.close().unwrap();
        assert_eq!(cache.max_entries(), 4);
    }
}
