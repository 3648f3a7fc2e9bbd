//! State owned by one transaction attempt.

use super::log::TransactionLog;
use super::options::TxOptions;
use crate::cache::FirstLevelCache;
use crate::entity::Entity;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Per-attempt singletons: first-level caches and the transaction log.
///
/// A fresh instance is created for every attempt, so a retried attempt never
/// sees cache entries of the failed one.
pub struct TransactionLocal {
    first_level_cache: bool,
    caches: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    log: TransactionLog,
}

impl TransactionLocal {
    /// Creates attempt state for the given options.
    pub fn new(options: &TxOptions) -> Self {
        Self {
            first_level_cache: options.first_level_cache(),
            caches: RefCell::new(HashMap::new()),
            log: TransactionLog::new(options.log_level()),
        }
    }

    /// Returns the cache for entity type `E`, creating it on first use.
    pub fn first_level_cache<E: Entity>(&self) -> Rc<FirstLevelCache<E>> {
        let key = TypeId::of::<E>();
        if let Some(cache) = self.caches.borrow().get(&key) {
            if let Ok(cache) = Rc::clone(cache).downcast::<FirstLevelCache<E>>() {
                return cache;
            }
        }

        let cache = Rc::new(if self.first_level_cache {
            FirstLevelCache::new()
        } else {
            FirstLevelCache::disabled()
        });
        self.caches
            .borrow_mut()
            .insert(key, Rc::clone(&cache) as Rc<dyn Any>);
        cache
    }

    /// The attempt's log.
    pub fn log(&self) -> &TransactionLog {
        &self.log
    }
}

impl std::fmt::Debug for TransactionLocal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLocal")
            .field("first_level_cache", &self.first_level_cache)
            .field("caches", &self.caches.borrow().len())
            .finish_non_exhaustive()
    }
}
