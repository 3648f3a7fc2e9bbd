//! Table access within a transaction attempt.

use crate::cache::{find_by_ids, CacheLookup, FirstLevelCache};
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::range::Range;
use std::collections::HashSet;
use std::sync::Arc;

/// Store-backed table of one entity type, bound to one attempt.
///
/// Implementations keep the first-level cache current: point reads go
/// through [`FirstLevelCache::get_or_load`], rows read from the store pass
/// through [`post_load`](Self::post_load), writes call
/// [`FirstLevelCache::put`] and deletes call
/// [`FirstLevelCache::put_tombstone`].
pub trait Table<E: Entity> {
    /// The attempt's cache for this entity type.
    fn first_level_cache(&self) -> &FirstLevelCache<E>;

    /// Finds one entity by its complete identifier.
    fn find(&self, id: &E::Id) -> CoreResult<Option<Arc<E>>>;

    /// Finds entities by a set of complete identifiers or of prefixes.
    fn find_many(&self, ids: &HashSet<E::Id>) -> CoreResult<Vec<Arc<E>>> {
        find_by_ids(self, ids)
    }

    /// Reads entities matching `ids` straight from the store, bypassing the
    /// cache. Partial ids match every row sharing their non-null fields.
    fn find_uncached(&self, ids: &HashSet<E::Id>) -> CoreResult<Vec<E>>;

    /// Finds all entities in a range, in canonical id order.
    fn find_range(&self, range: &Range<E::Id>) -> CoreResult<Vec<Arc<E>>>;

    /// Finds all entities, in canonical id order.
    fn find_all(&self) -> CoreResult<Vec<Arc<E>>>;

    /// Inserts a new entity; fails if the id is taken.
    fn insert(&self, entity: E) -> CoreResult<Arc<E>>;

    /// Inserts or replaces an entity.
    fn save(&self, entity: E) -> CoreResult<Arc<E>>;

    /// Deletes an entity if it exists.
    fn delete(&self, id: &E::Id) -> CoreResult<()>;

    /// Merges a row read from the store into the attempt's view.
    ///
    /// A cached entity wins over the row and a deleted or absent id drops
    /// it; only unknown ids get the load hook applied and cached.
    fn post_load(&self, entity: E) -> Option<Arc<E>> {
        let cache = self.first_level_cache();
        match cache.lookup(entity.id()) {
            CacheLookup::Present(cached) => Some(cached),
            CacheLookup::Tombstoned | CacheLookup::Absent => None,
            CacheLookup::Unknown => {
                let entity = Arc::new(entity.post_load());
                cache.put(Arc::clone(&entity));
                Some(entity)
            }
        }
    }
}
