//! Transaction-scoped first-level cache.
//!
//! Each attempt owns one [`FirstLevelCache`] per entity type. Table reads
//! and writes populate it; [`find_by_ids`] merges it with store reads so that
//! an attempt always sees its own writes and deletes.

use crate::entity::{sort_by_id, Entity};
use crate::error::{CoreError, CoreResult};
use crate::schema::{EntityId, EntityIdSchema};
use crate::table::Table;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// State of one identifier in the cache.
#[derive(Debug, Clone)]
pub enum CacheLookup<E> {
    /// Not resolved yet; the store must be queried.
    Unknown,
    /// Read or written in this attempt.
    Present(Arc<E>),
    /// Deleted in this attempt.
    Tombstoned,
    /// Confirmed missing from the store.
    Absent,
}

impl<E> CacheLookup<E> {
    /// Returns true unless the identifier is [`CacheLookup::Unknown`].
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

#[derive(Debug)]
enum Slot<E> {
    Present(Arc<E>),
    Tombstoned,
    Absent,
}

/// Per-attempt cache of entities of one type.
#[derive(Debug)]
pub struct FirstLevelCache<E: Entity> {
    enabled: bool,
    slots: RefCell<HashMap<E::Id, Slot<E>>>,
}

impl<E: Entity> Default for FirstLevelCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> FirstLevelCache<E> {
    /// Creates an empty, enabled cache.
    pub fn new() -> Self {
        Self {
            enabled: true,
            slots: RefCell::new(HashMap::new()),
        }
    }

    /// Creates a cache that remembers nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            slots: RefCell::new(HashMap::new()),
        }
    }

    /// Whether the cache stores entries.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Looks an identifier up.
    pub fn lookup(&self, id: &E::Id) -> CacheLookup<E> {
        match self.slots.borrow().get(id) {
            None => CacheLookup::Unknown,
            Some(Slot::Present(entity)) => CacheLookup::Present(Arc::clone(entity)),
            Some(Slot::Tombstoned) => CacheLookup::Tombstoned,
            Some(Slot::Absent) => CacheLookup::Absent,
        }
    }

    /// Returns true if the identifier is known.
    pub fn contains_key(&self, id: &E::Id) -> bool {
        self.slots.borrow().contains_key(id)
    }

    /// Returns the cached entity of a known identifier; `None` means deleted
    /// or confirmed absent.
    pub fn peek(&self, id: &E::Id) -> CoreResult<Option<Arc<E>>> {
        match self.lookup(id) {
            CacheLookup::Unknown => Err(CoreError::invalid_operation(format!(
                "no first-level cache entry for {id:?}"
            ))),
            CacheLookup::Present(entity) => Ok(Some(entity)),
            CacheLookup::Tombstoned | CacheLookup::Absent => Ok(None),
        }
    }

    /// Returns the cached entity, or loads and caches it.
    ///
    /// A `None` from the loader is cached as confirmed absent.
    pub fn get_or_load<F>(&self, id: &E::Id, load: F) -> CoreResult<Option<Arc<E>>>
    where
        F: FnOnce() -> CoreResult<Option<Arc<E>>>,
    {
        if self.contains_key(id) {
            return self.peek(id);
        }
        let loaded = load()?;
        match &loaded {
            Some(entity) => self.put(Arc::clone(entity)),
            None => self.put_empty(id.clone()),
        }
        Ok(loaded)
    }

    /// Caches an entity read or written in this attempt.
    pub fn put(&self, entity: Arc<E>) {
        if self.enabled {
            self.slots
                .borrow_mut()
                .insert(entity.id().clone(), Slot::Present(entity));
        }
    }

    /// Marks an identifier as confirmed absent from the store.
    pub fn put_empty(&self, id: E::Id) {
        if self.enabled {
            self.slots.borrow_mut().insert(id, Slot::Absent);
        }
    }

    /// Marks an identifier as deleted in this attempt.
    pub fn put_tombstone(&self, id: E::Id) {
        if self.enabled {
            self.slots.borrow_mut().insert(id, Slot::Tombstoned);
        }
    }

    /// Entities currently present in the cache, in canonical id order.
    pub fn snapshot(&self) -> CoreResult<Vec<Arc<E>>> {
        let present = self
            .slots
            .borrow()
            .values()
            .filter_map(|slot| match slot {
                Slot::Present(entity) => Some(Arc::clone(entity)),
                _ => None,
            })
            .collect();
        sort_by_id(present)
    }

    /// Number of known identifiers.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Returns true if nothing is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves a set of identifiers against the first-level cache and the store.
///
/// The identifiers must all be complete, or all be prefixes with nulls in the
/// same fields. Cache-resident entries win over store rows; deleted entries
/// are dropped. Complete identifiers missing from both are cached as absent.
/// The result is sorted in canonical identifier order.
pub fn find_by_ids<E, T>(table: &T, ids: &HashSet<E::Id>) -> CoreResult<Vec<Arc<E>>>
where
    E: Entity,
    T: Table<E> + ?Sized,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let partial = null_pattern(ids)?;
    let cache = table.first_level_cache();

    let mut merged: HashMap<E::Id, Arc<E>> = HashMap::new();
    let mut unknown: HashSet<E::Id> = HashSet::new();
    for id in ids {
        match cache.lookup(id) {
            CacheLookup::Unknown => {
                unknown.insert(id.clone());
            }
            CacheLookup::Present(entity) => {
                merged.insert(id.clone(), entity);
            }
            CacheLookup::Tombstoned | CacheLookup::Absent => {}
        }
    }

    let found = if unknown.is_empty() {
        Vec::new()
    } else {
        table.find_uncached(&unknown)?
    };

    let mut found_ids = HashSet::with_capacity(found.len());
    for row in found {
        let id = row.id().clone();
        found_ids.insert(id.clone());
        if let Some(entity) = table.post_load(row) {
            merged.insert(id, entity);
        }
    }

    if !partial {
        for id in unknown {
            if !found_ids.contains(&id) {
                cache.put_empty(id);
            }
        }
    }

    sort_by_id(merged.into_values().collect())
}

/// Checks that all ids have nulls in the same fields; returns true if those
/// ids are partial.
fn null_pattern<ID: EntityId>(ids: &HashSet<ID>) -> CoreResult<bool> {
    let schema = EntityIdSchema::of::<ID>()?;
    let mut expected: Option<Vec<bool>> = None;
    for id in ids {
        let nulls: Vec<bool> = schema.flatten(id)?.iter().map(Option::is_none).collect();
        match &expected {
            None => expected = Some(nulls),
            Some(pattern) if *pattern == nulls => {}
            Some(_) => {
                return Err(CoreError::invalid_argument(format!(
                    "ids of {} must all have nulls in the same fields",
                    schema.simple_name()
                )));
            }
        }
    }
    Ok(expected.is_some_and(|pattern| pattern.contains(&true)))
}
