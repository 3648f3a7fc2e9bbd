//! Table access for the in-memory store.

use crate::error::MemoryError;
use crate::storage::{Row, Shard};
use crate::transaction::{MemoryTransaction, PendingWrite, WriteKind};
use repotx_core::{
    matches_prefix, CoreError, CoreResult, Entity, EntityIdSchema, FirstLevelCache, IdCells, Range,
    RepositoryTransaction, Table,
};
use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Table of entity type `E` inside one [`MemoryTransaction`].
pub struct MemoryTable<'t, E: Entity> {
    transaction: &'t MemoryTransaction,
    cache: Rc<FirstLevelCache<E>>,
}

impl<'t, E: Entity> MemoryTable<'t, E> {
    pub(crate) fn new(transaction: &'t MemoryTransaction) -> Self {
        let cache = transaction.transaction_local().first_level_cache::<E>();
        Self { transaction, cache }
    }

    fn type_id() -> TypeId {
        TypeId::of::<E>()
    }

    fn schema() -> CoreResult<Arc<EntityIdSchema>> {
        EntityIdSchema::of::<E::Id>()
    }

    fn decode(row: &Row) -> CoreResult<E> {
        row.downcast_ref::<E>().cloned().ok_or_else(|| {
            MemoryError::TypeMismatch {
                table: E::table_name(),
            }
            .into()
        })
    }

    /// Visible rows accepted by `keep`, in canonical id order.
    fn collect_rows<F>(&self, shard: &Shard, tx_id: u64, version: u64, keep: F) -> CoreResult<Vec<E>>
    where
        F: Fn(&IdCells) -> CoreResult<bool>,
    {
        let mut rows = Vec::new();
        for (cells, row) in shard.rows(tx_id, version) {
            if keep(cells)? {
                rows.push(Self::decode(row)?);
            }
        }
        self.transaction.check_scan_size(E::table_name(), rows.len())?;
        Ok(rows)
    }

    fn write(&self, action: String, cells: IdCells, kind: WriteKind) -> CoreResult<()> {
        let write = PendingWrite {
            type_id: Self::type_id(),
            table: E::table_name(),
            schema: Self::schema()?,
            cells,
            kind,
        };
        self.transaction.write(action, write)
    }
}

impl<E: Entity> Table<E> for MemoryTable<'_, E> {
    fn first_level_cache(&self) -> &FirstLevelCache<E> {
        &self.cache
    }

    fn find(&self, id: &E::Id) -> CoreResult<Option<Arc<E>>> {
        let cells = Self::schema()?.flatten(id)?;
        if cells.iter().any(Option::is_none) {
            return Err(CoreError::invalid_argument(format!(
                "Cannot use partial id in find method: {id:?}"
            )));
        }

        self.cache.get_or_load(id, || {
            self.transaction
                .watcher()
                .mark_row_read(Self::type_id(), cells.clone());
            let found = self.transaction.read(
                &format!("find({id:?})"),
                Self::type_id(),
                |shard, tx_id, version| {
                    shard
                        .and_then(|shard| shard.get(tx_id, version, &cells))
                        .map(Self::decode)
                        .transpose()
                },
            )?;
            Ok(found.map(|entity| Arc::new(entity.post_load())))
        })
    }

    fn find_uncached(&self, ids: &HashSet<E::Id>) -> CoreResult<Vec<E>> {
        let schema = Self::schema()?;
        let mut keys = Vec::with_capacity(ids.len());
        {
            let mut watcher = self.transaction.watcher();
            for id in ids {
                let cells = schema.flatten(id)?;
                if cells.iter().any(Option::is_none) {
                    watcher.mark_prefix_read(Self::type_id(), cells.clone());
                } else {
                    watcher.mark_row_read(Self::type_id(), cells.clone());
                }
                keys.push(cells);
            }
        }

        self.transaction.read(
            &format!("find_uncached({} ids)", keys.len()),
            Self::type_id(),
            |shard, tx_id, version| {
                let Some(shard) = shard else {
                    return Ok(Vec::new());
                };
                let mut found = Vec::new();
                for key in &keys {
                    if key.iter().all(Option::is_some) {
                        if let Some(row) = shard.get(tx_id, version, key) {
                            found.push(Self::decode(row)?);
                        }
                    } else {
                        let matching =
                            self.collect_rows(shard, tx_id, version, |cells| Ok(matches_prefix(key, cells)))?;
                        found.extend(matching);
                    }
                }
                Ok(found)
            },
        )
    }

    fn find_range(&self, range: &Range<E::Id>) -> CoreResult<Vec<Arc<E>>> {
        self.transaction
            .watcher()
            .mark_range_read(Self::type_id(), range.clone());
        let rows = self.transaction.read(
            &format!("find({range})"),
            Self::type_id(),
            |shard, tx_id, version| match shard {
                Some(shard) => self.collect_rows(shard, tx_id, version, |cells| range.contains_cells(cells)),
                None => Ok(Vec::new()),
            },
        )?;
        Ok(rows.into_iter().filter_map(|entity| self.post_load(entity)).collect())
    }

    fn find_all(&self) -> CoreResult<Vec<Arc<E>>> {
        self.transaction.watcher().mark_table_read(Self::type_id());
        let rows = self.transaction.read(
            &format!("findAll({})", E::table_name()),
            Self::type_id(),
            |shard, tx_id, version| match shard {
                Some(shard) => self.collect_rows(shard, tx_id, version, |_| Ok(true)),
                None => Ok(Vec::new()),
            },
        )?;
        Ok(rows.into_iter().filter_map(|entity| self.post_load(entity)).collect())
    }

    fn insert(&self, entity: E) -> CoreResult<Arc<E>> {
        let entity = Arc::new(entity.pre_save());
        let cells = Self::schema()?.flatten(entity.id())?;
        self.transaction
            .watcher()
            .mark_row_read(Self::type_id(), cells.clone());
        let row: Row = Arc::clone(&entity) as Row;
        let kind = WriteKind::Insert {
            id: format!("{:?}", entity.id()),
            row,
        };
        self.write(format!("insert({entity:?})"), cells, kind)?;
        self.cache.put(Arc::clone(&entity));
        Ok(entity)
    }

    fn save(&self, entity: E) -> CoreResult<Arc<E>> {
        let entity = Arc::new(entity.pre_save());
        let cells = Self::schema()?.flatten(entity.id())?;
        let row: Row = Arc::clone(&entity) as Row;
        self.write(format!("save({entity:?})"), cells, WriteKind::Save(row))?;
        self.cache.put(Arc::clone(&entity));
        Ok(entity)
    }

    fn delete(&self, id: &E::Id) -> CoreResult<()> {
        let cells = Self::schema()?.flatten(id)?;
        self.write(format!("delete({id:?})"), cells, WriteKind::Delete)?;
        self.cache.put_tombstone(id.clone());
        Ok(())
    }
}

impl<E: Entity> fmt::Debug for MemoryTable<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTable")
            .field("table", &E::table_name())
            .field("transaction", &self.transaction.id())
            .finish_non_exhaustive()
    }
}
