//! Multi-version row storage.
//!
//! Every row keeps its committed versions plus one uncommitted value per
//! open transaction. A transaction reads its own uncommitted value first,
//! then the newest version not younger than its snapshot.

use crate::error::{MemoryError, MemoryResult};
use crate::lock::LockWatcher;
use repotx_core::{EntityIdSchema, IdCells};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

/// Type-erased stored entity. `None` marks a deleted row.
pub(crate) type Row = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct EntityLine {
    versions: Vec<(u64, Option<Row>)>,
    uncommitted: HashMap<u64, Option<Row>>,
}

impl EntityLine {
    fn get(&self, tx_id: u64, version: u64) -> Option<&Row> {
        if let Some(own) = self.uncommitted.get(&tx_id) {
            return own.as_ref();
        }
        self.versions
            .iter()
            .rev()
            .find(|(committed, _)| *committed <= version)
            .and_then(|(_, row)| row.as_ref())
    }

    fn put(&mut self, tx_id: u64, row: Option<Row>) {
        self.uncommitted.insert(tx_id, row);
    }

    fn commit(&mut self, tx_id: u64, version: u64) {
        if let Some(row) = self.uncommitted.remove(&tx_id) {
            self.versions.push((version, row));
        }
    }

    fn rollback(&mut self, tx_id: u64) {
        self.uncommitted.remove(&tx_id);
    }

    fn has_younger(&self, version: u64) -> bool {
        self.versions
            .last()
            .is_some_and(|(committed, _)| *committed > version)
    }

    fn snapshot(&self) -> Self {
        Self {
            versions: self.versions.clone(),
            uncommitted: HashMap::new(),
        }
    }
}

/// All rows of one entity type, in canonical id order.
pub(crate) struct Shard {
    table: &'static str,
    schema: Arc<EntityIdSchema>,
    lines: BTreeMap<IdCells, EntityLine>,
    uncommitted: HashMap<u64, HashSet<IdCells>>,
}

impl Shard {
    fn new(table: &'static str, schema: Arc<EntityIdSchema>) -> Self {
        Self {
            table,
            schema,
            lines: BTreeMap::new(),
            uncommitted: HashMap::new(),
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        self.table
    }

    pub(crate) fn get(&self, tx_id: u64, version: u64, cells: &IdCells) -> Option<&Row> {
        self.lines.get(cells)?.get(tx_id, version)
    }

    /// Rows visible to a transaction, in canonical id order.
    pub(crate) fn rows(&self, tx_id: u64, version: u64) -> impl Iterator<Item = (&IdCells, &Row)> {
        self.lines
            .iter()
            .filter_map(move |(cells, line)| line.get(tx_id, version).map(|row| (cells, row)))
    }

    pub(crate) fn put(&mut self, tx_id: u64, cells: IdCells, row: Row) {
        self.track(tx_id, &cells);
        self.lines.entry(cells).or_default().put(tx_id, Some(row));
    }

    pub(crate) fn delete(&mut self, tx_id: u64, cells: &IdCells) {
        if let Some(line) = self.lines.get_mut(cells) {
            line.put(tx_id, None);
            self.uncommitted.entry(tx_id).or_default().insert(cells.clone());
        }
    }

    fn track(&mut self, tx_id: u64, cells: &IdCells) {
        self.uncommitted.entry(tx_id).or_default().insert(cells.clone());
    }

    /// Fails if a row or range read at `version` has changed since.
    pub(crate) fn check_locks(
        &self,
        type_id: TypeId,
        version: u64,
        watcher: &LockWatcher,
    ) -> MemoryResult<()> {
        for cells in watcher.read_rows(type_id) {
            if self.lines.get(cells).is_some_and(|line| line.has_younger(version)) {
                return Err(MemoryError::RowLockFailed {
                    row: self.describe(cells),
                });
            }
        }

        if !watcher.has_ranges(type_id) {
            return Ok(());
        }
        let conflict = self
            .lines
            .iter()
            .any(|(cells, line)| line.has_younger(version) && watcher.range_covers(type_id, cells));
        if conflict {
            return Err(MemoryError::TableLockFailed { table: self.table });
        }
        Ok(())
    }

    fn commit(&mut self, tx_id: u64, version: u64) {
        let Some(cells) = self.uncommitted.remove(&tx_id) else {
            return;
        };
        for key in cells {
            if let Some(line) = self.lines.get_mut(&key) {
                line.commit(tx_id, version);
            }
        }
    }

    fn rollback(&mut self, tx_id: u64) {
        let Some(cells) = self.uncommitted.remove(&tx_id) else {
            return;
        };
        for key in cells {
            if let Some(line) = self.lines.get_mut(&key) {
                line.rollback(tx_id);
            }
        }
    }

    fn snapshot(&self) -> Self {
        Self {
            table: self.table,
            schema: Arc::clone(&self.schema),
            lines: self
                .lines
                .iter()
                .map(|(cells, line)| (cells.clone(), line.snapshot()))
                .collect(),
            uncommitted: HashMap::new(),
        }
    }

    /// Renders a key as `Table(field=value, ...)`.
    pub(crate) fn describe(&self, cells: &IdCells) -> String {
        let mut rendered = format!("{}(", self.table);
        for (index, (name, cell)) in self.schema.field_names().zip(cells).enumerate() {
            if index > 0 {
                rendered.push_str(", ");
            }
            match cell {
                Some(value) => {
                    let _ = write!(rendered, "{name}={value}");
                }
                None => {
                    let _ = write!(rendered, "{name}=null");
                }
            }
        }
        rendered.push(')');
        rendered
    }
}

/// Committed state of every table plus the writes of open transactions.
#[derive(Default)]
pub(crate) struct Storage {
    version: u64,
    shards: HashMap<TypeId, Shard>,
    uncommitted: HashMap<u64, HashSet<TypeId>>,
}

impl Storage {
    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn shard(&self, type_id: TypeId) -> Option<&Shard> {
        self.shards.get(&type_id)
    }

    /// Shard a transaction writes to, created on first use.
    pub(crate) fn write_shard(
        &mut self,
        tx_id: u64,
        type_id: TypeId,
        table: &'static str,
        schema: &Arc<EntityIdSchema>,
    ) -> &mut Shard {
        self.uncommitted.entry(tx_id).or_default().insert(type_id);
        self.shards
            .entry(type_id)
            .or_insert_with(|| Shard::new(table, Arc::clone(schema)))
    }

    /// Checks every lock of `watcher`, then publishes the transaction's
    /// writes as a new version. Transactions without writes commit trivially.
    pub(crate) fn commit(&mut self, tx_id: u64, version: u64, watcher: &LockWatcher) -> MemoryResult<()> {
        if !self.uncommitted.contains_key(&tx_id) {
            return Ok(());
        }
        for (type_id, shard) in &self.shards {
            shard.check_locks(*type_id, version, watcher)?;
        }

        self.version += 1;
        let committed = self.version;
        for type_id in self.uncommitted.remove(&tx_id).into_iter().flatten() {
            if let Some(shard) = self.shards.get_mut(&type_id) {
                shard.commit(tx_id, committed);
            }
        }
        Ok(())
    }

    pub(crate) fn rollback(&mut self, tx_id: u64) {
        for type_id in self.uncommitted.remove(&tx_id).into_iter().flatten() {
            if let Some(shard) = self.shards.get_mut(&type_id) {
                shard.rollback(tx_id);
            }
        }
    }

    /// Copy of the committed state.
    pub(crate) fn snapshot(&self) -> Self {
        Self {
            version: self.version,
            shards: self
                .shards
                .iter()
                .map(|(type_id, shard)| (*type_id, shard.snapshot()))
                .collect(),
            uncommitted: HashMap::new(),
        }
    }

    pub(crate) fn tables(&self) -> Vec<&'static str> {
        let mut tables: Vec<_> = self.shards.values().map(Shard::table).collect();
        tables.sort_unstable();
        tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repotx_core::{FieldKind, IdShape, IdValue};

    fn schema() -> Arc<EntityIdSchema> {
        Arc::new(
            EntityIdSchema::from_shape("tests::Key", IdShape::Converted(FieldKind::Integer)).unwrap(),
        )
    }

    fn key(value: i64) -> IdCells {
        vec![Some(IdValue::Integer(value))]
    }

    fn row(value: &'static str) -> Row {
        Arc::new(value)
    }

    fn read(storage: &Storage, tx_id: u64, version: u64, value: i64) -> Option<&'static str> {
        let shard = storage.shard(TypeId::of::<u8>())?;
        shard
            .get(tx_id, version, &key(value))
            .and_then(|row| row.downcast_ref::<&'static str>().copied())
    }

    fn write(storage: &mut Storage, tx_id: u64, value: i64, text: &'static str) {
        storage
            .write_shard(tx_id, TypeId::of::<u8>(), "Key", &schema())
            .put(tx_id, key(value), row(text));
    }

    #[test]
    fn uncommitted_writes_are_private() {
        let mut storage = Storage::default();
        write(&mut storage, 1, 7, "seven");

        assert_eq!(read(&storage, 1, 0, 7), Some("seven"));
        assert_eq!(read(&storage, 2, 0, 7), None);

        storage.commit(1, 0, &LockWatcher::default()).unwrap();
        assert_eq!(storage.version(), 1);
        assert_eq!(read(&storage, 2, 1, 7), Some("seven"));
        assert_eq!(read(&storage, 2, 0, 7), None);
    }

    #[test]
    fn rollback_discards_writes() {
        let mut storage = Storage::default();
        write(&mut storage, 1, 7, "seven");
        storage.rollback(1);

        assert_eq!(read(&storage, 1, 0, 7), None);
        storage.commit(1, 0, &LockWatcher::default()).unwrap();
        assert_eq!(storage.version(), 0);
    }

    #[test]
    fn younger_row_fails_row_lock() {
        let mut storage = Storage::default();
        write(&mut storage, 1, 7, "seven");
        storage.commit(1, 0, &LockWatcher::default()).unwrap();

        let mut watcher = LockWatcher::default();
        watcher.mark_row_read(TypeId::of::<u8>(), key(7));
        write(&mut storage, 3, 7, "late");
        storage.commit(3, 1, &LockWatcher::default()).unwrap();

        write(&mut storage, 2, 8, "eight");
        let error = storage.commit(2, 1, &watcher).unwrap_err();
        assert_eq!(error.to_string(), "Row lock failed Key(id=7)");
    }

    #[test]
    fn younger_row_in_range_fails_table_lock() {
        let mut storage = Storage::default();
        let mut watcher = LockWatcher::default();
        watcher.mark_table_read(TypeId::of::<u8>());

        write(&mut storage, 3, 9, "nine");
        storage.commit(3, 0, &LockWatcher::default()).unwrap();

        write(&mut storage, 2, 8, "eight");
        let error = storage.commit(2, 0, &watcher).unwrap_err();
        assert!(matches!(error, MemoryError::TableLockFailed { table: "Key" }));
    }

    #[test]
    fn delete_leaves_a_tombstone_version() {
        let mut storage = Storage::default();
        write(&mut storage, 1, 7, "seven");
        storage.commit(1, 0, &LockWatcher::default()).unwrap();

        storage
            .write_shard(2, TypeId::of::<u8>(), "Key", &schema())
            .delete(2, &key(7));
        storage.commit(2, 1, &LockWatcher::default()).unwrap();

        assert_eq!(read(&storage, 4, 2, 7), None);
        assert_eq!(read(&storage, 4, 1, 7), Some("seven"));
    }

    #[test]
    fn snapshots_drop_uncommitted_writes() {
        let mut storage = Storage::default();
        write(&mut storage, 1, 7, "seven");
        storage.commit(1, 0, &LockWatcher::default()).unwrap();
        write(&mut storage, 2, 8, "eight");

        let snapshot = storage.snapshot();
        assert_eq!(read(&snapshot, 2, 1, 7), Some("seven"));
        assert_eq!(read(&snapshot, 2, 1, 8), None);
        assert_eq!(snapshot.tables(), ["Key"]);
    }
}
