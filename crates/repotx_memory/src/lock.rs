//! Read locks taken by a transaction.

use repotx_core::{matches_prefix, EntityId, IdCells, IdValue, Range};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;

type RangePredicate = Box<dyn Fn(&[Option<IdValue>]) -> bool>;

/// Rows and ranges a transaction has read, per table.
///
/// At commit, any of them having a version younger than the transaction's
/// snapshot fails the commit.
#[derive(Default)]
pub(crate) struct LockWatcher {
    rows: HashMap<TypeId, HashSet<IdCells>>,
    ranges: HashMap<TypeId, Vec<RangePredicate>>,
}

impl LockWatcher {
    pub(crate) fn mark_row_read(&mut self, table: TypeId, cells: IdCells) {
        self.rows.entry(table).or_default().insert(cells);
    }

    pub(crate) fn mark_range_read<ID: EntityId>(&mut self, table: TypeId, range: Range<ID>) {
        // Stored keys are complete, so `contains_cells` only fails on a
        // width mismatch; lock conservatively in that case.
        self.push_range(
            table,
            Box::new(move |cells| range.contains_cells(cells).unwrap_or(true)),
        );
    }

    pub(crate) fn mark_prefix_read(&mut self, table: TypeId, prefix: IdCells) {
        self.push_range(table, Box::new(move |cells| matches_prefix(&prefix, cells)));
    }

    pub(crate) fn mark_table_read(&mut self, table: TypeId) {
        self.push_range(table, Box::new(|_| true));
    }

    fn push_range(&mut self, table: TypeId, predicate: RangePredicate) {
        self.ranges.entry(table).or_default().push(predicate);
    }

    pub(crate) fn read_rows(&self, table: TypeId) -> impl Iterator<Item = &IdCells> {
        self.rows.get(&table).into_iter().flatten()
    }

    pub(crate) fn has_ranges(&self, table: TypeId) -> bool {
        self.ranges.get(&table).is_some_and(|ranges| !ranges.is_empty())
    }

    pub(crate) fn range_covers(&self, table: TypeId, cells: &[Option<IdValue>]) -> bool {
        self.ranges
            .get(&table)
            .is_some_and(|ranges| ranges.iter().any(|covers| covers(cells)))
    }
}

impl fmt::Debug for LockWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockWatcher")
            .field("rows", &self.rows.values().map(HashSet::len).sum::<usize>())
            .field("ranges", &self.ranges.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
