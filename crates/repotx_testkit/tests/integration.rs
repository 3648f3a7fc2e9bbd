//! End-to-end tests of the transaction manager over the in-memory store.

use proptest::prelude::*;
use repotx_core::{
    CancellationToken, ConditionalRetryMode, ErrorKind, FirstLevelCache, RetryOptions,
    RetryPolicy, SeparatePolicy, TxStats,
};
use repotx_testkit::prelude::*;
use std::cell::Cell;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::Level;

/// Table wrapper that counts store queries made through `find_uncached`.
struct CountingTable<'a, E: Entity> {
    inner: Box<dyn Table<E> + 'a>,
    queries: Cell<usize>,
}

impl<'a, E: Entity> CountingTable<'a, E> {
    fn new(inner: Box<dyn Table<E> + 'a>) -> Self {
        Self {
            inner,
            queries: Cell::new(0),
        }
    }
}

impl<E: Entity> Table<E> for CountingTable<'_, E> {
    fn first_level_cache(&self) -> &FirstLevelCache<E> {
        self.inner.first_level_cache()
    }

    fn find(&self, id: &E::Id) -> CoreResult<Option<Arc<E>>> {
        self.inner.find(id)
    }

    fn find_uncached(&self, ids: &HashSet<E::Id>) -> CoreResult<Vec<E>> {
        self.queries.set(self.queries.get() + 1);
        self.inner.find_uncached(ids)
    }

    fn find_range(&self, range: &Range<E::Id>) -> CoreResult<Vec<Arc<E>>> {
        self.inner.find_range(range)
    }

    fn find_all(&self) -> CoreResult<Vec<Arc<E>>> {
        self.inner.find_all()
    }

    fn insert(&self, entity: E) -> CoreResult<Arc<E>> {
        self.inner.insert(entity)
    }

    fn save(&self, entity: E) -> CoreResult<Arc<E>> {
        self.inner.save(entity)
    }

    fn delete(&self, id: &E::Id) -> CoreResult<()> {
        self.inner.delete(id)
    }
}

fn seeded_items() -> TestRepository {
    TestRepository::seeded([
        item(0, 0, "aaa", Status::Ok),
        item(1, 2, "b", Status::Error),
        item(2, 1, "c", Status::Ok),
    ])
}

fn scripted_manager() -> (Arc<ScriptedRepository>, StdTxManager<ScriptedRepository>) {
    let repository = Arc::new(ScriptedRepository::in_memory());
    let manager = StdTxManager::new(Arc::clone(&repository));
    (repository, manager)
}

fn busy() -> CoreError {
    CoreError::retryable("Busy", "session busy", RetryPolicy::retry_immediately())
}

fn unknown_outcome() -> CoreError {
    CoreError::conditionally_retryable("Timeout", "commit timed out", RetryPolicy::retry_immediately())
}

fn retries(stats: &TxStats) -> u64 {
    stats.snapshot().total_retries()
}

// First-level cache merge

#[test]
fn find_many_of_nothing_skips_the_store() {
    let env = seeded_items();
    env.tx(|tx| {
        let table = CountingTable::new(tx.table::<Item>());
        assert!(table.find_many(&HashSet::new())?.is_empty());
        assert_eq!(table.queries.get(), 0);
        Ok(())
    })
    .unwrap();
}

#[test]
fn absent_ids_are_not_queried_twice() {
    let env = seeded_items();
    env.tx(|tx| {
        let table = CountingTable::new(tx.table::<Item>());
        let ids = HashSet::from([item_id(9, 9, "zz", Status::Ok)]);

        assert!(table.find_many(&ids)?.is_empty());
        assert!(table.find_many(&ids)?.is_empty());
        assert_eq!(table.queries.get(), 1);
        Ok(())
    })
    .unwrap();
}

#[test]
fn prefixes_always_reach_the_store() {
    let env = seeded_items();
    env.tx(|tx| {
        let table = CountingTable::new(tx.table::<Item>());
        let ids = HashSet::from([ItemId::partial(Some(7), None, None)]);

        table.find_many(&ids)?;
        table.find_many(&ids)?;
        assert_eq!(table.queries.get(), 2);
        Ok(())
    })
    .unwrap();
}

#[test]
fn cached_instance_is_returned() {
    let env = seeded_items();
    env.tx(|tx| {
        let table = CountingTable::new(tx.table::<Item>());
        let id = item_id(1, 2, "b", Status::Error);
        let saved = table.save(Item {
            id: id.clone(),
            payload: "edited".into(),
        })?;

        let found = table.find_many(&HashSet::from([id, item_id(2, 1, "c", Status::Ok)]))?;
        assert_eq!(found.len(), 2);
        assert!(Arc::ptr_eq(&found[0], &saved));
        assert_eq!(found[1].payload, "item-2-1-c-OK");
        Ok(())
    })
    .unwrap();
}

#[test]
fn deleted_ids_are_dropped_from_results() {
    let env = seeded_items();
    env.tx(|tx| {
        let table = tx.table::<Item>();
        let deleted = item_id(0, 0, "aaa", Status::Ok);
        table.delete(&deleted)?;

        let found = table.find_many(&HashSet::from([deleted, item_id(2, 1, "c", Status::Ok)]))?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, item_id(2, 1, "c", Status::Ok));
        Ok(())
    })
    .unwrap();
}

#[test]
fn scans_do_not_overwrite_own_writes() {
    let env = seeded_items();
    env.tx(|tx| {
        let table = tx.table::<Item>();
        let id = item_id(1, 2, "b", Status::Error);
        table.save(Item {
            id: id.clone(),
            payload: "fresh".into(),
        })?;

        table.find_all()?;
        let found = table.find(&id)?.map(|item| item.payload.clone());
        assert_eq!(found.as_deref(), Some("fresh"));
        Ok(())
    })
    .unwrap();
}

#[test]
fn scans_do_not_resurrect_deleted_ids() {
    let env = seeded_items();
    env.tx(|tx| {
        let table = tx.table::<Item>();
        let id = item_id(1, 2, "b", Status::Error);
        table.delete(&id)?;

        let in_range = table.find_range(&Range::prefix(&ItemId::partial(Some(1), None, None))?)?;
        assert!(in_range.iter().all(|item| item.id != id));
        assert!(table.find(&id)?.is_none());
        Ok(())
    })
    .unwrap();
}

#[test]
fn mixed_null_patterns_are_rejected() {
    let env = seeded_items();
    let error = env
        .tx(|tx| {
            tx.table::<Item>().find_many(&HashSet::from([
                item_id(0, 0, "aaa", Status::Ok),
                ItemId::partial(Some(1), None, None),
            ]))
        })
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Fatal);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn find_many_is_sorted(items in items_strategy(12)) {
        let env = TestRepository::seeded(items.clone());
        let ids: HashSet<ItemId> = items.iter().map(|item| item.id.clone()).collect();

        let found = env.tx(|tx| tx.table::<Item>().find_many(&ids)).unwrap();

        let schema = repotx_core::EntityIdSchema::of::<ItemId>().unwrap();
        let cells: Vec<_> = found.iter().map(|item| schema.flatten(&item.id).unwrap()).collect();
        prop_assert_eq!(found.len(), items.len());
        prop_assert!(cells.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

// Ranges

#[test]
fn single_point_range_contains_only_its_id() {
    let id = item_id(0, 0, "aaa", Status::Ok);
    let range = Range::create(&id, &id).unwrap();

    assert!(range.contains(&id).unwrap());
    assert!(!range.contains(&item_id(0, 0, "aaa", Status::Error)).unwrap());
    assert!(!range.contains(&item_id(0, 0, "aab", Status::Ok)).unwrap());
}

#[test]
fn inverted_range_is_rejected() {
    let min = item_id(1, 0, "a", Status::Ok);
    let max = item_id(0, 0, "a", Status::Ok);
    let error = Range::create(&min, &max).unwrap_err();
    assert!(matches!(error, CoreError::InvalidRange { .. }));
}

#[test]
fn null_before_value_is_rejected() {
    let gap = ItemId::partial(Some(1), None, Some("x"));
    let error = Range::prefix(&gap).unwrap_err();
    assert!(matches!(error, CoreError::InvalidRange { .. }));
}

#[test]
fn range_reads_from_the_store() {
    let env = seeded_items();
    let range = Range::create(
        &ItemId::partial(Some(0), None, None),
        &ItemId::partial(Some(1), None, None),
    )
    .unwrap();

    let found = env.tx(|tx| tx.table::<Item>().find_range(&range)).unwrap();
    let ids: Vec<_> = found.iter().map(|item| item.id.a).collect();
    assert_eq!(ids, [Some(0), Some(1)]);
}

// Retry loop

#[test]
fn retries_then_commits() {
    let (repository, manager) = scripted_manager();
    repository
        .fail_next_commit(CoreError::optimistic_lock("row changed"))
        .fail_next_commit(CoreError::optimistic_lock("row changed"));

    manager
        .tx(|tx| tx.table::<Account>().save(account("a", "ann", 10)).map(drop))
        .unwrap();

    assert_eq!(manager.stats().retries("OptimisticLock"), 2);
    assert_eq!(manager.stats().commits(), 1);
    assert_eq!(manager.stats().attempts(), 3);
    assert_eq!(repository.counters().commits(), 3);
    assert_eq!(repository.inner().version(), 1);
}

#[test]
fn exhausted_attempts_keep_the_last_error() {
    let env = TestRepository::new();
    let manager = env.with_max_retries(3);
    let attempts = Cell::new(0);

    let error = manager
        .tx(|_| -> CoreResult<()> {
            attempts.set(attempts.get() + 1);
            Err(busy())
        })
        .unwrap_err();

    assert_eq!(attempts.get(), 4);
    assert_eq!(env.stats().commits(), 0);
    assert_eq!(env.stats().fails(), 1);
    assert_eq!(retries(env.stats()), 4);
    match error {
        CoreError::Unavailable {
            source,
            already_retried,
            ..
        } => {
            assert!(already_retried);
            assert_eq!(source.kind(), ErrorKind::Retryable);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn business_errors_are_not_retried() {
    let env = TestRepository::seeded([account("a", "ann", 5)]);
    let error = env
        .tx(|tx| {
            let table = tx.table::<Account>();
            let source = table
                .find(&AccountId("a".into()))?
                .ok_or_else(|| CoreError::invalid_argument("missing account"))?;
            if source.balance < 10 {
                return Err(CoreError::business(InsufficientFunds {
                    balance: source.balance,
                    amount: 10,
                }));
            }
            Ok(())
        })
        .unwrap_err();

    let business = error
        .as_business()
        .and_then(|inner| inner.downcast_ref::<InsufficientFunds>());
    assert_eq!(
        business,
        Some(&InsufficientFunds {
            balance: 5,
            amount: 10
        })
    );
    assert_eq!(env.stats().attempts(), 1);
    assert_eq!(env.stats().rollbacks(), 1);
}

#[test]
fn rollback_lock_failure_replaces_business_error() {
    let (repository, manager) = scripted_manager();
    repository
        .fail_next_rollback(CoreError::optimistic_lock("read data changed"))
        .fail_next_rollback(CoreError::optimistic_lock("read data changed"));
    let manager = manager.with_max_retries(1);

    let error = manager
        .tx(|_| -> CoreResult<()> {
            Err(CoreError::business(InsufficientFunds {
                balance: 0,
                amount: 1,
            }))
        })
        .unwrap_err();

    match error {
        CoreError::Unavailable { source, .. } => {
            assert_eq!(source.kind(), ErrorKind::OptimisticLock);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(repository.counters().rollbacks(), 2);
}

#[test]
fn failed_start_is_retried() {
    let (repository, manager) = scripted_manager();
    repository.fail_next_start(busy());

    manager.tx(|_| Ok(())).unwrap();

    assert_eq!(repository.counters().started(), 2);
    assert_eq!(manager.stats().retries("Busy"), 1);
}

#[test]
fn conditional_failure_after_commit_fails_immediately() {
    let (repository, manager) = scripted_manager();
    repository.fail_next_commit(unknown_outcome());

    let error = manager.tx(|_| Ok(())).unwrap_err();

    match error {
        CoreError::Unavailable {
            already_retried, ..
        } => assert!(!already_retried),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(repository.counters().started(), 1);
}

#[test]
fn failed_start_after_failed_commit_is_retried() {
    let (repository, manager) = scripted_manager();
    repository.fail_next_commit(CoreError::optimistic_lock("row changed"));
    let calls = Cell::new(0);

    manager
        .tx(|_| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                repository.fail_next_start(unknown_outcome());
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(calls.get(), 2);
    assert_eq!(repository.counters().started(), 3);
    assert_eq!(manager.stats().retries("OptimisticLock"), 1);
    assert_eq!(manager.stats().retries("Timeout"), 1);
}

#[test]
fn conditional_failure_is_retried_in_always_mode() {
    let (repository, manager) = scripted_manager();
    repository.fail_next_commit(unknown_outcome());
    let manager = manager.with_retry_options(RetryOptions::new(ConditionalRetryMode::Always));

    manager.tx(|_| Ok(())).unwrap();

    assert_eq!(repository.counters().started(), 2);
    assert_eq!(manager.stats().retries("Timeout"), 1);
}

#[test]
fn conditional_failure_in_read_only_transactions_is_retried() {
    let (repository, manager) = scripted_manager();
    repository.fail_next_commit(unknown_outcome());

    manager.read_only().run(|_| Ok(())).unwrap();

    assert_eq!(repository.counters().started(), 2);
}

#[test]
fn cancellation_stops_the_backoff() {
    let env = TestRepository::new();
    let token = CancellationToken::new();
    let manager = env.with_cancellation(token.clone());

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        token.cancel();
    });
    let error = manager
        .tx(|_| -> CoreResult<()> {
            Err(CoreError::retryable(
                "Busy",
                "session busy",
                RetryPolicy::fixed(Duration::from_secs(30), 0.0),
            ))
        })
        .unwrap_err();
    canceller.join().unwrap();

    assert_eq!(error.kind(), ErrorKind::Interrupted);
    assert_eq!(env.stats().attempts(), 1);
    assert_eq!(env.stats().fails(), 1);
}

// Deferred callbacks and dry run

#[test]
fn dry_run_returns_the_value_and_writes_nothing() {
    let env = TestRepository::new();
    let after_commit = Cell::new(false);

    let inserted = env
        .with_dry_run(true)
        .tx(|tx| {
            tx.defer(|| after_commit.set(true));
            tx.table::<Account>().insert(account("a", " ann ", 1))
        })
        .unwrap();

    assert_eq!(inserted.owner, "ann");
    assert!(!after_commit.get());
    assert!(env.find::<Account>(&AccountId("a".into())).is_none());
    assert_eq!(env.stats().dry_runs(), 1);
    assert_eq!(env.repository.version(), 0);
}

#[test]
fn finally_runs_once_for_every_outcome() {
    let env = TestRepository::new();
    let runs = Cell::new(0);

    env.tx(|tx| {
        tx.defer_finally(|| runs.set(runs.get() + 1));
        Ok(())
    })
    .unwrap();
    assert_eq!(runs.replace(0), 1);

    env.tx(|tx| -> CoreResult<()> {
        tx.defer_finally(|| runs.set(runs.get() + 1));
        Err(CoreError::invalid_operation("boom"))
    })
    .unwrap_err();
    assert_eq!(runs.replace(0), 1);

    env.with_max_retries(2)
        .tx(|tx| -> CoreResult<()> {
            tx.defer_finally(|| runs.set(runs.get() + 1));
            Err(busy())
        })
        .unwrap_err();
    assert_eq!(runs.replace(0), 1);

    env.with_dry_run(true)
        .tx(|tx| {
            tx.defer_finally(|| runs.set(runs.get() + 1));
            Ok(())
        })
        .unwrap();
    assert_eq!(runs.replace(0), 1);
}

#[test]
fn after_commit_runs_after_success_only() {
    let env = TestRepository::new();
    let committed = Cell::new(0);

    env.tx(|tx| {
        tx.defer(|| committed.set(committed.get() + 1));
        tx.table::<Account>().save(account("a", "ann", 1)).map(drop)
    })
    .unwrap();
    env.tx(|tx| -> CoreResult<()> {
        tx.defer(|| committed.set(committed.get() + 1));
        Err(CoreError::invalid_operation("boom"))
    })
    .unwrap_err();

    assert_eq!(committed.get(), 1);
}

// Nesting

#[test]
fn strict_policy_rejects_nested_transactions() {
    let env = TestRepository::new();
    let strict = env.fail_on_unknown_separate_tx();

    let error = strict.tx(|_| strict.tx(|_| Ok(()))).unwrap_err();

    assert!(matches!(error, CoreError::NestedTransaction { .. }));
}

#[test]
fn default_policy_warns_about_nested_transactions() {
    let env = TestRepository::new();
    assert_eq!(env.separate_policy(), SeparatePolicy::Log);

    let (result, logs) = capture_logs(Level::WARN, || {
        env.with_name("outer")
            .tx(|_| env.with_name("inner").tx(|_| Ok(())))
    });

    result.unwrap();
    let warnings = logs.lines_containing("was run when another transaction is active");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("inner"));
}

#[test]
fn separate_transactions_stay_silent() {
    let env = TestRepository::new();

    let (result, logs) = capture_logs(Level::WARN, || {
        env.tx(|_| env.separate().tx(|_| Ok(())))
    });

    result.unwrap();
    assert!(logs.lines_containing("another transaction").is_empty());
}

// Store conflicts

#[test]
fn lost_update_is_retried_against_fresh_data() {
    let env = TestRepository::seeded([account("a", "ann", 100)]);
    let interfered = Cell::new(false);

    env.tx(|tx| {
        let table = tx.table::<Account>();
        let current = table
            .find(&AccountId("a".into()))?
            .ok_or_else(|| CoreError::invalid_argument("missing account"))?;
        if !interfered.replace(true) {
            env.save_all([account("a", "ann", 200)]);
        }
        table
            .save(Account {
                balance: current.balance + 1,
                ..(*current).clone()
            })
            .map(drop)
    })
    .unwrap();

    assert_eq!(env.stats().retries("OptimisticLock"), 1);
    assert_eq!(env.find::<Account>(&AccountId("a".into())).unwrap().balance, 201);
}
