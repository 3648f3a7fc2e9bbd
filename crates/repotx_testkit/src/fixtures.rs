//! Sample entities and a ready-made in-memory environment.

use repotx_core::{
    Entity, EntityId, FieldKind, IdNode, IdShape, IdValue, Repository, RepositoryTransaction,
    StdTxManager, TxOptions, TxStats,
};
use repotx_memory::{MemoryRepository, MemoryTransaction};
use std::sync::Arc;
use thiserror::Error;

/// Enum leaf used by [`ItemId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    /// Healthy.
    Ok,
    /// Failed.
    Error,
}

impl Status {
    /// Stored variant name; ids order by it.
    pub fn name(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
        }
    }
}

/// Four-field composite identifier `(a: int, b: long, c: string, d: enum)`.
///
/// Trailing `None`s make a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemId {
    /// First field.
    pub a: Option<i32>,
    /// Second field.
    pub b: Option<i64>,
    /// Third field.
    pub c: Option<String>,
    /// Fourth field.
    pub d: Option<Status>,
}

impl ItemId {
    /// Complete identifier.
    pub fn new(a: i32, b: i64, c: &str, d: Status) -> Self {
        Self {
            a: Some(a),
            b: Some(b),
            c: Some(c.to_owned()),
            d: Some(d),
        }
    }

    /// Identifier with `d` left null and any of `a`..`c` null.
    pub fn partial(a: Option<i32>, b: Option<i64>, c: Option<&str>) -> Self {
        Self {
            a,
            b,
            c: c.map(str::to_owned),
            d: None,
        }
    }
}

impl EntityId for ItemId {
    fn shape() -> IdShape {
        IdShape::composite([
            ("a", IdShape::Leaf(FieldKind::Integer)),
            ("b", IdShape::Leaf(FieldKind::Integer)),
            ("c", IdShape::Leaf(FieldKind::String)),
            ("d", IdShape::Leaf(FieldKind::Enum)),
        ])
    }

    fn node(&self) -> IdNode {
        IdNode::composite([
            IdNode::opt(self.a),
            IdNode::opt(self.b),
            IdNode::opt(self.c.clone()),
            IdNode::opt(self.d.map(|d| IdValue::enumeration(d.name()))),
        ])
    }
}

/// Entity keyed by [`ItemId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Identifier.
    pub id: ItemId,
    /// Free text.
    pub payload: String,
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &ItemId {
        &self.id
    }
}

/// Shorthand for a complete [`ItemId`].
pub fn item_id(a: i32, b: i64, c: &str, d: Status) -> ItemId {
    ItemId::new(a, b, c, d)
}

/// An [`Item`] whose payload names its id.
pub fn item(a: i32, b: i64, c: &str, d: Status) -> Item {
    Item {
        id: item_id(a, b, c, d),
        payload: format!("item-{a}-{b}-{c}-{}", d.name()),
    }
}

/// Single-column string identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(pub String);

impl EntityId for AccountId {
    fn shape() -> IdShape {
        IdShape::Converted(FieldKind::String)
    }

    fn node(&self) -> IdNode {
        IdNode::value(self.0.clone())
    }
}

/// Entity with a balance, for transfer scenarios.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Identifier.
    pub id: AccountId,
    /// Owner name, trimmed on save.
    pub owner: String,
    /// Balance in cents.
    pub balance: i64,
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &AccountId {
        &self.id
    }

    fn pre_save(mut self) -> Self {
        self.owner = self.owner.trim().to_owned();
        self
    }
}

/// An account owned by `owner`.
pub fn account(id: &str, owner: &str, balance: i64) -> Account {
    Account {
        id: AccountId(id.to_owned()),
        owner: owner.to_owned(),
        balance,
    }
}

/// Business error raised by transfer scenarios.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("insufficient funds: balance {balance}, requested {amount}")]
pub struct InsufficientFunds {
    /// Balance at the time of the transfer.
    pub balance: i64,
    /// Requested amount.
    pub amount: i64,
}

/// An in-memory repository with a manager on top.
///
/// Dereferences to the manager.
pub struct TestRepository {
    /// The store.
    pub repository: Arc<MemoryRepository>,
    /// Manager over the store.
    pub manager: StdTxManager<MemoryRepository>,
}

impl TestRepository {
    /// Creates an empty environment.
    pub fn new() -> Self {
        let repository = Arc::new(MemoryRepository::new());
        let manager = StdTxManager::new(Arc::clone(&repository));
        Self {
            repository,
            manager,
        }
    }

    /// Creates an environment holding `entities`, committed in one transaction.
    pub fn seeded<E: Entity>(entities: impl IntoIterator<Item = E>) -> Self {
        let env = Self::new();
        env.save_all(entities);
        env
    }

    /// Saves `entities` in one committed transaction, bypassing the manager.
    pub fn save_all<E: Entity>(&self, entities: impl IntoIterator<Item = E>) {
        let tx = self.raw_transaction(&TxOptions::default());
        for entity in entities {
            tx.table::<E>().save(entity).expect("Failed to save entity");
        }
        tx.commit().expect("Failed to commit seed data");
    }

    /// Reads one entity in a fresh transaction, bypassing the manager.
    pub fn find<E: Entity>(&self, id: &E::Id) -> Option<E> {
        let tx = self.raw_transaction(&TxOptions::default());
        let found = tx.table::<E>().find(id).expect("Failed to find entity");
        tx.rollback().expect("Failed to roll back");
        found.map(|entity| (*entity).clone())
    }

    /// Number of stored entities of type `E`.
    pub fn count<E: Entity>(&self) -> usize {
        let tx = self.raw_transaction(&TxOptions::default());
        let all = tx.table::<E>().find_all().expect("Failed to list entities");
        tx.rollback().expect("Failed to roll back");
        all.len()
    }

    /// Opens a store transaction directly.
    pub fn raw_transaction(&self, options: &TxOptions) -> MemoryTransaction {
        self.repository
            .start_transaction(options)
            .expect("Failed to start transaction")
    }

    /// Statistics of the manager and the managers derived from it.
    pub fn stats(&self) -> &TxStats {
        self.manager.stats()
    }
}

impl Default for TestRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestRepository {
    type Target = StdTxManager<MemoryRepository>;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Statistics snapshot as JSON, for readable assertion failures.
pub fn stats_json(stats: &TxStats) -> serde_json::Value {
    serde_json::to_value(stats.snapshot()).expect("Failed to serialize stats")
}
