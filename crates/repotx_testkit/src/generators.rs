//! Property-based test generators using proptest.
//!
//! Strategies produce ids and entities from small value pools, so that
//! generated sets share prefixes and collide often.

use crate::fixtures::{Item, ItemId, Status};
use proptest::prelude::*;

/// Strategy for [`Status`].
pub fn status_strategy() -> impl Strategy<Value = Status> {
    prop_oneof![Just(Status::Ok), Just(Status::Error)]
}

/// Strategy for complete [`ItemId`]s.
pub fn item_id_strategy() -> impl Strategy<Value = ItemId> {
    (-2..3i32, -2..3i64, "[a-c]{1,2}", status_strategy())
        .prop_map(|(a, b, c, d)| ItemId::new(a, b, &c, d))
}

/// Strategy for [`ItemId`] prefixes: `a`, `a + b` or `a + b + c` set.
pub fn item_prefix_strategy() -> impl Strategy<Value = ItemId> {
    (item_id_strategy(), 1..4usize).prop_map(|(id, keep)| ItemId {
        a: id.a,
        b: id.b.filter(|_| keep > 1),
        c: id.c.filter(|_| keep > 2),
        d: None,
    })
}

/// Strategy for [`Item`]s.
pub fn item_strategy() -> impl Strategy<Value = Item> {
    (item_id_strategy(), "[a-z]{0,8}").prop_map(|(id, payload)| Item { id, payload })
}

/// Strategy for item sets with unique ids.
pub fn items_strategy(max: usize) -> impl Strategy<Value = Vec<Item>> {
    prop::collection::vec(item_strategy(), 0..max).prop_map(|items| {
        let mut seen = std::collections::HashSet::new();
        items
            .into_iter()
            .filter(|item| seen.insert(item.id.clone()))
            .collect()
    })
}
