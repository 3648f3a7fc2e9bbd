//! Benchmark utilities.

use rand::seq::SliceRandom;
use rand::Rng;
use repotx_testkit::{item, Item, ItemId, Status};

/// Generate `count` items with distinct ids.
pub fn generate_items(count: usize) -> Vec<Item> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let status = if rng.gen_bool(0.5) { Status::Ok } else { Status::Error };
            item((i / 100) as i32, (i % 100) as i64, "bench", status)
        })
        .collect()
}

/// Ids of `items` in random order.
pub fn shuffled_ids(items: &[Item]) -> Vec<ItemId> {
    let mut ids: Vec<_> = items.iter().map(|item| item.id.clone()).collect();
    ids.shuffle(&mut rand::thread_rng());
    ids
}
