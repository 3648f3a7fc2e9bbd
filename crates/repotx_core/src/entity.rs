//! Entities stored in tables.

use crate::error::CoreResult;
use crate::schema::{compare_cells, simple_type_name, EntityId, EntityIdSchema};
use std::fmt::Debug;
use std::sync::Arc;

/// A stored aggregate with an identifier.
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    /// Identifier type.
    type Id: EntityId;

    /// Returns the entity's identifier.
    fn id(&self) -> &Self::Id;

    /// Name of the table holding this entity type.
    fn table_name() -> &'static str {
        simple_type_name(std::any::type_name::<Self>())
    }

    /// Hook applied to every entity read from the store.
    fn post_load(self) -> Self {
        self
    }

    /// Hook applied to every entity before it is written.
    fn pre_save(self) -> Self {
        self
    }
}

/// Sorts entities by identifier in canonical order.
pub fn sort_by_id<E: Entity>(entities: Vec<Arc<E>>) -> CoreResult<Vec<Arc<E>>> {
    let schema = EntityIdSchema::of::<E::Id>()?;
    let mut keyed = entities
        .into_iter()
        .map(|entity| -> CoreResult<_> { Ok((schema.flatten(entity.id())?, entity)) })
        .collect::<CoreResult<Vec<_>>>()?;
    keyed.sort_by(|(a, _), (b, _)| compare_cells(a, b));
    Ok(keyed.into_iter().map(|(_, entity)| entity).collect())
}
