//! Identifier values, schemas and ordering.

mod id_schema;
mod value;

pub use id_schema::{
    compare_cells, matches_prefix, EntityId, EntityIdSchema, IdCells, IdField, IdNode, IdShape,
};
pub(crate) use id_schema::simple_type_name;
pub use value::{FieldKind, IdValue};
