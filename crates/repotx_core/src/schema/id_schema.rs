//! Identifier schemas and the canonical identifier order.
//!
//! An identifier type describes itself through [`EntityId::shape`] and
//! exposes its values through [`EntityId::node`]. [`EntityIdSchema`] flattens
//! both into an ordered list of leaf fields, which is what ranges, caches and
//! stores work with.

use super::value::{FieldKind, IdValue};
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::any::TypeId;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, LazyLock};

/// Flattened identifier: one optional value per leaf field, in schema order.
///
/// The derived `Ord` of `Vec<Option<IdValue>>` is the canonical order:
/// nulls first, leaf by leaf.
pub type IdCells = Vec<Option<IdValue>>;

/// Static description of an identifier type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdShape {
    /// Raw leaf field; only valid inside a composite.
    Leaf(FieldKind),
    /// Value type explicitly converted to a single column.
    Converted(FieldKind),
    /// Named sub-fields, in declaration order.
    Composite(Vec<(&'static str, IdShape)>),
}

impl IdShape {
    /// Creates a composite shape from `(name, shape)` pairs.
    pub fn composite(fields: impl IntoIterator<Item = (&'static str, IdShape)>) -> Self {
        Self::Composite(fields.into_iter().collect())
    }

    fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) | Self::Converted(_) => 1,
            Self::Composite(fields) => fields.iter().map(|(_, shape)| shape.leaf_count()).sum(),
        }
    }
}

/// Runtime values of an identifier, mirroring its [`IdShape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdNode {
    /// Missing value (a leaf or a whole sub-identifier).
    Null,
    /// Leaf value.
    Value(IdValue),
    /// Sub-field values, in declaration order.
    Composite(Vec<IdNode>),
}

impl IdNode {
    /// Creates a leaf node.
    pub fn value(value: impl Into<IdValue>) -> Self {
        Self::Value(value.into())
    }

    /// Creates a leaf node that is null when `value` is `None`.
    pub fn opt<V: Into<IdValue>>(value: Option<V>) -> Self {
        value.map_or(Self::Null, |value| Self::Value(value.into()))
    }

    /// Creates a composite node.
    pub fn composite(nodes: impl IntoIterator<Item = IdNode>) -> Self {
        Self::Composite(nodes.into_iter().collect())
    }
}

/// An entity identifier.
///
/// Implementations describe their fields with [`shape`](Self::shape) and
/// return matching values from [`node`](Self::node). A partial identifier
/// (an id prefix) leaves trailing leaves null.
pub trait EntityId: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Describes the identifier's fields.
    fn shape() -> IdShape;

    /// Returns the identifier's values.
    fn node(&self) -> IdNode;
}

/// A flattened leaf field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdField {
    /// Dotted path of the field, e.g. `parent.name`.
    pub name: String,
    /// Kind of the field's values.
    pub kind: FieldKind,
}

/// Flattened, validated schema of one identifier type.
#[derive(Debug)]
pub struct EntityIdSchema {
    type_name: &'static str,
    shape: IdShape,
    fields: Vec<IdField>,
}

static SCHEMAS: LazyLock<RwLock<HashMap<TypeId, Arc<EntityIdSchema>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

impl EntityIdSchema {
    /// Name of the single field of a converted, non-composite identifier.
    pub const CONVERTED_FIELD: &'static str = "id";

    /// Returns the schema of `ID`, deriving and caching it on first use.
    pub fn of<ID: EntityId>() -> CoreResult<Arc<EntityIdSchema>> {
        let key = TypeId::of::<ID>();
        if let Some(schema) = SCHEMAS.read().get(&key) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(Self::from_shape(std::any::type_name::<ID>(), ID::shape())?);
        let mut schemas = SCHEMAS.write();
        Ok(Arc::clone(schemas.entry(key).or_insert(schema)))
    }

    /// Validates and flattens a shape without caching it.
    pub fn from_shape(type_name: &'static str, shape: IdShape) -> CoreResult<Self> {
        let mut fields = Vec::new();
        match &shape {
            IdShape::Composite(children) => {
                collect_fields(type_name, "", children, &mut fields)?;
                if fields.is_empty() {
                    return Err(CoreError::invalid_schema(type_name, "ID must have at least 1 field"));
                }
            }
            IdShape::Converted(kind) => {
                check_kind(type_name, Self::CONVERTED_FIELD, *kind)?;
                fields.push(IdField {
                    name: Self::CONVERTED_FIELD.to_owned(),
                    kind: *kind,
                });
            }
            IdShape::Leaf(_) => {
                return Err(CoreError::invalid_schema(
                    type_name,
                    "non-composite ID must be a converted value type",
                ));
            }
        }

        Ok(Self {
            type_name,
            shape,
            fields,
        })
    }

    /// Full type name of the identifier.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name without its module path.
    pub fn simple_name(&self) -> &'static str {
        simple_type_name(self.type_name)
    }

    /// Flattened leaf fields, in schema order.
    pub fn fields(&self) -> &[IdField] {
        &self.fields
    }

    /// Names of the flattened leaf fields, in schema order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    /// Position of a flattened field.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Flattens an identifier into one cell per leaf field.
    pub fn flatten<ID: EntityId>(&self, id: &ID) -> CoreResult<IdCells> {
        self.flatten_node(&id.node())
    }

    /// Flattens raw identifier values into one cell per leaf field.
    pub fn flatten_node(&self, node: &IdNode) -> CoreResult<IdCells> {
        let mut cells = Vec::with_capacity(self.fields.len());
        self.flatten_into(&self.shape, node, &mut cells)?;
        Ok(cells)
    }

    fn flatten_into(&self, shape: &IdShape, node: &IdNode, cells: &mut IdCells) -> CoreResult<()> {
        match (shape, node) {
            (IdShape::Composite(_), IdNode::Null) => {
                cells.extend(std::iter::repeat(None).take(shape.leaf_count()));
            }
            (IdShape::Leaf(_) | IdShape::Converted(_), IdNode::Null) => cells.push(None),
            (IdShape::Leaf(kind) | IdShape::Converted(kind), IdNode::Value(value)) => {
                if value.kind() != *kind {
                    let field = self.field_name_at(cells.len());
                    return Err(CoreError::invalid_schema(
                        self.type_name,
                        format!("field `{field}` expects {kind:?}, got {:?}", value.kind()),
                    ));
                }
                cells.push(Some(value.clone()));
            }
            (IdShape::Composite(children), IdNode::Composite(nodes)) if children.len() == nodes.len() => {
                for ((_, child), node) in children.iter().zip(nodes) {
                    self.flatten_into(child, node, cells)?;
                }
            }
            _ => {
                let field = self.field_name_at(cells.len());
                return Err(CoreError::invalid_schema(
                    self.type_name,
                    format!("values do not match the declared shape at `{field}`"),
                ));
            }
        }
        Ok(())
    }

    fn field_name_at(&self, index: usize) -> &str {
        self.fields.get(index).map_or("<end>", |field| field.name.as_str())
    }

    /// Compares two identifiers in canonical order.
    pub fn compare<ID: EntityId>(&self, a: &ID, b: &ID) -> CoreResult<Ordering> {
        Ok(compare_cells(&self.flatten(a)?, &self.flatten(b)?))
    }

    /// Returns true if any leaf field of `id` is null.
    pub fn is_partial<ID: EntityId>(&self, id: &ID) -> CoreResult<bool> {
        Ok(self.flatten(id)?.iter().any(Option::is_none))
    }
}

/// Compares flattened identifiers leaf by leaf, nulls first.
pub fn compare_cells(a: &[Option<IdValue>], b: &[Option<IdValue>]) -> Ordering {
    for (left, right) in a.iter().zip(b) {
        let ord = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(left), Some(right)) => left.cmp(right),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Returns true if `cells` agrees with every non-null cell of `prefix`.
pub fn matches_prefix(prefix: &[Option<IdValue>], cells: &[Option<IdValue>]) -> bool {
    prefix
        .iter()
        .zip(cells)
        .all(|(expected, actual)| expected.is_none() || expected == actual)
}

pub(crate) fn simple_type_name(type_name: &'static str) -> &'static str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

fn check_kind(type_name: &str, field: &str, kind: FieldKind) -> CoreResult<()> {
    if kind.is_allowed() {
        return Ok(());
    }
    Err(CoreError::invalid_schema(
        type_name,
        format!(
            "leaf ID field `{field}` has kind {kind:?}; allowed kinds are {:?}",
            FieldKind::ALLOWED
        ),
    ))
}

fn collect_fields(
    type_name: &str,
    prefix: &str,
    children: &[(&'static str, IdShape)],
    fields: &mut Vec<IdField>,
) -> CoreResult<()> {
    for (index, (name, shape)) in children.iter().enumerate() {
        if children[..index].iter().any(|(other, _)| other == name) {
            return Err(CoreError::invalid_schema(
                type_name,
                format!("duplicate field `{prefix}{name}`"),
            ));
        }
        let path = format!("{prefix}{name}");
        match shape {
            IdShape::Leaf(kind) | IdShape::Converted(kind) => {
                check_kind(type_name, &path, *kind)?;
                fields.push(IdField { name: path, kind: *kind });
            }
            IdShape::Composite(nested) => {
                collect_fields(type_name, &format!("{path}."), nested, fields)?;
            }
        }
    }
    Ok(())
}
