//! Leaf values of entity identifiers.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Category of a leaf identifier field.
///
/// Only the allowed kinds (see [`FieldKind::is_allowed`]) may appear in an
/// identifier; the others exist so that a schema can describe, and reject,
/// fields it cannot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// UTF-8 string.
    String,
    /// Signed integer of any width, widened to `i64`.
    Integer,
    /// Enum, ordered by variant name.
    Enum,
    /// Boolean.
    Boolean,
    /// UTC timestamp.
    Timestamp,
    /// UUID.
    Uuid,
    /// Byte sequence.
    Bytes,
    /// Floating point number.
    Float,
    /// Structured object stored as a single column.
    Object,
}

impl FieldKind {
    /// Kinds an identifier leaf may have.
    pub const ALLOWED: [FieldKind; 7] = [
        FieldKind::String,
        FieldKind::Integer,
        FieldKind::Enum,
        FieldKind::Boolean,
        FieldKind::Timestamp,
        FieldKind::Uuid,
        FieldKind::Bytes,
    ];

    /// Returns true if this kind may be used in an identifier.
    pub fn is_allowed(self) -> bool {
        Self::ALLOWED.contains(&self)
    }
}

/// A non-null leaf value of an identifier.
///
/// Values of the same kind are totally ordered. Values of different kinds
/// never meet in one field, because the schema fixes the kind per field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdValue {
    /// String value.
    String(String),
    /// Integer value.
    Integer(i64),
    /// Enum value, by variant name.
    Enum(String),
    /// Boolean value.
    Boolean(bool),
    /// Timestamp value.
    Timestamp(DateTime<Utc>),
    /// UUID value.
    Uuid(Uuid),
    /// Byte sequence value.
    Bytes(Vec<u8>),
}

impl IdValue {
    /// Creates an enum value from its variant name.
    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::Enum(name.into())
    }

    /// Returns the kind of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::String(_) => FieldKind::String,
            Self::Integer(_) => FieldKind::Integer,
            Self::Enum(_) => FieldKind::Enum,
            Self::Boolean(_) => FieldKind::Boolean,
            Self::Timestamp(_) => FieldKind::Timestamp,
            Self::Uuid(_) => FieldKind::Uuid,
            Self::Bytes(_) => FieldKind::Bytes,
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) | Self::Enum(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Bytes(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<String> for IdValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for IdValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

macro_rules! integer_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for IdValue {
                fn from(value: $ty) -> Self {
                    Self::Integer(i64::from(value))
                }
            }
        )*
    };
}

integer_from!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for IdValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for IdValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Uuid> for IdValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<Vec<u8>> for IdValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for IdValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}
