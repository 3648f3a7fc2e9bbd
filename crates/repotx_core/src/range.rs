//! Contiguous identifier ranges.
//!
//! A [`Range`] pins a leading run of identifier fields to exact values
//! (`eq`), optionally bounds the next field from one or both sides
//! (`min`/`max`) and leaves the remaining fields unconstrained. Walking the
//! fields in schema order, each one is tagged `=`, `<` or `0`; only tag
//! strings of the form `=*<?0*` describe a single contiguous interval.

use crate::error::{CoreError, CoreResult};
use crate::schema::{EntityId, EntityIdSchema, IdValue};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A single contiguous interval or prefix of identifiers of type `ID`.
#[derive(Debug, Clone)]
pub struct Range<ID> {
    schema: Arc<EntityIdSchema>,
    eq: Vec<(usize, IdValue)>,
    min: Vec<(usize, IdValue)>,
    max: Vec<(usize, IdValue)>,
    _id: PhantomData<fn() -> ID>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Bounded,
    Free,
}

impl<ID: EntityId> Range<ID> {
    /// Range of all identifiers sharing the non-null fields of `partial`.
    pub fn prefix(partial: &ID) -> CoreResult<Self> {
        Self::create(partial, partial)
    }

    /// Closed range `min..=max`.
    pub fn create(min: &ID, max: &ID) -> CoreResult<Self> {
        let schema = EntityIdSchema::of::<ID>()?;
        let min = schema.flatten(min)?;
        let max = schema.flatten(max)?;
        Self::from_cell_bounds(schema, &min, &max)
    }

    /// Range from one flattened partial identifier.
    pub fn from_cells(schema: Arc<EntityIdSchema>, cells: &[Option<IdValue>]) -> CoreResult<Self> {
        Self::from_cell_bounds(schema, cells, cells)
    }

    /// Range from flattened lower and upper bounds.
    pub fn from_cell_bounds(
        schema: Arc<EntityIdSchema>,
        min: &[Option<IdValue>],
        max: &[Option<IdValue>],
    ) -> CoreResult<Self> {
        let width = schema.fields().len();
        if min.len() != width || max.len() != width {
            return Err(CoreError::invalid_argument(format!(
                "{} has {width} id fields, got bounds of {} and {}",
                schema.simple_name(),
                min.len(),
                max.len()
            )));
        }

        let mut eq = Vec::new();
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        let mut tags = Vec::with_capacity(width);

        for (index, (a, b)) in min.iter().zip(max).enumerate() {
            let tag = match (a, b) {
                (None, None) => Tag::Free,
                (None, Some(b)) => {
                    upper.push((index, b.clone()));
                    Tag::Bounded
                }
                (Some(a), None) => {
                    lower.push((index, a.clone()));
                    Tag::Bounded
                }
                (Some(a), Some(b)) => match a.cmp(b) {
                    Ordering::Less => {
                        lower.push((index, a.clone()));
                        upper.push((index, b.clone()));
                        Tag::Bounded
                    }
                    Ordering::Equal => {
                        eq.push((index, a.clone()));
                        Tag::Equal
                    }
                    Ordering::Greater => {
                        return Err(CoreError::invalid_range("min must be less or equal to max"));
                    }
                },
            };
            tags.push(tag);
        }

        if !is_contiguous(&tags) {
            return Err(CoreError::invalid_range(
                "Fields of min and max must be filled in specific order: (equal)*(different)?(null)*",
            ));
        }

        Ok(Self {
            schema,
            eq,
            min: lower,
            max: upper,
            _id: PhantomData,
        })
    }

    /// Returns true if the complete identifier `id` lies in this range.
    pub fn contains(&self, id: &ID) -> CoreResult<bool> {
        let cells = self.schema.flatten(id)?;
        self.contains_cells(&cells)
            .map_err(|_| CoreError::invalid_argument(format!("Id fields cannot be null: {id:?}")))
    }

    /// Returns true if a complete flattened identifier lies in this range.
    pub fn contains_cells(&self, cells: &[Option<IdValue>]) -> CoreResult<bool> {
        if cells.len() != self.schema.fields().len() || cells.iter().any(Option::is_none) {
            return Err(CoreError::invalid_argument("Id fields cannot be null"));
        }

        let value_at = |index: usize| cells[index].as_ref();
        let eq_ok = self.eq.iter().all(|(i, v)| value_at(*i) == Some(v));
        let min_ok = self.min.iter().all(|(i, v)| value_at(*i).is_some_and(|c| c >= v));
        let max_ok = self.max.iter().all(|(i, v)| value_at(*i).is_some_and(|c| c <= v));
        Ok(eq_ok && min_ok && max_ok)
    }

    /// Schema of the identifier type.
    pub fn schema(&self) -> &Arc<EntityIdSchema> {
        &self.schema
    }

    /// Fields pinned to one value.
    pub fn eq_fields(&self) -> impl Iterator<Item = (&str, &IdValue)> {
        self.named(&self.eq)
    }

    /// Fields with a lower bound.
    pub fn min_fields(&self) -> impl Iterator<Item = (&str, &IdValue)> {
        self.named(&self.min)
    }

    /// Fields with an upper bound.
    pub fn max_fields(&self) -> impl Iterator<Item = (&str, &IdValue)> {
        self.named(&self.max)
    }

    /// Names of the `eq`, `min` and `max` fields.
    pub fn field_sets(&self) -> [Vec<&str>; 3] {
        [
            self.eq_fields().map(|(name, _)| name).collect(),
            self.min_fields().map(|(name, _)| name).collect(),
            self.max_fields().map(|(name, _)| name).collect(),
        ]
    }

    fn named<'a>(
        &'a self,
        entries: &'a [(usize, IdValue)],
    ) -> impl Iterator<Item = (&'a str, &'a IdValue)> + 'a {
        entries
            .iter()
            .map(|(index, value)| (self.schema.fields()[*index].name.as_str(), value))
    }
}

fn is_contiguous(tags: &[Tag]) -> bool {
    let equal = tags.iter().take_while(|tag| **tag == Tag::Equal).count();
    let rest = &tags[equal..];
    let rest = match rest.first() {
        Some(Tag::Bounded) => &rest[1..],
        _ => rest,
    };
    rest.iter().all(|tag| *tag == Tag::Free)
}

impl<ID: EntityId> fmt::Display for Range<ID> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Range({}: ", self.schema.simple_name())?;
        let parts = self
            .eq_fields()
            .map(|(k, v)| format!("{k}={v}"))
            .chain(self.min_fields().map(|(k, v)| format!("{k}>={v}")))
            .chain(self.max_fields().map(|(k, v)| format!("{k}<={v}")));
        for (i, part) in parts.enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&part)?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, IdNode, IdShape};
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Status {
        Ok,
        Error,
    }

    impl Status {
        fn name(self) -> &'static str {
            match self {
                Status::Ok => "OK",
                Status::Error => "ERROR",
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct ItemId {
        a: Option<i32>,
        b: Option<i64>,
        c: Option<String>,
        d: Option<Status>,
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

    fn id(a: i32, b: i64, c: &str, d: Status) -> ItemId {
        ItemId {
            a: Some(a),
            b: Some(b),
            c: Some(c.into()),
            d: Some(d),
        }
    }

    fn partial(a: Option<i32>, b: Option<i64>, c: Option<&str>) -> ItemId {
        ItemId {
            a,
            b,
            c: c.map(str::to_owned),
            d: None,
        }
    }

    #[test]
    fn single_point_range() {
        let point = id(0, 0, "aaa", Status::Ok);
        let range = Range::create(&point, &point).unwrap();
        assert!(range.contains(&point).unwrap());
        assert!(!range.contains(&id(0, 0, "aab", Status::Ok)).unwrap());
        assert_eq!(range.field_sets()[0], vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn min_greater_than_max_is_rejected() {
        let err = Range::create(&id(0, 1, "a", Status::Ok), &id(0, 0, "a", Status::Ok)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRange { .. }));
        assert!(err.to_string().contains("min must be less or equal to max"));
    }

    #[test]
    fn null_before_value_is_rejected() {
        let err = Range::prefix(&partial(Some(1), None, Some("x"))).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRange { .. }));
    }

    #[test]
    fn two_diverging_fields_are_rejected() {
        let err = Range::create(&id(0, 0, "a", Status::Ok), &id(0, 1, "b", Status::Ok)).unwrap_err();
        assert!(err.to_string().contains("(equal)*(different)?(null)*"));
    }

    #[test]
    fn prefix_range() {
        let range = Range::prefix(&partial(Some(1), Some(2), None)).unwrap();
        let [eq, min, max] = range.field_sets();
        assert_eq!(eq, vec!["a", "b"]);
        assert!(min.is_empty());
        assert!(max.is_empty());
        assert!(range.contains(&id(1, 2, "zzz", Status::Error)).unwrap());
        assert!(!range.contains(&id(1, 3, "a", Status::Ok)).unwrap());
    }

    #[test]
    fn open_ended_bound() {
        let range = Range::create(&partial(Some(1), Some(5), None), &partial(Some(1), None, None)).unwrap();
        let [eq, min, max] = range.field_sets();
        assert_eq!(eq, vec!["a"]);
        assert_eq!(min, vec!["b"]);
        assert!(max.is_empty());
        assert!(range.contains(&id(1, 5, "a", Status::Ok)).unwrap());
        assert!(range.contains(&id(1, 500, "a", Status::Ok)).unwrap());
        assert!(!range.contains(&id(1, 4, "a", Status::Ok)).unwrap());
    }

    #[test]
    fn interval_on_divergent_field() {
        let range = Range::create(&partial(Some(1), Some(2), None), &partial(Some(1), Some(4), None)).unwrap();
        assert!(range.contains(&id(1, 2, "a", Status::Ok)).unwrap());
        assert!(range.contains(&id(1, 4, "z", Status::Ok)).unwrap());
        assert!(!range.contains(&id(1, 5, "a", Status::Ok)).unwrap());
        assert_eq!(range.to_string(), "Range(ItemId: a=1, b>=2, b<=4)");
    }

    #[test]
    fn contains_rejects_partial_candidate() {
        let range = Range::prefix(&partial(Some(1), None, None)).unwrap();
        let err = range.contains(&partial(Some(1), Some(2), None)).unwrap_err();
        assert!(err.to_string().contains("Id fields cannot be null"));
    }

    #[test]
    fn unconstrained_range_contains_everything() {
        let range = Range::prefix(&partial(None, None, None)).unwrap();
        assert!(range.field_sets().iter().all(Vec::is_empty));
        assert!(range.contains(&id(-7, 9, "q", Status::Error)).unwrap());
        assert_eq!(range.to_string(), "Range(ItemId: )");
    }

    #[test]
    fn from_cells_checks_width() {
        let schema = EntityIdSchema::of::<ItemId>().unwrap();
        let err = Range::<ItemId>::from_cells(schema, &[None]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn tag_patterns() {
        use Tag::*;
        assert!(is_contiguous(&[]));
        assert!(is_contiguous(&[Equal, Equal, Bounded, Free]));
        assert!(is_contiguous(&[Free, Free]));
        assert!(is_contiguous(&[Bounded]));
        assert!(!is_contiguous(&[Free, Equal]));
        assert!(!is_contiguous(&[Bounded, Bounded]));
        assert!(!is_contiguous(&[Equal, Bounded, Equal]));
    }

    proptest! {
        #[test]
        fn valid_ranges_contain_their_bounds(
            a in -3i32..3,
            b1 in -5i64..5,
            b2 in -5i64..5,
            c in "[a-c]{1,3}",
        ) {
            let (lo, hi) = if b1 <= b2 { (b1, b2) } else { (b2, b1) };
            let min = id(a, lo, &c, Status::Ok);
            let max = id(a, hi, &c, Status::Ok);
            if lo == hi {
                let range = Range::create(&min, &max).unwrap();
                prop_assert!(range.contains(&min).unwrap());
            } else {
                prop_assert!(Range::create(&min, &max).is_err());
                let range = Range::create(
                    &partial(Some(a), Some(lo), None),
                    &partial(Some(a), Some(hi), None),
                ).unwrap();
                prop_assert!(range.contains(&min).unwrap());
                prop_assert!(range.contains(&max).unwrap());
            }
        }

        #[test]
        fn contains_agrees_with_order(
            lo in -10i64..10,
            hi in -10i64..10,
            probe in -12i64..12,
        ) {
            prop_assume!(lo < hi);
            let range = Range::create(
                &partial(Some(0), Some(lo), None),
                &partial(Some(0), Some(hi), None),
            ).unwrap();
            let inside = range.contains(&id(0, probe, "x", Status::Ok)).unwrap();
            prop_assert_eq!(inside, lo <= probe && probe <= hi);
        }
    }
}
