pub mod callable;
pub mod collection;

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use itertools::Itertools;

pub use callable::{Callable, HostFunction, LambdaClosure, PartialApplication, Slots};
pub use collection::{ArrayCollection, Collection, CollectionIter};

use crate::{
    ast::Literal,
    geo::{Feature, FeatureId, LatLng, Query, Tag, quote},
    number::{Number, format_float},
    world::Change,
};

/// A runtime value. Every variant is `Send + Sync` so forked VMs can run on
/// worker threads. Nothing here converts between kinds implicitly; see
/// [`crate::convert`].
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    FeatureId(FeatureId),
    Point(LatLng),
    Path(Vec<LatLng>),
    Area(Vec<Vec<LatLng>>),
    Tag(Tag),
    Query(Query),
    Pair(Box<(Value, Value)>),
    Feature(Arc<Feature>),
    Collection(Arc<dyn Collection>),
    Callable(Callable),
    Change(Arc<dyn Change>),
}

impl Value {
    pub fn pair(key: Value, value: Value) -> Value {
        Value::Pair(Box::new((key, value)))
    }

    pub fn collection(collection: impl Collection + 'static) -> Value {
        Value::Collection(Arc::new(collection))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::FeatureId(_) => "FeatureId",
            Value::Point(_) => "Point",
            Value::Path(_) => "Path",
            Value::Area(_) => "Area",
            Value::Tag(_) => "Tag",
            Value::Query(_) => "Query",
            Value::Pair(_) => "Pair",
            Value::Feature(_) => "Feature",
            Value::Collection(_) => "Collection",
            Value::Callable(_) => "Function",
            Value::Change(_) => "Change",
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Int(n) => Some(Number::Int(*n)),
            Value::Float(n) => Some(Number::Float(*n)),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn from_literal(literal: &Literal) -> Value {
        match literal {
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(n) => Value::Float(*n),
            Literal::String(s) => Value::String(s.clone()),
            Literal::FeatureId(id) => Value::FeatureId(id.clone()),
            Literal::Point(ll) => Value::Point(*ll),
            Literal::Path(points) => Value::Path(points.clone()),
            Literal::Area(rings) => Value::Area(rings.clone()),
            Literal::Tag(tag) => Value::Tag(tag.clone()),
            Literal::Query(query) => Value::Query(query.clone()),
            Literal::Collection(entries) => Value::collection(ArrayCollection::from_pairs(
                entries
                    .iter()
                    .map(|(k, v)| (Value::from_literal(k), Value::from_literal(v))),
            )),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::FeatureId(a), Value::FeatureId(b)) => a == b,
            (Value::Point(a), Value::Point(b)) => a == b,
            (Value::Path(a), Value::Path(b)) => a == b,
            (Value::Area(a), Value::Area(b)) => a == b,
            (Value::Tag(a), Value::Tag(b)) => a == b,
            (Value::Query(a), Value::Query(b)) => a == b,
            (Value::Pair(a), Value::Pair(b)) => a == b,
            (Value::Feature(a), Value::Feature(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Collection(a), Value::Collection(b)) => {
                Arc::ptr_eq(a, b)
                    || matches!(
                        (collection::entries(a.as_ref()), collection::entries(b.as_ref())),
                        (Ok(a), Ok(b)) if a == b
                    )
            }
            (Value::Callable(a), Value::Callable(b)) => a == b,
            (Value::Change(a), Value::Change(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::String(s) => write!(f, "{}", quote(s)),
            Value::FeatureId(id) => write!(f, "{}", id),
            Value::Point(ll) => write!(f, "{}", ll),
            Value::Path(points) => write!(f, "(path {})", points.iter().join(" ")),
            Value::Area(rings) => write!(
                f,
                "(polygon {})",
                rings
                    .iter()
                    .map(|ring| format!("(path {})", ring.iter().join(" ")))
                    .join(" ")
            ),
            Value::Tag(tag) => write!(f, "{}", tag),
            Value::Query(query) => write!(f, "{}", query),
            Value::Pair(pair) => write!(f, "(pair {} {})", pair.0, pair.1),
            Value::Feature(feature) => write!(f, "{}", feature.id),
            Value::Collection(collection) => match collection::entries(collection.as_ref()) {
                Ok(entries) => write!(
                    f,
                    "{{{}}}",
                    entries
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k, v))
                        .join(", ")
                ),
                Err(err) => write!(f, "<collection: {}>", err),
            },
            Value::Callable(callable) => write!(f, "<function {}>", callable.name()),
            Value::Change(change) => write!(f, "<change {:?}>", change),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(n) => Value::Int(n),
            Number::Float(n) => Value::Float(n),
        }
    }
}

impl From<FeatureId> for Value {
    fn from(id: FeatureId) -> Self {
        Value::FeatureId(id)
    }
}

impl From<Tag> for Value {
    fn from(tag: Tag) -> Self {
        Value::Tag(tag)
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Value::Callable(callable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::no_numeric_coercion(Value::Int(1), Value::Float(1.0), false)]
    #[case::pairs(
        Value::pair(Value::Int(0), "a".into()),
        Value::pair(Value::Int(0), "a".into()),
        true
    )]
    #[case::collections_by_content(
        Value::collection(ArrayCollection::from_values(vec![Value::Int(1)])),
        Value::collection(ArrayCollection::from_pairs(vec![(Value::Int(0), Value::Int(1))])),
        true
    )]
    #[case::collections_differ(
        Value::collection(ArrayCollection::from_values(vec![Value::Int(1)])),
        Value::collection(ArrayCollection::new()),
        false
    )]
    fn test_equality(#[case] a: Value, #[case] b: Value, #[case] expected: bool) {
        assert_eq!(a == b, expected);
    }

    #[rstest]
    #[case(Value::Float(2.0), "2.0")]
    #[case(Value::String("a\"b".to_string()), "\"a\\\"b\"")]
    #[case(Value::Path(vec![LatLng::new(1.0, 2.0), LatLng::new(3.0, 4.0)]), "(path 1.0,2.0 3.0,4.0)")]
    #[case(
        Value::collection(ArrayCollection::from_pairs(vec![("yes".into(), Value::Int(2))])),
        "{\"yes\": 2}"
    )]
    fn test_display(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(value.to_string(), expected);
    }

    #[test]
    fn test_from_collection_literal() {
        let literal = Literal::Collection(vec![(Literal::Int(0), Literal::from("x"))]);
        assert_eq!(
            Value::from_literal(&literal),
            Value::collection(ArrayCollection::from_values(vec!["x".into()]))
        );
    }
}
