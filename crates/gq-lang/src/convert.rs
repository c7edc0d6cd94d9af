//! Dynamic conversion between untyped runtime values and the kinds host
//! functions declare.
//!
//! Rules are tried in order: passthrough, numeric widening, capability sets,
//! synthesis. Function kinds are satisfied by wrapping a callable in the
//! adapter registered for the exact signature.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use itertools::Itertools;
use thiserror::Error;

use crate::{
    context::Runtime,
    geo::{FeatureId, FeatureType, Query},
    value::{Callable, HostFunction, Value},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    /// The leading parameter of every host function.
    Context,
    Any,
    Bool,
    Int,
    Float,
    /// Int or Float.
    Number,
    String,
    FeatureId,
    PointId,
    PathId,
    AreaId,
    RelationId,
    /// Anything with tags: a feature, or an id resolved through the world.
    Taggable,
    Feature,
    Point,
    Path,
    Area,
    /// Point, Path, Area or a feature.
    Geometry,
    Tag,
    Query,
    Pair,
    Collection,
    Change,
    Function(Arc<Signature>),
    /// Consumes every remaining argument. Only valid as the last parameter.
    Variadic(Box<Kind>),
}

impl Kind {
    pub fn function(params: Vec<Kind>, result: Kind) -> Kind {
        Kind::Function(Arc::new(Signature::new(params, result)))
    }

    pub fn variadic(kind: Kind) -> Kind {
        Kind::Variadic(Box::new(kind))
    }

    /// Calls `f` with every function signature mentioned by this kind,
    /// including those nested in variadics and other signatures.
    pub fn visit_signatures<'a>(&'a self, f: &mut impl FnMut(&'a Arc<Signature>)) {
        match self {
            Kind::Function(signature) => {
                f(signature);
                signature.params.iter().for_each(|kind| kind.visit_signatures(f));
                signature.result.visit_signatures(f);
            }
            Kind::Variadic(kind) => kind.visit_signatures(f),
            _ => {}
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Function(signature) => write!(f, "{}", signature),
            Kind::Variadic(kind) => write!(f, "{}...", kind),
            kind => write!(f, "{:?}", kind),
        }
    }
}

/// The shape of a function value: argument kinds (the context is implied)
/// and result kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<Kind>,
    pub result: Kind,
}

impl Signature {
    pub fn new(params: Vec<Kind>, result: Kind) -> Self {
        Signature { params, result }
    }

    /// Parameter count including the leading context.
    pub fn parameter_count(&self) -> usize {
        self.params.len() + 1
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}) -> {}", self.params.iter().join(", "), self.result)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("expected `{expected}`, found `{found}`")]
    Mismatch { expected: Kind, found: &'static str },
    #[error("feature `{0}` not found")]
    FeatureNotFound(FeatureId),
    #[error("no adapter registered for `{0}`")]
    MissingAdapter(Signature),
}

fn mismatch(expected: &Kind, found: &Value) -> ConversionError {
    ConversionError::Mismatch {
        expected: expected.clone(),
        found: found.kind_name(),
    }
}

/// Wraps callables so they can be passed where a function of one exact
/// signature is expected.
///
/// The wrapper is a host function with the adapter's signature, so the
/// usual argument and result conversion runs around the wrapped call.
#[derive(Debug, Clone, PartialEq)]
pub struct Adapter {
    signature: Arc<Signature>,
}

impl Adapter {
    pub fn new(signature: Arc<Signature>) -> Self {
        Adapter { signature }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn adapt(&self, callable: Callable) -> Callable {
        let name = callable.name();
        let params = std::iter::once(Kind::Context)
            .chain(self.signature.params.iter().cloned())
            .collect();

        Callable::Host(HostFunction::new(
            name,
            params,
            self.signature.result.clone(),
            move |ctx, args| ctx.call(&callable, args),
        ))
    }
}

/// Turns a query into a `(feature) -> bool` predicate.
pub fn query_predicate(query: Query) -> Callable {
    Callable::Host(HostFunction::new(
        "query",
        vec![Kind::Context, Kind::Taggable],
        Kind::Bool,
        move |_, args| match args.as_slice() {
            [Value::Feature(feature)] => Ok(Value::Bool(query.matches(&feature.tags))),
            _ => Ok(Value::Bool(false)),
        },
    ))
}

/// Converts `value` so that it satisfies `kind`.
pub fn convert(value: Value, kind: &Kind, runtime: &Runtime<'_>) -> Result<Value, ConversionError> {
    match (kind, value) {
        // Passthrough.
        (Kind::Any, value)
        | (Kind::Bool, value @ Value::Bool(_))
        | (Kind::Int, value @ Value::Int(_))
        | (Kind::Float, value @ Value::Float(_))
        | (Kind::String, value @ Value::String(_))
        | (Kind::FeatureId, value @ Value::FeatureId(_))
        | (Kind::Point, value @ Value::Point(_))
        | (Kind::Path, value @ Value::Path(_))
        | (Kind::Area, value @ Value::Area(_))
        | (Kind::Tag, value @ Value::Tag(_))
        | (Kind::Query, value @ Value::Query(_))
        | (Kind::Pair, value @ Value::Pair(_))
        | (Kind::Feature, value @ Value::Feature(_))
        | (Kind::Collection, value @ Value::Collection(_))
        | (Kind::Change, value @ Value::Change(_)) => Ok(value),

        // Widening.
        (Kind::Float, Value::Int(n)) => Ok(Value::Float(n as f64)),

        // Capabilities.
        (Kind::Number, value @ (Value::Int(_) | Value::Float(_))) => Ok(value),
        (Kind::Taggable, value @ Value::Feature(_)) => Ok(value),
        (
            Kind::Geometry,
            value @ (Value::Point(_) | Value::Path(_) | Value::Area(_) | Value::Feature(_)),
        ) => Ok(value),
        (Kind::FeatureId, Value::Feature(feature)) => Ok(Value::FeatureId(feature.id.clone())),
        (Kind::Feature | Kind::Taggable | Kind::Geometry, Value::FeatureId(id)) => runtime
            .world
            .find_feature(&id)
            .map(Value::Feature)
            .ok_or(ConversionError::FeatureNotFound(id)),

        // Synthesis.
        (Kind::PointId, value) => typed_id(value, FeatureType::Point, kind),
        (Kind::PathId, value) => typed_id(value, FeatureType::Path, kind),
        (Kind::AreaId, value) => typed_id(value, FeatureType::Area, kind),
        (Kind::RelationId, value) => typed_id(value, FeatureType::Relation, kind),
        (Kind::String, Value::Tag(tag)) => Ok(Value::String(tag.value)),
        (Kind::Int, Value::Tag(tag)) => match tag.int_value() {
            Some(n) => Ok(Value::Int(n)),
            None => Err(mismatch(kind, &Value::Tag(tag))),
        },
        (Kind::Float, Value::Tag(tag)) => match tag.float_value() {
            Some(n) => Ok(Value::Float(n)),
            None => Err(mismatch(kind, &Value::Tag(tag))),
        },
        (Kind::Number, Value::Tag(tag)) => match (tag.int_value(), tag.float_value()) {
            (Some(n), _) => Ok(Value::Int(n)),
            (None, Some(n)) => Ok(Value::Float(n)),
            (None, None) => Err(mismatch(kind, &Value::Tag(tag))),
        },

        // Functions.
        (Kind::Function(signature), Value::Callable(callable))
            if callable.num_args() + 1 == signature.parameter_count() =>
        {
            runtime
                .registry
                .adapter(signature)
                .map(|adapter| Value::Callable(adapter.adapt(callable)))
                .ok_or_else(|| ConversionError::MissingAdapter(signature.as_ref().clone()))
        }
        (Kind::Function(signature), Value::Query(query))
            if signature.params.len() == 1
                && matches!(signature.result, Kind::Bool | Kind::Any) =>
        {
            Ok(Value::Callable(query_predicate(query)))
        }

        (Kind::Variadic(inner), value) => convert(value, inner, runtime),
        (kind, value) => Err(mismatch(kind, &value)),
    }
}

fn typed_id(value: Value, feature_type: FeatureType, kind: &Kind) -> Result<Value, ConversionError> {
    match value {
        Value::FeatureId(id) if id.kind == feature_type => Ok(Value::FeatureId(id)),
        Value::Feature(feature) if feature.id.kind == feature_type => {
            Ok(Value::FeatureId(feature.id.clone()))
        }
        value => Err(mismatch(kind, &value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::Deadline,
        geo::{LatLng, Tag},
        registry::Registry,
        world::{MemoryWorld, World},
    };
    use rstest::{fixture, rstest};

    #[fixture]
    fn registry() -> Registry {
        Registry::standard().unwrap()
    }

    fn with_runtime<T>(registry: &Registry, f: impl FnOnce(&Runtime<'_>) -> T) -> T {
        let world = MemoryWorld::fixture();
        let deadline = Deadline::never();
        let runtime = Runtime {
            world: &world as &dyn World,
            registry,
            deadline: &deadline,
            parallelism: 1,
        };
        f(&runtime)
    }

    fn bank_station() -> FeatureId {
        FeatureId::area("openstreetmap.org/way", 1)
    }

    #[rstest]
    #[case::passthrough(Value::Int(1), Kind::Int, Value::Int(1))]
    #[case::any(Value::from("x"), Kind::Any, Value::from("x"))]
    #[case::widening(Value::Int(2), Kind::Float, Value::Float(2.0))]
    #[case::number_int(Value::Int(2), Kind::Number, Value::Int(2))]
    #[case::number_float(Value::Float(2.5), Kind::Number, Value::Float(2.5))]
    #[case::geometry_point(Value::Point(LatLng::new(1.0, 2.0)), Kind::Geometry, Value::Point(LatLng::new(1.0, 2.0)))]
    #[case::typed_id(Value::FeatureId(bank_station()), Kind::AreaId, Value::FeatureId(bank_station()))]
    #[case::tag_to_string(Value::Tag(Tag::new("#building", "yes")), Kind::String, Value::from("yes"))]
    #[case::tag_to_int(Value::Tag(Tag::new("#levels", "3")), Kind::Int, Value::Int(3))]
    #[case::tag_to_float(Value::Tag(Tag::new("#levels", "3")), Kind::Float, Value::Float(3.0))]
    #[case::tag_to_number(Value::Tag(Tag::new("#height", "12.5")), Kind::Number, Value::Float(12.5))]
    fn test_convert(registry: Registry, #[case] value: Value, #[case] kind: Kind, #[case] expected: Value) {
        let converted = with_runtime(&registry, |runtime| convert(value, &kind, runtime));
        assert_eq!(converted, Ok(expected));
    }

    #[rstest]
    #[case::no_narrowing(Value::Float(1.5), Kind::Int, "expected `Int`, found `Float`")]
    #[case::string_is_not_number(Value::from("1"), Kind::Number, "expected `Number`, found `String`")]
    #[case::wrong_id_type(Value::FeatureId(bank_station()), Kind::PointId, "expected `PointId`, found `FeatureId`")]
    #[case::tag_not_numeric(Value::Tag(Tag::new("#building", "yes")), Kind::Int, "expected `Int`, found `Tag`")]
    #[case::int_is_not_function(Value::Int(1), Kind::function(vec![Kind::Any], Kind::Any), "expected `(Any) -> Any`, found `Int`")]
    fn test_convert_errors(registry: Registry, #[case] value: Value, #[case] kind: Kind, #[case] message: &str) {
        let converted = with_runtime(&registry, |runtime| convert(value, &kind, runtime));
        assert_eq!(converted.unwrap_err().to_string(), message);
    }

    #[rstest]
    fn test_feature_id_resolves_through_world(registry: Registry) {
        let converted = with_runtime(&registry, |runtime| {
            convert(Value::FeatureId(bank_station()), &Kind::Taggable, runtime)
        });
        let Ok(Value::Feature(feature)) = converted else {
            panic!("expected a feature, got {:?}", converted);
        };
        assert_eq!(feature.id, bank_station());
    }

    #[rstest]
    fn test_missing_feature(registry: Registry) {
        let missing = FeatureId::area("openstreetmap.org/way", 999);
        let converted = with_runtime(&registry, |runtime| {
            convert(Value::FeatureId(missing.clone()), &Kind::Feature, runtime)
        });
        assert_eq!(converted, Err(ConversionError::FeatureNotFound(missing)));
    }

    #[rstest]
    fn test_callable_with_wrong_arity_is_not_a_function(registry: Registry) {
        let add = Callable::Host(registry.get("add").unwrap().clone());
        let kind = Kind::function(vec![Kind::Any], Kind::Any);
        let converted = with_runtime(&registry, |runtime| {
            convert(Value::Callable(add), &kind, runtime)
        });
        assert!(matches!(converted, Err(ConversionError::Mismatch { .. })));
    }

    #[rstest]
    fn test_callable_is_adapted_to_signature(registry: Registry) {
        let area = Callable::Host(registry.get("area").unwrap().clone());
        let kind = Kind::function(vec![Kind::Any], Kind::Any);
        let converted = with_runtime(&registry, |runtime| {
            convert(Value::Callable(area), &kind, runtime)
        });
        let Ok(Value::Callable(Callable::Host(adapted))) = converted else {
            panic!("expected an adapted host function");
        };
        assert_eq!(adapted.name, "area");
        assert_eq!(adapted.params.as_ref(), &[Kind::Context, Kind::Any]);
    }

    #[rstest]
    fn test_query_becomes_predicate(registry: Registry) {
        let kind = Kind::function(vec![Kind::Any], Kind::Bool);
        let converted = with_runtime(&registry, |runtime| {
            convert(Value::Query(Query::Keyed("#building".into())), &kind, runtime)
        });
        let Ok(Value::Callable(Callable::Host(predicate))) = converted else {
            panic!("expected a predicate");
        };
        assert_eq!(predicate.name, "query");
        assert_eq!(predicate.result, Kind::Bool);
    }
}
