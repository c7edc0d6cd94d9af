use std::{cmp::Ordering, mem::Discriminant, sync::Arc};

use rustc_hash::FxHashMap;

use crate::{
    context::Context,
    convert::{Kind, query_predicate},
    geo::{FeatureType, Geometry, Tag, area_m2},
    number::Number,
    registry::RegistryBuilder,
    value::{ArrayCollection, Callable, Collection, HostFunction, Value},
    vm::error::RuntimeError,
    world::AddTag,
};

fn mapper() -> Kind {
    Kind::function(vec![Kind::Any], Kind::Any)
}

fn predicate() -> Kind {
    Kind::function(vec![Kind::Any], Kind::Bool)
}

/// Registers the standard library and the adapters its function parameters
/// need.
pub fn register(builder: &mut RegistryBuilder) {
    builder
        .register_adapter(vec![Kind::Any], Kind::Any)
        .register_adapter(vec![Kind::Any], Kind::Bool);

    builder
        .register(arithmetic("add", Number::add, "integer overflow"))
        .register(arithmetic("subtract", Number::subtract, "integer overflow"))
        .register(arithmetic("multiply", Number::multiply, "integer overflow"))
        .register(arithmetic("divide", Number::divide, "division by zero"))
        .register(comparison("gt", |o| o == Ordering::Greater))
        .register(comparison("gte", |o| o != Ordering::Less))
        .register(comparison("lt", |o| o == Ordering::Less))
        .register(comparison("lte", |o| o != Ordering::Greater));

    builder.register(HostFunction::new(
        "eq",
        vec![Kind::Context, Kind::Any, Kind::Any],
        Kind::Bool,
        |_, args| match args.as_slice() {
            [a, b] => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => Ok(Value::Bool(x.compare(y) == Some(Ordering::Equal))),
                _ => Ok(Value::Bool(a == b)),
            },
            _ => Err(invalid_arguments("eq", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "not",
        vec![Kind::Context, Kind::Bool],
        Kind::Bool,
        |_, args| match args.as_slice() {
            [Value::Bool(b)] => Ok(Value::Bool(!b)),
            _ => Err(invalid_arguments("not", &args)),
        },
    ));

    builder.register(HostFunction::new(
        "pair",
        vec![Kind::Context, Kind::Any, Kind::Any],
        Kind::Pair,
        |_, args| match args.as_slice() {
            [first, second] => Ok(Value::pair(first.clone(), second.clone())),
            _ => Err(invalid_arguments("pair", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "first",
        vec![Kind::Context, Kind::Pair],
        Kind::Any,
        |_, args| match args.as_slice() {
            [Value::Pair(pair)] => Ok(pair.0.clone()),
            _ => Err(invalid_arguments("first", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "second",
        vec![Kind::Context, Kind::Pair],
        Kind::Any,
        |_, args| match args.as_slice() {
            [Value::Pair(pair)] => Ok(pair.1.clone()),
            _ => Err(invalid_arguments("second", &args)),
        },
    ));

    builder.register(HostFunction::new(
        "collection",
        vec![Kind::Context, Kind::variadic(Kind::Pair)],
        Kind::Collection,
        |_, args| {
            let mut collection = ArrayCollection::new();
            for arg in args {
                match arg {
                    Value::Pair(pair) => {
                        let (key, value) = *pair;
                        collection.push(key, value);
                    }
                    arg => return Err(invalid_arguments("collection", &[arg])),
                }
            }
            Ok(Value::collection(collection))
        },
    ));
    builder.register(HostFunction::new(
        "count",
        vec![Kind::Context, Kind::Collection],
        Kind::Int,
        |ctx, args| match args.as_slice() {
            [Value::Collection(collection)] => match collection.count() {
                Some(count) => Ok(Value::Int(count as i64)),
                None => Ok(Value::Int(gather(ctx, collection.as_ref())?.len() as i64)),
            },
            _ => Err(invalid_arguments("count", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "count-values",
        vec![Kind::Context, Kind::Collection],
        Kind::Collection,
        |ctx, args| match args.as_slice() {
            [Value::Collection(collection)] => {
                let mut buckets: Vec<(Value, i64)> = Vec::new();
                // Keyed by variant as well as text so that values of different
                // kinds never share a bucket.
                let mut index: FxHashMap<(Discriminant<Value>, String), usize> =
                    FxHashMap::default();
                for (_, value) in gather(ctx, collection.as_ref())? {
                    let key = (std::mem::discriminant(&value), value.to_string());
                    match index.get(&key) {
                        Some(&i) => buckets[i].1 += 1,
                        None => {
                            index.insert(key, buckets.len());
                            buckets.push((value, 1));
                        }
                    }
                }
                Ok(Value::collection(ArrayCollection::from_pairs(
                    buckets.into_iter().map(|(value, n)| (value, Value::Int(n))),
                )))
            }
            _ => Err(invalid_arguments("count-values", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "map",
        vec![Kind::Context, Kind::Collection, mapper()],
        Kind::Collection,
        |ctx, args| match args.as_slice() {
            [Value::Collection(collection), Value::Callable(function)] => {
                let mut mapped = ArrayCollection::new();
                for (key, value) in gather(ctx, collection.as_ref())? {
                    let result = ctx.call(function, vec![value])?;
                    mapped.push(key, result);
                }
                Ok(Value::collection(mapped))
            }
            _ => Err(invalid_arguments("map", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "map-parallel",
        vec![Kind::Context, Kind::Collection, mapper()],
        Kind::Collection,
        |ctx, args| match args.as_slice() {
            [Value::Collection(collection), Value::Callable(function)] => {
                let (keys, values): (Vec<_>, Vec<_>) =
                    gather(ctx, collection.as_ref())?.into_iter().unzip();
                let results = ctx.map_parallel(values, function)?;
                Ok(Value::collection(ArrayCollection::from_pairs(
                    keys.into_iter().zip(results),
                )))
            }
            _ => Err(invalid_arguments("map-parallel", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "filter",
        vec![Kind::Context, Kind::Collection, predicate()],
        Kind::Collection,
        |ctx, args| match args.as_slice() {
            [Value::Collection(collection), Value::Callable(function)] => {
                let mut kept = ArrayCollection::new();
                for (key, value) in gather(ctx, collection.as_ref())? {
                    if ctx.call(function, vec![value.clone()])?.is_truthy() {
                        kept.push(key, value);
                    }
                }
                Ok(Value::collection(kept))
            }
            _ => Err(invalid_arguments("filter", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "take",
        vec![Kind::Context, Kind::Collection, Kind::Int],
        Kind::Collection,
        |ctx, args| match args.as_slice() {
            [Value::Collection(collection), Value::Int(n)] => {
                let n = usize::try_from(*n).map_err(|_| {
                    RuntimeError::host("take", format!("cannot take {} entries", n))
                })?;
                let mut taken = ArrayCollection::new();
                let mut iter = collection.begin();
                while taken.len() < n && iter.next()? {
                    ctx.check_deadline()?;
                    if let (Some(key), Some(value)) = (iter.key(), iter.value()) {
                        taken.push(key, value);
                    }
                }
                Ok(Value::collection(taken))
            }
            _ => Err(invalid_arguments("take", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "call",
        vec![Kind::Context, Kind::Any, Kind::variadic(Kind::Any)],
        Kind::Any,
        |ctx, mut args| {
            let rest = args.split_off(1.min(args.len()));
            let callable: Callable = match args.pop() {
                Some(Value::Callable(callable)) => callable,
                Some(Value::Query(query)) => query_predicate(query),
                Some(value) => return Err(RuntimeError::NotCallable(value.kind_name())),
                None => return Err(invalid_arguments("call", &[])),
            };
            ctx.call(&callable, rest)
        },
    ));

    builder.register(HostFunction::new(
        "get",
        vec![Kind::Context, Kind::Taggable, Kind::String],
        Kind::Tag,
        |_, args| match args.as_slice() {
            [Value::Feature(feature), Value::String(key)] => Ok(Value::Tag(
                feature
                    .tag(key)
                    .cloned()
                    .unwrap_or_else(|| Tag::new(key.as_str(), "")),
            )),
            _ => Err(invalid_arguments("get", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "tag",
        vec![Kind::Context, Kind::String, Kind::Any],
        Kind::Tag,
        |_, args| match args.as_slice() {
            [Value::String(key), value] => {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Tag(tag) => tag.value.clone(),
                    value => value.to_string(),
                };
                Ok(Value::Tag(Tag::new(key.as_str(), value)))
            }
            _ => Err(invalid_arguments("tag", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "find",
        vec![Kind::Context, Kind::Query],
        Kind::Collection,
        |ctx, args| match args.as_slice() {
            [Value::Query(query)] => Ok(features(ctx.world().find_features(query))),
            _ => Err(invalid_arguments("find", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "find-feature",
        vec![Kind::Context, Kind::FeatureId],
        Kind::Feature,
        |ctx, args| match args.as_slice() {
            [Value::FeatureId(id)] => ctx
                .world()
                .find_feature(id)
                .map(Value::Feature)
                .ok_or_else(|| RuntimeError::host("find-feature", format!("no feature {}", id))),
            _ => Err(invalid_arguments("find-feature", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "all-areas",
        vec![Kind::Context],
        Kind::Collection,
        |ctx, _| Ok(features(ctx.world().all_features(FeatureType::Area))),
    ));
    builder.register(HostFunction::new(
        "area",
        vec![Kind::Context, Kind::Geometry],
        Kind::Float,
        |_, args| match args.as_slice() {
            [Value::Area(polygons)] => Ok(Value::Float(area_m2(polygons))),
            [Value::Feature(feature)] => match &feature.geometry {
                Geometry::Area(polygons) => Ok(Value::Float(area_m2(polygons))),
                _ => Ok(Value::Float(0.0)),
            },
            [_] => Ok(Value::Float(0.0)),
            _ => Err(invalid_arguments("area", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "id",
        vec![Kind::Context, Kind::FeatureId],
        Kind::FeatureId,
        |_, args| match args.as_slice() {
            [id @ Value::FeatureId(_)] => Ok(id.clone()),
            _ => Err(invalid_arguments("id", &args)),
        },
    ));
    builder.register(HostFunction::new(
        "add-tag",
        vec![Kind::Context, Kind::FeatureId, Kind::Tag],
        Kind::Change,
        |_, args| match args.as_slice() {
            [Value::FeatureId(id), Value::Tag(tag)] => Ok(Value::Change(Arc::new(AddTag {
                id: id.clone(),
                tag: tag.clone(),
            }))),
            _ => Err(invalid_arguments("add-tag", &args)),
        },
    ));

    builder.register(HostFunction::new(
        "path",
        vec![Kind::Context, Kind::variadic(Kind::Point)],
        Kind::Path,
        |_, args| {
            args.iter()
                .map(|arg| match arg {
                    Value::Point(point) => Ok(*point),
                    _ => Err(invalid_arguments("path", std::slice::from_ref(arg))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Path)
        },
    ));
    builder.register(HostFunction::new(
        "polygon",
        vec![Kind::Context, Kind::variadic(Kind::Path)],
        Kind::Area,
        |_, args| {
            args.into_iter()
                .map(|arg| match arg {
                    Value::Path(points) => Ok(points),
                    arg => Err(invalid_arguments("polygon", &[arg])),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Area)
        },
    ));
}

fn arithmetic(
    name: &'static str,
    op: fn(Number, Number) -> Option<Number>,
    failure: &'static str,
) -> HostFunction {
    HostFunction::new(
        name,
        vec![Kind::Context, Kind::Number, Kind::Number],
        Kind::Number,
        move |_, args| match (args.first().and_then(Value::as_number), args.get(1).and_then(Value::as_number)) {
            (Some(a), Some(b)) => op(a, b)
                .map(Value::from)
                .ok_or_else(|| RuntimeError::host(name, failure)),
            _ => Err(invalid_arguments(name, &args)),
        },
    )
}

/// Comparisons are false whenever the operands are unordered, which is the
/// case for NaN.
fn comparison(name: &'static str, accept: fn(Ordering) -> bool) -> HostFunction {
    HostFunction::new(
        name,
        vec![Kind::Context, Kind::Any, Kind::Any],
        Kind::Bool,
        move |_, args| match args.as_slice() {
            [a, b] => Ok(Value::Bool(compare(name, a, b)?.is_some_and(accept))),
            _ => Err(invalid_arguments(name, &args)),
        },
    )
}

fn compare(function: &str, a: &Value, b: &Value) -> Result<Option<Ordering>, RuntimeError> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
        _ => match (a.as_number(), b.as_number()) {
            (Some(a), Some(b)) => Ok(a.compare(b)),
            _ => Err(RuntimeError::host(
                function,
                format!("cannot compare `{}` with `{}`", a.kind_name(), b.kind_name()),
            )),
        },
    }
}

/// Collects every entry, polling the deadline between them.
fn gather(ctx: &Context<'_, '_>, collection: &dyn Collection) -> Result<Vec<(Value, Value)>, RuntimeError> {
    let mut iter = collection.begin();
    let mut entries = Vec::with_capacity(collection.count().unwrap_or_default());
    while iter.next()? {
        ctx.check_deadline()?;
        if let (Some(key), Some(value)) = (iter.key(), iter.value()) {
            entries.push((key, value));
        }
    }
    Ok(entries)
}

fn features(features: Vec<Arc<crate::geo::Feature>>) -> Value {
    Value::collection(ArrayCollection::from_pairs(
        features
            .into_iter()
            .map(|feature| (Value::FeatureId(feature.id.clone()), Value::Feature(feature))),
    ))
}

fn invalid_arguments(function: &str, args: &[Value]) -> RuntimeError {
    RuntimeError::host(
        function,
        format!(
            "unexpected arguments ({})",
            args.iter().map(Value::kind_name).collect::<Vec<_>>().join(", ")
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Engine, world::MemoryWorld};
    use rstest::{fixture, rstest};

    #[fixture]
    fn engine() -> Engine {
        Engine::standard().unwrap()
    }

    fn eval(engine: &Engine, text: &str) -> Value {
        engine.evaluate(text, &MemoryWorld::fixture()).unwrap()
    }

    #[rstest]
    #[case::add_ints("add 1 2", Value::Int(3))]
    #[case::add_widens("add 2 3.0", Value::Float(5.0))]
    #[case::subtract("subtract 10 4", Value::Int(6))]
    #[case::multiply("multiply 3 1.5", Value::Float(4.5))]
    #[case::divide_ints("divide 7 2", Value::Float(3.5))]
    #[case::gt("gt 2 1", Value::Bool(true))]
    #[case::gt_equal("gt 2 2", Value::Bool(false))]
    #[case::gte_equal("gte 2 2.0", Value::Bool(true))]
    #[case::lt_strings("lt \"a\" \"b\"", Value::Bool(true))]
    #[case::lte("lte 3 2", Value::Bool(false))]
    #[case::eq_across_number_kinds("eq 1 1.0", Value::Bool(true))]
    #[case::eq_strings("eq \"a\" \"a\"", Value::Bool(true))]
    #[case::not("not false", Value::Bool(true))]
    #[case::first("first (pair 1 2)", Value::Int(1))]
    #[case::second("pair 1 2 | second", Value::Int(2))]
    #[case::count_literal("count {10, 20, 30}", Value::Int(3))]
    #[case::count_empty_collection("count (collection)", Value::Int(0))]
    #[case::take("take {1, 2, 3} 2 | count", Value::Int(2))]
    #[case::take_more_than_available("take {1} 5 | count", Value::Int(1))]
    #[case::call_with_arguments("call add 1 2", Value::Int(3))]
    #[case::tag("tag \"levels\" 4", Value::Tag(Tag::new("levels", "4")))]
    #[case::get("find-feature /a/3 | get \"levels\"", Value::Tag(Tag::new("levels", "12")))]
    #[case::get_missing("find-feature /a/3 | get \"name\"", Value::Tag(Tag::new("name", "")))]
    #[case::find("find [#building] | count", Value::Int(3))]
    #[case::find_tagged("find [#building=yes] | count", Value::Int(2))]
    #[case::all_areas("(all-areas) | count", Value::Int(4))]
    #[case::area_of_point("find-feature /n/10 | area", Value::Float(0.0))]
    #[case::filter_with_query("(all-areas) | filter [#building] | count", Value::Int(3))]
    #[case::filter_with_lambda("{1, 5, 10} | filter {n -> gt n 4} | count", Value::Int(2))]
    fn test_builtins(engine: Engine, #[case] text: &str, #[case] expected: Value) {
        assert_eq!(eval(&engine, text), expected);
    }

    #[rstest]
    #[case::nan_is_unordered(f64::NAN, "gt")]
    #[case::nan_is_not_less(f64::NAN, "lt")]
    fn test_nan_comparisons(#[case] n: f64, #[case] function: &str) {
        let registry = crate::Registry::standard().unwrap();
        let host = registry.get(function).unwrap();
        let world = MemoryWorld::new();
        let deadline = crate::Deadline::never();
        let runtime = crate::Runtime {
            world: &world,
            registry: &registry,
            deadline: &deadline,
            parallelism: 1,
        };
        let mut vm = crate::Vm::new(Default::default(), 8);
        let result = vm.call(
            runtime,
            &Callable::Host(host.clone()),
            vec![Value::Float(n), Value::Float(1.0)],
        );
        assert_eq!(result, Ok(Value::Bool(false)));
    }

    #[rstest]
    #[case::divide_by_zero("divide 1 0", "division by zero")]
    #[case::overflow("add 9223372036854775807 1", "integer overflow")]
    #[case::incomparable("gt \"a\" 1", "cannot compare `String` with `Int`")]
    #[case::negative_take("take {1} -1", "cannot take -1 entries")]
    fn test_host_errors(engine: Engine, #[case] text: &str, #[case] message: &str) {
        let err = engine.evaluate(text, &MemoryWorld::fixture()).unwrap_err();
        assert!(
            err.to_string().contains(message),
            "`{}` does not mention `{}`",
            err,
            message
        );
    }

    #[rstest]
    fn test_map_keeps_keys(engine: Engine) {
        let value = eval(&engine, "{\"a\": 1, \"b\": 2} | map {n -> multiply n 10}");
        assert_eq!(value.to_string(), "{\"a\": 10, \"b\": 20}");
    }

    #[rstest]
    fn test_count_values(engine: Engine) {
        let value = eval(&engine, "{1, 2, 1, 1} | count-values");
        assert_eq!(
            value,
            Value::collection(ArrayCollection::from_pairs(vec![
                (Value::Int(1), Value::Int(3)),
                (Value::Int(2), Value::Int(1)),
            ]))
        );
    }

    #[rstest]
    fn test_count_values_separates_kinds(engine: Engine) {
        let value = eval(&engine, "{\"1\", 1, 1, 1.0} | count-values");
        assert_eq!(
            value,
            Value::collection(ArrayCollection::from_pairs(vec![
                (Value::String("1".to_string()), Value::Int(1)),
                (Value::Int(1), Value::Int(2)),
                (Value::Float(1.0), Value::Int(1)),
            ]))
        );
    }

    #[rstest]
    fn test_path_and_polygon(engine: Engine) {
        let value = eval(&engine, "polygon (path 0.0,0.0 0.0,1.0 1.0,1.0)");
        assert!(matches!(value, Value::Area(rings) if rings.len() == 1 && rings[0].len() == 3));
    }

    #[rstest]
    fn test_add_tag_produces_a_change(engine: Engine) {
        let value = eval(&engine, "find-feature /a/4 | add-tag (tag \"access\" \"public\")");
        assert!(matches!(value, Value::Change(_)));
    }
}
