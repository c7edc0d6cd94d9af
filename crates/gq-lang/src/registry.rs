//! The host functions and function adapters an engine can use.
//!
//! A registry is built once, validated as a whole, and then shared read-only
//! by the compiler and every VM.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use thiserror::Error;

use crate::{
    builtin,
    convert::{Adapter, Kind, Signature},
    value::HostFunction,
};

/// Most arguments a host function may declare, excluding the context.
pub const MAX_ARGS: usize = 32;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("`{0}` must take the context as its first parameter")]
    MissingContext(SmolStr),
    #[error("`{0}` takes the context somewhere other than its first parameter")]
    MisplacedContext(SmolStr),
    #[error("`{name}` declares {count} arguments, at most {max} are supported", max = MAX_ARGS)]
    TooManyArguments { name: SmolStr, count: usize },
    #[error("`{0}` declares a variadic parameter before its last one")]
    MisplacedVariadic(SmolStr),
    #[error("`{function}` uses functions of shape `{signature}` but no adapter is registered for it")]
    MissingAdapter { function: SmolStr, signature: Signature },
    #[error("`{0}` is registered more than once")]
    DuplicateFunction(SmolStr),
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    functions: Vec<HostFunction>,
    adapters: Vec<Arc<Signature>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder already holding the bundled library, for hosts that add
    /// their own functions on top.
    pub fn with_standard_library() -> Self {
        let mut builder = Self::new();
        builtin::register(&mut builder);
        builder
    }

    pub fn register(&mut self, function: HostFunction) -> &mut Self {
        self.functions.push(function);
        self
    }

    /// Registers an adapter for functions of exactly this shape.
    pub fn register_adapter(&mut self, params: Vec<Kind>, result: Kind) -> &mut Self {
        self.adapters.push(Arc::new(Signature::new(params, result)));
        self
    }

    /// Validates every registered function and builds the registry.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let adapters = self
            .adapters
            .into_iter()
            .map(|signature| (Arc::clone(&signature), Adapter::new(signature)))
            .collect::<FxHashMap<_, _>>();

        let mut names = FxHashSet::default();
        for function in &self.functions {
            if !names.insert(function.name.clone()) {
                return Err(RegistryError::DuplicateFunction(function.name.clone()));
            }
            validate(function, &adapters)?;
        }

        let functions = self
            .functions
            .into_iter()
            .map(|function| (function.name.clone(), function))
            .collect::<FxHashMap<_, _>>();

        tracing::debug!(
            functions = functions.len(),
            adapters = adapters.len(),
            "built registry"
        );

        Ok(Registry {
            functions,
            adapters,
        })
    }
}

fn validate(
    function: &HostFunction,
    adapters: &FxHashMap<Arc<Signature>, Adapter>,
) -> Result<(), RegistryError> {
    let name = &function.name;

    if !matches!(function.params.first(), Some(Kind::Context)) {
        return Err(RegistryError::MissingContext(name.clone()));
    }

    let args = function.arg_kinds();
    if args.len() > MAX_ARGS {
        return Err(RegistryError::TooManyArguments {
            name: name.clone(),
            count: args.len(),
        });
    }

    for (i, kind) in args.iter().enumerate() {
        match kind {
            Kind::Context => return Err(RegistryError::MisplacedContext(name.clone())),
            Kind::Variadic(_) if i + 1 != args.len() => {
                return Err(RegistryError::MisplacedVariadic(name.clone()));
            }
            _ => {}
        }
    }

    let mut missing = None;
    for kind in args.iter().chain(std::iter::once(&function.result)) {
        kind.visit_signatures(&mut |signature| {
            if missing.is_none() && !adapters.contains_key(signature.as_ref()) {
                missing = Some(signature.as_ref().clone());
            }
        });
    }

    match missing {
        Some(signature) => Err(RegistryError::MissingAdapter {
            function: name.clone(),
            signature,
        }),
        None => Ok(()),
    }
}

/// Host functions by name, and adapters by signature.
#[derive(Debug, Clone)]
pub struct Registry {
    functions: FxHashMap<SmolStr, HostFunction>,
    adapters: FxHashMap<Arc<Signature>, Adapter>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The bundled library of host functions.
    pub fn standard() -> Result<Registry, RegistryError> {
        RegistryBuilder::with_standard_library().build()
    }

    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    /// Fewest arguments that run a host function rather than partially
    /// applying it.
    pub fn arity(&self, name: &str) -> Option<usize> {
        self.functions.get(name).map(HostFunction::required_args)
    }

    pub fn adapter(&self, signature: &Signature) -> Option<&Adapter> {
        self.adapters.get(signature)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Function names in alphabetical order.
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.functions.keys().map(SmolStr::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use rstest::rstest;

    fn function(name: &str, params: Vec<Kind>) -> HostFunction {
        HostFunction::new(name, params, Kind::Any, |_, _| Ok(Value::Bool(true)))
    }

    #[rstest]
    #[case::missing_context(
        function("f", vec![Kind::Int]),
        RegistryError::MissingContext("f".into())
    )]
    #[case::no_parameters(function("f", vec![]), RegistryError::MissingContext("f".into()))]
    #[case::misplaced_context(
        function("f", vec![Kind::Context, Kind::Int, Kind::Context]),
        RegistryError::MisplacedContext("f".into())
    )]
    #[case::too_many_arguments(
        function("f", std::iter::once(Kind::Context).chain(std::iter::repeat_n(Kind::Int, MAX_ARGS + 1)).collect()),
        RegistryError::TooManyArguments { name: "f".into(), count: MAX_ARGS + 1 }
    )]
    #[case::misplaced_variadic(
        function("f", vec![Kind::Context, Kind::variadic(Kind::Int), Kind::Int]),
        RegistryError::MisplacedVariadic("f".into())
    )]
    #[case::missing_adapter(
        function("f", vec![Kind::Context, Kind::function(vec![Kind::Int], Kind::Int)]),
        RegistryError::MissingAdapter {
            function: "f".into(),
            signature: Signature::new(vec![Kind::Int], Kind::Int),
        }
    )]
    #[case::missing_nested_adapter(
        function("f", vec![Kind::Context, Kind::variadic(Kind::function(vec![], Kind::Bool))]),
        RegistryError::MissingAdapter {
            function: "f".into(),
            signature: Signature::new(vec![], Kind::Bool),
        }
    )]
    fn test_validation_errors(#[case] function: HostFunction, #[case] expected: RegistryError) {
        let mut builder = Registry::builder();
        builder.register(function);
        assert_eq!(builder.build().unwrap_err(), expected);
    }

    #[test]
    fn test_adapter_satisfies_function_parameter() {
        let mut builder = Registry::builder();
        builder
            .register_adapter(vec![Kind::Int], Kind::Int)
            .register(function(
                "f",
                vec![Kind::Context, Kind::function(vec![Kind::Int], Kind::Int)],
            ));
        let registry = builder.build().unwrap();
        assert!(
            registry
                .adapter(&Signature::new(vec![Kind::Int], Kind::Int))
                .is_some()
        );
        assert_eq!(registry.arity("f"), Some(1));
    }

    #[test]
    fn test_duplicate_function() {
        let mut builder = Registry::builder();
        builder
            .register(function("f", vec![Kind::Context]))
            .register(function("f", vec![Kind::Context, Kind::Int]));
        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::DuplicateFunction("f".into())
        );
    }

    #[test]
    fn test_standard_library_is_valid() {
        let registry = Registry::standard().unwrap();
        assert_eq!(registry.arity("add"), Some(2));
        assert_eq!(registry.arity("all-areas"), Some(0));
        assert_eq!(registry.arity("nope"), None);
        assert!(registry.names().contains(&"map-parallel"));
    }
}
