use std::{sync::Arc, time::Duration};

use crate::{
    ast::Node,
    compiler::{self, CompileError},
    context::{Deadline, Runtime},
    error::{self, InnerError},
    geo::FeatureId,
    parse,
    registry::Registry,
    simplifier,
    value::{Value, collection},
    vm::{DEFAULT_MAX_CALL_DEPTH, Vm, error::RuntimeError, instruction::Program},
    world::{Change, ChangeSet, MutableWorld, SharedWorld, World},
};

#[derive(Debug, Clone)]
pub struct Options {
    /// Run the simplifier between parsing and compiling.
    pub simplify: bool,
    /// Number of chunks, and so forked VMs, `map-parallel` splits work into.
    pub parallelism: usize,
    pub max_call_depth: usize,
    /// Wall-clock budget for one evaluation.
    pub timeout: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            simplify: true,
            parallelism: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            timeout: None,
        }
    }
}

/// The result of [`Engine::evaluate_and_apply`].
#[derive(Debug)]
pub struct Applied {
    pub value: Value,
    /// Features the applied change modified; empty when the expression did
    /// not produce a change.
    pub modified: Vec<FeatureId>,
}

#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    options: Options,
}

impl Engine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            options: Options::default(),
        }
    }

    /// An engine over the bundled host library.
    #[allow(clippy::result_large_err)]
    pub fn standard() -> Result<Self, error::Error> {
        Registry::standard()
            .map(|registry| Self::new(Arc::new(registry)))
            .map_err(|e| error::Error::from_error("", InnerError::Registry(e)))
    }

    pub fn set_simplify(&mut self, simplify: bool) {
        self.options.simplify = simplify;
    }

    pub fn set_parallelism(&mut self, parallelism: usize) {
        self.options.parallelism = parallelism.max(1);
    }

    pub fn set_max_call_depth(&mut self, max_call_depth: usize) {
        self.options.max_call_depth = max_call_depth;
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.options.timeout = timeout;
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[allow(clippy::result_large_err)]
    pub fn parse(&self, code: &str) -> Result<Node, error::Error> {
        parse(code)
    }

    pub fn simplify(&self, node: &Node) -> Node {
        simplifier::simplify(node, &|name: &str| self.registry.arity(name))
    }

    pub fn compile(&self, node: &Node) -> Result<Program, CompileError> {
        compiler::compile(node, &self.registry)
    }

    /// A fresh deadline for one evaluation under the configured timeout.
    pub fn deadline(&self) -> Deadline {
        self.options
            .timeout
            .map(Deadline::after)
            .unwrap_or_default()
    }

    #[allow(clippy::result_large_err)]
    pub fn evaluate(&self, code: &str, world: &dyn World) -> Result<Value, error::Error> {
        self.evaluate_with_deadline(code, world, &self.deadline())
    }

    /// Evaluates under a caller-supplied deadline, which the caller may also
    /// cancel from another thread.
    #[allow(clippy::result_large_err)]
    pub fn evaluate_with_deadline(
        &self,
        code: &str,
        world: &dyn World,
        deadline: &Deadline,
    ) -> Result<Value, error::Error> {
        let node = self.parse(code)?;
        self.run(code, &node, world, deadline)
    }

    /// Evaluates an expression that was built or deserialized rather than
    /// parsed. Errors quote the expression's canonical text; ranges the node
    /// carries refer to some other text, so they are not used to locate them.
    #[allow(clippy::result_large_err)]
    pub fn evaluate_node(&self, node: &Node, world: &dyn World) -> Result<Value, error::Error> {
        self.run(&node.to_code(), &node.without_ranges(), world, &self.deadline())
    }

    /// Evaluates `code` under an upgradable read lock and, when it produces
    /// a change (or a collection of changes), applies it before releasing
    /// the lock.
    #[allow(clippy::result_large_err)]
    pub fn evaluate_and_apply<W: MutableWorld>(
        &self,
        code: &str,
        world: &SharedWorld<W>,
    ) -> Result<Applied, error::Error> {
        let guard = world.upgradable_read();
        let value = self.evaluate(code, &*guard)?;

        let change = change_of(&value)
            .map_err(|e| error::Error::from_error(code, InnerError::Runtime(e)))?;
        let Some(change) = change else {
            return Ok(Applied {
                value,
                modified: Vec::new(),
            });
        };

        let (_guard, result) = SharedWorld::apply(guard, change.as_ref());
        let modified =
            result.map_err(|e| error::Error::from_error(code, InnerError::Apply(e)))?;
        tracing::debug!(modified = modified.len(), "applied change");

        Ok(Applied { value, modified })
    }

    #[allow(clippy::result_large_err)]
    fn run(
        &self,
        code: &str,
        node: &Node,
        world: &dyn World,
        deadline: &Deadline,
    ) -> Result<Value, error::Error> {
        let node = if self.options.simplify {
            self.simplify(node)
        } else {
            node.clone()
        };

        let program = self
            .compile(&node)
            .map_err(|e| error::Error::from_error(code, InnerError::Compile(e)))?;

        let runtime = Runtime {
            world,
            registry: &self.registry,
            deadline,
            parallelism: self.options.parallelism,
        };
        let mut vm = Vm::new(Arc::new(program), self.options.max_call_depth);
        vm.run(runtime).map_err(|e| {
            error::Error::from_error(code, InnerError::Runtime(e)).with_range(vm.error_range())
        })
    }
}

/// The change a value stands for: a single change, or a non-empty collection
/// made only of changes.
fn change_of(value: &Value) -> Result<Option<Arc<dyn Change>>, RuntimeError> {
    match value {
        Value::Change(change) => Ok(Some(Arc::clone(change))),
        Value::Collection(c) => {
            let values = collection::values(c.as_ref())?;
            let changes = values
                .into_iter()
                .map(|value| match value {
                    Value::Change(change) => Some(change),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>();

            Ok(changes
                .filter(|changes| !changes.is_empty())
                .map(|changes| Arc::new(ChangeSet(changes)) as Arc<dyn Change>))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::Literal,
        geo::Tag,
        world::{MemoryWorld, World},
    };
    use rstest::{fixture, rstest};

    #[fixture]
    fn engine() -> Engine {
        Engine::standard().unwrap()
    }

    #[rstest]
    fn test_options_default(engine: Engine) {
        assert!(engine.options().simplify);
        assert!(engine.options().parallelism >= 1);
        assert_eq!(engine.options().max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(engine.options().timeout, None);
    }

    #[rstest]
    fn test_evaluate_against_empty_world(engine: Engine) {
        assert_eq!(engine.evaluate("add 1 2", &MemoryWorld::new()), Ok(Value::Int(3)));
    }

    #[rstest]
    fn test_evaluate_without_simplifying(mut engine: Engine) {
        engine.set_simplify(false);
        let value = engine.evaluate("(all-areas) | map {f -> area f} | count", &MemoryWorld::fixture());
        assert_eq!(value, Ok(Value::Int(4)));
    }

    #[rstest]
    fn test_evaluate_node(engine: Engine) {
        let node = Node::call(
            Node::symbol("add"),
            vec![Node::from(Literal::Int(40)), Node::from(Literal::Int(2))],
        );
        assert_eq!(engine.evaluate_node(&node, &MemoryWorld::new()), Ok(Value::Int(42)));
    }

    #[rstest]
    fn test_evaluate_node_ignores_foreign_ranges(engine: Engine) {
        // Ranges from text longer than the node's canonical form.
        let node = crate::parse("add   1   (find-feature   /a/99)").unwrap();
        let err = engine.evaluate_node(&node, &MemoryWorld::fixture()).unwrap_err();

        assert_eq!(err.source_code, "add 1 (find-feature /a/99)");
        assert!(matches!(err.cause, InnerError::Runtime(_)));
        assert_eq!(err.location, miette::SourceSpan::new(0.into(), 1));
    }

    #[rstest]
    fn test_too_many_arguments(engine: Engine) {
        let code = format!("count {{{}}}", vec!["1"; usize::from(u16::MAX) + 1].join(", "));
        let err = engine.evaluate(&code, &MemoryWorld::new()).unwrap_err();
        assert!(matches!(
            err.cause,
            InnerError::Compile(CompileError::TooManyArguments { count: 65536, .. })
        ));
    }

    #[rstest]
    fn test_runtime_error_is_located(engine: Engine) {
        let err = engine
            .evaluate("add 1 (find-feature /a/99)", &MemoryWorld::fixture())
            .unwrap_err();
        assert!(matches!(err.cause, InnerError::Runtime(_)));
        assert_eq!(err.location, miette::SourceSpan::new(7.into(), 18));
    }

    #[rstest]
    fn test_compile_error(engine: Engine) {
        let err = engine.evaluate("count nowhere", &MemoryWorld::new()).unwrap_err();
        assert!(matches!(err.cause, InnerError::Compile(CompileError::UndefinedSymbol { .. })));
        assert_eq!(err.location, miette::SourceSpan::new(6.into(), 7));
    }

    #[rstest]
    fn test_cancelled_deadline(engine: Engine) {
        let deadline = Deadline::never();
        deadline.cancel();
        let err = engine
            .evaluate_with_deadline("add 1 2", &MemoryWorld::new(), &deadline)
            .unwrap_err();
        assert!(err.is_deadline_exceeded());
    }

    #[rstest]
    fn test_recursion_limit(mut engine: Engine) {
        engine.set_max_call_depth(2);
        let err = engine
            .evaluate("call {-> call {-> call {-> 1}}}", &MemoryWorld::new())
            .unwrap_err();
        assert_eq!(
            err.cause,
            InnerError::Runtime(RuntimeError::RecursionLimit(2))
        );
    }

    #[rstest]
    fn test_evaluate_and_apply(engine: Engine) {
        let world = SharedWorld::new(MemoryWorld::fixture());
        let applied = engine
            .evaluate_and_apply("find-feature /a/4 | add-tag (tag \"#access\" \"public\")", &world)
            .unwrap();

        let id = FeatureId::area("openstreetmap.org/way", 4);
        assert_eq!(applied.modified, vec![id.clone()]);
        let feature = world.read().find_feature(&id).unwrap();
        assert_eq!(feature.tag("access"), Some(&Tag::new("access", "public")));
    }

    #[rstest]
    fn test_evaluate_and_apply_collection_of_changes(engine: Engine) {
        let world = SharedWorld::new(MemoryWorld::fixture());
        let applied = engine
            .evaluate_and_apply(
                "find [#building] | map {b -> add-tag b (tag \"roof\" \"flat\")}",
                &world,
            )
            .unwrap();

        assert_eq!(applied.modified.len(), 3);
        assert_eq!(world.read().find_features(&crate::geo::Query::Keyed("#roof".into())).len(), 3);
    }

    #[rstest]
    fn test_evaluate_and_apply_without_change(engine: Engine) {
        let world = SharedWorld::new(MemoryWorld::fixture());
        let applied = engine.evaluate_and_apply("count (all-areas)", &world).unwrap();
        assert_eq!(applied.value, Value::Int(4));
        assert!(applied.modified.is_empty());
    }
}
