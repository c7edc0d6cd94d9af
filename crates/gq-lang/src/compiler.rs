//! Compiles an expression tree into a flat [`Program`].
//!
//! The root expression and every lambda become separate targets. Each target
//! starts by storing its arguments into slots, evaluates its body and
//! returns. Parameters are resolved to slots here; names never reach the VM.

pub mod error;
pub mod frame;

use std::collections::VecDeque;

pub use error::CompileError;
use frame::{Frame, FrameId};

use crate::{
    arena::Arena,
    ast::{Expr, Node},
    range::Range,
    registry::Registry,
    value::{Callable, HostFunction, LambdaClosure, Value},
    vm::{
        MAX_SLOTS,
        instruction::{Instruction, Program},
    },
};

/// Compiles `node` against the functions in `registry`.
pub fn compile(node: &Node, registry: &Registry) -> Result<Program, CompileError> {
    Compiler::new(registry).compile(node)
}

struct Target<'n> {
    body: &'n Node,
    frame: FrameId,
    /// Index of the instruction that must learn this target's entry.
    fixup: usize,
}

pub struct Compiler<'a> {
    registry: &'a Registry,
    frames: Arena<Frame>,
    instructions: Vec<Instruction>,
    ranges: Vec<Option<Range>>,
    slot_count: usize,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Compiler {
            registry,
            frames: Arena::new(16),
            instructions: Vec::with_capacity(64),
            ranges: Vec::with_capacity(64),
            slot_count: 0,
        }
    }

    pub fn compile(mut self, node: &Node) -> Result<Program, CompileError> {
        let root = self.frames.alloc(Frame::root());
        let jump = self.emit(Instruction::Jump(0), node.range);

        let mut pending = VecDeque::from([Target {
            body: node,
            frame: root,
            fixup: jump,
        }]);
        let mut entries = Vec::new();

        while let Some(target) = pending.pop_front() {
            let entry = self.instructions.len() as u32;
            entries.push(entry);
            self.patch(target.fixup, entry);

            let frame = &self.frames[target.frame];
            let base = frame.base;
            let end = u16::try_from(frame.end()).map_err(|_| CompileError::TooManySlots {
                count: frame.end(),
                range: target.body.range,
            })?;
            for slot in (base..end).rev() {
                self.emit(Instruction::Store(slot), target.body.range);
            }

            self.compile_node(target.body, target.frame, &mut pending)?;
            self.emit(Instruction::Return, target.body.range);
        }

        tracing::debug!(
            instructions = self.instructions.len(),
            targets = entries.len(),
            slots = self.slot_count,
            "compiled program"
        );

        Ok(Program {
            instructions: self.instructions,
            ranges: self.ranges,
            entries,
            slot_count: self.slot_count as u16,
        })
    }

    fn compile_node<'n>(
        &mut self,
        node: &'n Node,
        frame: FrameId,
        pending: &mut VecDeque<Target<'n>>,
    ) -> Result<(), CompileError> {
        match &node.expr {
            Expr::Literal(literal) => {
                self.emit(Instruction::PushValue(Value::from_literal(literal)), node.range);
            }
            Expr::Symbol(name) => {
                let instruction = match self.resolve(name, frame) {
                    Some(slot) => Instruction::Load(slot),
                    None => match self.registry.get(name) {
                        Some(function) => {
                            Instruction::PushValue(Value::Callable(Callable::Host(function.clone())))
                        }
                        None => {
                            return Err(CompileError::UndefinedSymbol {
                                name: name.clone(),
                                range: node.range,
                            });
                        }
                    },
                };
                self.emit(instruction, node.range);
            }
            Expr::Lambda { params, body } => {
                let base = self.frames[frame].end();
                let end = base + params.len();
                let too_many_slots = || CompileError::TooManySlots {
                    count: end,
                    range: node.range,
                };
                if end > MAX_SLOTS {
                    return Err(too_many_slots());
                }
                self.slot_count = self.slot_count.max(end);

                let lambda = self.frames.alloc(Frame {
                    parent: Some(frame),
                    params: params.clone(),
                    base: u16::try_from(base).map_err(|_| too_many_slots())?,
                });
                let fixup = self.emit(
                    Instruction::PushValue(Value::Callable(Callable::Lambda(LambdaClosure {
                        entry: 0,
                        arity: u16::try_from(params.len()).map_err(|_| too_many_slots())?,
                        captured: None,
                    }))),
                    node.range,
                );
                pending.push_back(Target {
                    body: body.as_ref(),
                    frame: lambda,
                    fixup,
                });
            }
            Expr::Call { function, args, .. } => {
                let count = u16::try_from(args.len()).map_err(|_| CompileError::TooManyArguments {
                    count: args.len(),
                    range: node.range,
                })?;

                match self.registry_function(function, frame) {
                    Some(host) => {
                        if !host.is_variadic() && args.len() > host.arity() {
                            return Err(CompileError::Arity {
                                name: host.name.clone(),
                                expected: host.arity(),
                                found: args.len(),
                                range: node.range,
                            });
                        }
                        for arg in args {
                            self.compile_node(arg, frame, pending)?;
                        }
                        self.emit(
                            Instruction::CallValue {
                                callable: Callable::Host(host.clone()),
                                args: count,
                            },
                            node.range,
                        );
                    }
                    None => {
                        for arg in args {
                            self.compile_node(arg, frame, pending)?;
                        }
                        self.compile_node(function, frame, pending)?;
                        self.emit(Instruction::CallStack { args: count }, node.range);
                    }
                }
            }
        }

        Ok(())
    }

    /// The host function a callee names, unless a parameter shadows it.
    fn registry_function(&self, function: &Node, frame: FrameId) -> Option<&'a HostFunction> {
        let name = function.as_symbol()?;
        if self.resolve(name, frame).is_some() {
            return None;
        }
        self.registry.get(name)
    }

    fn resolve(&self, name: &str, frame: FrameId) -> Option<u16> {
        self.frames
            .ancestors(frame, |frame| frame.parent)
            .find_map(|(_, frame)| frame.slot_of(name))
    }

    fn emit(&mut self, instruction: Instruction, range: Option<Range>) -> usize {
        self.instructions.push(instruction);
        self.ranges.push(range);
        self.instructions.len() - 1
    }

    fn patch(&mut self, index: usize, entry: u32) {
        match &mut self.instructions[index] {
            Instruction::Jump(target) => *target = entry,
            Instruction::PushValue(Value::Callable(Callable::Lambda(closure))) => closure.entry = entry,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Literal, Node};
    use rstest::{fixture, rstest};

    #[fixture]
    fn registry() -> Registry {
        Registry::standard().unwrap()
    }

    fn compile_text(text: &str, registry: &Registry) -> Result<Program, CompileError> {
        compile(&crate::parse(text).unwrap(), registry)
    }

    fn host(registry: &Registry, name: &str) -> Callable {
        Callable::Host(registry.get(name).unwrap().clone())
    }

    fn lambda(entry: u32, arity: u16) -> Value {
        Value::Callable(Callable::Lambda(LambdaClosure {
            entry,
            arity,
            captured: None,
        }))
    }

    #[rstest]
    fn test_literal(registry: Registry) {
        let program = compile_text("42", &registry).unwrap();
        assert_eq!(
            program.instructions,
            vec![
                Instruction::Jump(1),
                Instruction::PushValue(Value::Int(42)),
                Instruction::Return,
            ]
        );
        assert_eq!(program.entries, vec![1]);
        assert_eq!(program.slot_count, 0);
    }

    #[rstest]
    fn test_registry_call(registry: Registry) {
        let program = compile_text("add 1 2", &registry).unwrap();
        assert_eq!(
            program.instructions,
            vec![
                Instruction::Jump(1),
                Instruction::PushValue(Value::Int(1)),
                Instruction::PushValue(Value::Int(2)),
                Instruction::CallValue {
                    callable: host(&registry, "add"),
                    args: 2
                },
                Instruction::Return,
            ]
        );
    }

    #[rstest]
    fn test_lambda_targets(registry: Registry) {
        let program = compile_text("call {x -> add x 1} 41", &registry).unwrap();
        assert_eq!(
            program.instructions,
            vec![
                Instruction::Jump(1),
                Instruction::PushValue(lambda(5, 1)),
                Instruction::PushValue(Value::Int(41)),
                Instruction::CallValue {
                    callable: host(&registry, "call"),
                    args: 2
                },
                Instruction::Return,
                Instruction::Store(0),
                Instruction::Load(0),
                Instruction::PushValue(Value::Int(1)),
                Instruction::CallValue {
                    callable: host(&registry, "add"),
                    args: 2
                },
                Instruction::Return,
            ]
        );
        assert_eq!(program.entries, vec![1, 5]);
        assert_eq!(program.slot_count, 1);
    }

    #[rstest]
    fn test_parameters_stored_highest_slot_first(registry: Registry) {
        let program = compile_text("{a, b -> a}", &registry).unwrap();
        assert_eq!(
            program.instructions[3..],
            [
                Instruction::Store(1),
                Instruction::Store(0),
                Instruction::Load(0),
                Instruction::Return,
            ]
        );
    }

    #[rstest]
    fn test_nested_lambdas_use_consecutive_slots(registry: Registry) {
        let program = compile_text("{a -> {b -> add a b}}", &registry).unwrap();
        assert_eq!(program.slot_count, 2);
        assert!(program.instructions.contains(&Instruction::Store(1)));
        assert!(program.instructions.contains(&Instruction::Load(0)));
        assert!(program.instructions.contains(&Instruction::Load(1)));
    }

    #[rstest]
    fn test_parameter_callee_uses_call_stack(registry: Registry) {
        let program = compile_text("{f -> f 1}", &registry).unwrap();
        assert_eq!(
            program.instructions[3..],
            [
                Instruction::Store(0),
                Instruction::PushValue(Value::Int(1)),
                Instruction::Load(0),
                Instruction::CallStack { args: 1 },
                Instruction::Return,
            ]
        );
    }

    #[rstest]
    fn test_parameter_shadows_registry(registry: Registry) {
        let program = compile_text("{add -> add 1}", &registry).unwrap();
        assert!(program.instructions.contains(&Instruction::CallStack { args: 1 }));
    }

    #[rstest]
    fn test_symbol_value_pushes_host_function(registry: Registry) {
        let program = compile_text("map area", &registry).unwrap();
        assert_eq!(
            program.instructions[1],
            Instruction::PushValue(Value::Callable(host(&registry, "area")))
        );
    }

    #[rstest]
    #[case::undefined("frobnicate 1", CompileError::UndefinedSymbol { name: "frobnicate".into(), range: Some(Range::new(0, 10)) })]
    #[case::undefined_argument("add x 1", CompileError::UndefinedSymbol { name: "x".into(), range: Some(Range::new(4, 5)) })]
    #[case::too_many_arguments(
        "add 1 2 3",
        CompileError::Arity { name: "add".into(), expected: 2, found: 3, range: Some(Range::new(0, 9)) }
    )]
    fn test_errors(registry: Registry, #[case] text: &str, #[case] expected: CompileError) {
        assert_eq!(compile_text(text, &registry), Err(expected));
    }

    #[rstest]
    fn test_too_many_slots(registry: Registry) {
        let params = (0..=MAX_SLOTS).map(|i| format!("p{}", i)).collect::<Vec<_>>();
        let node = Node::lambda(params.iter().map(String::as_str), Node::symbol("p0"));
        assert!(matches!(
            compile(&node, &registry),
            Err(CompileError::TooManySlots { count, .. }) if count == MAX_SLOTS + 1
        ));
    }

    #[rstest]
    fn test_too_many_arguments(registry: Registry) {
        let args = std::iter::repeat_n(Node::literal(Literal::Int(1)), usize::from(u16::MAX) + 1).collect::<Vec<_>>();
        let node = Node::call(Node::symbol("collection"), args);
        assert!(matches!(
            compile(&node, &registry),
            Err(CompileError::TooManyArguments { count, .. }) if count == usize::from(u16::MAX) + 1
        ));
    }

    #[rstest]
    fn test_largest_argument_count(registry: Registry) {
        let args = std::iter::repeat_n(Node::literal(Literal::Int(1)), usize::from(u16::MAX)).collect::<Vec<_>>();
        let program = compile(&Node::call(Node::symbol("collection"), args), &registry).unwrap();
        assert!(matches!(
            program.instructions.iter().rev().nth(1),
            Some(Instruction::CallValue { args: u16::MAX, .. })
        ));
    }

    #[rstest]
    fn test_variadic_accepts_any_count(registry: Registry) {
        assert!(compile_text("collection (pair 0 1) (pair 1 2) (pair 2 3)", &registry).is_ok());
    }

    #[rstest]
    fn test_ranges_parallel_instructions(registry: Registry) {
        let program = compile_text("count (all-areas)", &registry).unwrap();
        assert_eq!(program.ranges.len(), program.instructions.len());
        assert!(program.ranges.iter().all(Option::is_some));
    }
}
