pub mod error;
pub mod instruction;

use std::sync::Arc;

use error::RuntimeError;
use instruction::{Instruction, Program};

use crate::{
    context::{Context, Runtime},
    convert::{self, Kind, query_predicate},
    range::Range,
    value::{Callable, HostFunction, LambdaClosure, PartialApplication, Slots, Value},
};

/// Slots available to one program: the parameters of every lambda on the
/// longest chain of nested lambdas.
pub const MAX_SLOTS: usize = 32;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// A stack machine executing one [`Program`].
///
/// A VM is created per evaluation. [`Vm::fork`] copies the stack and slots
/// and shares only the immutable program, so forks can run on other threads.
#[derive(Debug, Clone)]
pub struct Vm {
    program: Arc<Program>,
    pc: usize,
    slots: Vec<Option<Value>>,
    stack: Vec<Value>,
    depth: usize,
    max_depth: usize,
    error_pc: Option<usize>,
}

impl Vm {
    pub fn new(program: Arc<Program>, max_depth: usize) -> Self {
        let slots = vec![None; program.slot_count as usize];
        Vm {
            program,
            pc: 0,
            slots,
            stack: Vec::with_capacity(32),
            depth: 0,
            max_depth,
            error_pc: None,
        }
    }

    pub fn fork(&self) -> Vm {
        self.clone()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Source range of the innermost instruction that failed, if any.
    pub fn error_range(&self) -> Option<Range> {
        self.error_pc.and_then(|pc| self.program.range_at(pc))
    }

    /// Runs the program from its first instruction and returns the value
    /// left by the root target.
    pub fn run(&mut self, runtime: Runtime<'_>) -> Result<Value, RuntimeError> {
        self.pc = 0;
        self.error_pc = None;
        self.stack.clear();
        self.execute(runtime)?;
        self.pop()
    }

    /// Calls `callable` with `args`.
    ///
    /// Too few arguments produce a partial application holding a snapshot of
    /// the current slots. Too many are an error unless the callable is
    /// variadic. Nothing is pushed when a call fails.
    pub fn call(
        &mut self,
        runtime: Runtime<'_>,
        callable: &Callable,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        runtime.deadline.check()?;

        if args.len() < callable.required_args() {
            return Ok(Value::Callable(Callable::partial(
                callable.clone(),
                args,
                self.snapshot(),
            )));
        }

        if !callable.is_variadic() && args.len() > callable.num_args() {
            return Err(RuntimeError::Arity {
                name: callable.name(),
                expected: callable.num_args(),
                found: args.len(),
            });
        }

        match callable {
            Callable::Host(function) => self.call_host(runtime, function, args),
            Callable::Lambda(closure) => self.call_lambda(runtime, closure, args),
            Callable::Partial(partial) => self.call_partial(runtime, partial, args),
        }
    }

    fn execute(&mut self, runtime: Runtime<'_>) -> Result<(), RuntimeError> {
        let program = Arc::clone(&self.program);

        loop {
            let pc = self.pc;
            let instruction = program
                .instructions
                .get(pc)
                .ok_or(RuntimeError::InvalidProgramCounter(pc))?;
            self.pc += 1;

            let result = match instruction {
                Instruction::PushValue(value) => {
                    let value = self.capture(value);
                    self.stack.push(value);
                    Ok(())
                }
                Instruction::Store(slot) => self.pop().and_then(|value| {
                    let target = self
                        .slots
                        .get_mut(*slot as usize)
                        .ok_or(RuntimeError::UnboundSlot(*slot))?;
                    *target = Some(value);
                    Ok(())
                }),
                Instruction::Load(slot) => self
                    .slots
                    .get(*slot as usize)
                    .cloned()
                    .flatten()
                    .ok_or(RuntimeError::UnboundSlot(*slot))
                    .map(|value| self.stack.push(value)),
                Instruction::Jump(target) => {
                    self.pc = *target as usize;
                    Ok(())
                }
                Instruction::CallValue { callable, args } => self
                    .pop_args(*args)
                    .and_then(|args| self.call(runtime, callable, args))
                    .map(|value| self.stack.push(value)),
                Instruction::CallStack { args } => self
                    .pop()
                    .and_then(|callee| {
                        let args = self.pop_args(*args)?;
                        let callable = callable_of(callee)?;
                        self.call(runtime, &callable, args)
                    })
                    .map(|value| self.stack.push(value)),
                Instruction::Return => return Ok(()),
            };

            if let Err(err) = result {
                self.error_pc.get_or_insert(pc);
                return Err(err);
            }
        }
    }

    /// A lambda value captures the slots live where it is pushed.
    fn capture(&self, value: &Value) -> Value {
        match value {
            Value::Callable(Callable::Lambda(closure)) if closure.captured.is_none() => {
                Value::Callable(Callable::Lambda(LambdaClosure {
                    captured: Some(self.snapshot()),
                    ..closure.clone()
                }))
            }
            value => value.clone(),
        }
    }

    fn snapshot(&self) -> Slots {
        Arc::from(self.slots.as_slice())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn pop_args(&mut self, count: u16) -> Result<Vec<Value>, RuntimeError> {
        let start = self
            .stack
            .len()
            .checked_sub(count as usize)
            .ok_or(RuntimeError::StackUnderflow)?;
        Ok(self.stack.split_off(start))
    }

    fn call_host(
        &mut self,
        runtime: Runtime<'_>,
        function: &HostFunction,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let kinds = function.arg_kinds();
        let args = args
            .into_iter()
            .enumerate()
            .map(|(i, arg)| {
                let kind = match (kinds.get(i), kinds.last()) {
                    (Some(Kind::Variadic(inner)), _) | (None, Some(Kind::Variadic(inner))) => {
                        inner.as_ref()
                    }
                    (Some(kind), _) => kind,
                    (None, _) => return Ok(arg),
                };
                convert::convert(arg, kind, &runtime).map_err(|source| RuntimeError::Conversion {
                    function: function.name.clone(),
                    argument: i + 1,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let result = function.invoke(&mut Context::new(runtime, self), args)?;
        convert::convert(result, &function.result, &runtime).map_err(|source| {
            RuntimeError::InvalidResult {
                function: function.name.clone(),
                source,
            }
        })
    }

    fn call_lambda(
        &mut self,
        runtime: Runtime<'_>,
        closure: &LambdaClosure,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if self.depth >= self.max_depth {
            return Err(RuntimeError::RecursionLimit(self.max_depth));
        }

        let saved_pc = self.pc;
        let saved_slots = match &closure.captured {
            Some(captured) => std::mem::replace(&mut self.slots, captured.to_vec()),
            None => self.slots.clone(),
        };
        let stack_base = self.stack.len();

        self.stack.extend(args);
        self.pc = closure.entry as usize;
        self.depth += 1;
        let result = self.execute(runtime).and_then(|()| self.pop());
        self.depth -= 1;

        self.pc = saved_pc;
        self.slots = saved_slots;
        self.stack.truncate(stack_base);
        result
    }

    fn call_partial(
        &mut self,
        runtime: Runtime<'_>,
        partial: &PartialApplication,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let mut all = Vec::with_capacity(partial.bound.len() + args.len());
        all.extend(partial.bound.iter().cloned());
        all.extend(args);

        let saved_slots = std::mem::replace(&mut self.slots, partial.slots.to_vec());
        let result = self.call(runtime, &partial.inner, all);
        self.slots = saved_slots;
        result
    }
}

/// The callable a value stands for in call position. Queries act as
/// predicates over features.
fn callable_of(value: Value) -> Result<Callable, RuntimeError> {
    match value {
        Value::Callable(callable) => Ok(callable),
        Value::Query(query) => Ok(query_predicate(query)),
        value => Err(RuntimeError::NotCallable(value.kind_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::Deadline,
        registry::Registry,
        world::{MemoryWorld, World},
    };
    use rstest::rstest;

    fn run(instructions: Vec<Instruction>, slot_count: u16) -> Result<Value, RuntimeError> {
        let registry = Registry::standard().unwrap();
        let world = MemoryWorld::new();
        let deadline = Deadline::never();
        let runtime = Runtime {
            world: &world as &dyn World,
            registry: &registry,
            deadline: &deadline,
            parallelism: 1,
        };
        let program = Program {
            ranges: vec![None; instructions.len()],
            instructions,
            entries: vec![1],
            slot_count,
        };
        Vm::new(Arc::new(program), DEFAULT_MAX_CALL_DEPTH).run(runtime)
    }

    fn add() -> Callable {
        Callable::Host(Registry::standard().unwrap().get("add").unwrap().clone())
    }

    #[rstest]
    #[case::push(
        vec![Instruction::Jump(1), Instruction::PushValue(Value::Int(7)), Instruction::Return],
        Ok(Value::Int(7))
    )]
    #[case::store_and_load(
        vec![
            Instruction::Jump(1),
            Instruction::PushValue(Value::Int(7)),
            Instruction::Store(0),
            Instruction::Load(0),
            Instruction::Return,
        ],
        Ok(Value::Int(7))
    )]
    #[case::call_value(
        vec![
            Instruction::Jump(1),
            Instruction::PushValue(Value::Int(1)),
            Instruction::PushValue(Value::Int(2)),
            Instruction::CallValue { callable: add(), args: 2 },
            Instruction::Return,
        ],
        Ok(Value::Int(3))
    )]
    #[case::call_stack(
        vec![
            Instruction::Jump(1),
            Instruction::PushValue(Value::Int(1)),
            Instruction::PushValue(Value::Int(2)),
            Instruction::PushValue(Value::Callable(add())),
            Instruction::CallStack { args: 2 },
            Instruction::Return,
        ],
        Ok(Value::Int(3))
    )]
    #[case::lambda(
        vec![
            Instruction::Jump(6),
            // {x -> add x 1}
            Instruction::Store(0),
            Instruction::Load(0),
            Instruction::PushValue(Value::Int(1)),
            Instruction::CallValue { callable: add(), args: 2 },
            Instruction::Return,
            // root: {x -> add x 1} 41
            Instruction::PushValue(Value::Int(41)),
            Instruction::PushValue(Value::Callable(Callable::Lambda(LambdaClosure { entry: 1, arity: 1, captured: None }))),
            Instruction::CallStack { args: 1 },
            Instruction::Return,
        ],
        Ok(Value::Int(42))
    )]
    #[case::unbound_slot(
        vec![Instruction::Jump(1), Instruction::Load(0), Instruction::Return],
        Err(RuntimeError::UnboundSlot(0))
    )]
    #[case::not_callable(
        vec![
            Instruction::Jump(1),
            Instruction::PushValue(Value::Int(1)),
            Instruction::CallStack { args: 0 },
            Instruction::Return,
        ],
        Err(RuntimeError::NotCallable("Int"))
    )]
    #[case::underflow(
        vec![Instruction::Jump(1), Instruction::Return],
        Err(RuntimeError::StackUnderflow)
    )]
    #[case::runs_off_the_end(vec![Instruction::Jump(1)], Err(RuntimeError::InvalidProgramCounter(1)))]
    fn test_run(#[case] instructions: Vec<Instruction>, #[case] expected: Result<Value, RuntimeError>) {
        assert_eq!(run(instructions, 1), expected);
    }

    #[test]
    fn test_too_few_arguments_make_a_partial() {
        let result = run(
            vec![
                Instruction::Jump(1),
                Instruction::PushValue(Value::Int(1)),
                Instruction::CallValue {
                    callable: add(),
                    args: 1,
                },
                Instruction::Return,
            ],
            0,
        );
        let Ok(Value::Callable(partial @ Callable::Partial(_))) = result else {
            panic!("expected a partial application, got {:?}", result);
        };
        assert_eq!(partial.num_args(), 1);
    }

    #[test]
    fn test_too_many_arguments() {
        let result = run(
            vec![
                Instruction::Jump(1),
                Instruction::PushValue(Value::Int(1)),
                Instruction::PushValue(Value::Int(2)),
                Instruction::PushValue(Value::Int(3)),
                Instruction::CallValue {
                    callable: add(),
                    args: 3,
                },
                Instruction::Return,
            ],
            0,
        );
        assert_eq!(
            result,
            Err(RuntimeError::Arity {
                name: "add".into(),
                expected: 2,
                found: 3
            })
        );
    }
}
