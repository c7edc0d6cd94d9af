use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use smol_str::SmolStr;

use crate::{context::Context, convert::Kind, vm::error::RuntimeError};

use super::Value;

/// A snapshot of the VM argument slots.
pub type Slots = Arc<[Option<Value>]>;

pub type HostFn =
    dyn Fn(&mut Context<'_, '_>, Vec<Value>) -> Result<Value, RuntimeError> + Send + Sync;

/// Anything the VM can call.
#[derive(Clone, PartialEq)]
pub enum Callable {
    Host(HostFunction),
    Lambda(LambdaClosure),
    Partial(Arc<PartialApplication>),
}

impl Callable {
    /// Declared argument count, excluding the context. A variadic host
    /// function counts its trailing parameter once.
    pub fn num_args(&self) -> usize {
        match self {
            Callable::Host(function) => function.arity(),
            Callable::Lambda(closure) => closure.arity as usize,
            Callable::Partial(partial) => {
                partial.inner.num_args().saturating_sub(partial.bound.len())
            }
        }
    }

    /// Fewest arguments that run the callable instead of partially applying
    /// it. A variadic parameter may receive no values at all.
    pub fn required_args(&self) -> usize {
        match self {
            Callable::Host(function) => function.required_args(),
            Callable::Lambda(closure) => closure.arity as usize,
            Callable::Partial(partial) => partial
                .inner
                .required_args()
                .saturating_sub(partial.bound.len()),
        }
    }

    pub fn is_variadic(&self) -> bool {
        match self {
            Callable::Host(function) => function.is_variadic(),
            Callable::Lambda(_) => false,
            Callable::Partial(partial) => partial.inner.is_variadic(),
        }
    }

    pub fn name(&self) -> SmolStr {
        match self {
            Callable::Host(function) => function.name.clone(),
            Callable::Lambda(_) => SmolStr::new_static("lambda"),
            Callable::Partial(partial) => partial.inner.name(),
        }
    }

    /// Binds `args` ahead of any later arguments. Partials of partials
    /// flatten: the bound values accumulate and the first slot snapshot is
    /// kept.
    pub fn partial(callable: Callable, args: Vec<Value>, slots: Slots) -> Callable {
        match callable {
            Callable::Partial(partial) => {
                let mut bound = partial.bound.clone();
                bound.extend(args);
                Callable::Partial(Arc::new(PartialApplication {
                    inner: partial.inner.clone(),
                    bound,
                    slots: Arc::clone(&partial.slots),
                }))
            }
            inner => Callable::Partial(Arc::new(PartialApplication {
                inner,
                bound: args,
                slots,
            })),
        }
    }
}

impl Debug for Callable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Host(function) => write!(f, "Host({})", function.name),
            Callable::Lambda(closure) => {
                write!(f, "Lambda(entry: {}, arity: {})", closure.entry, closure.arity)
            }
            Callable::Partial(partial) => write!(
                f,
                "Partial({:?}, bound: {:?})",
                partial.inner, partial.bound
            ),
        }
    }
}

/// A function implemented by the host.
///
/// `params[0]` is always [`Kind::Context`]; the remaining kinds describe the
/// arguments. Arguments are converted to those kinds before `func` runs and
/// its result is converted to `result`.
#[derive(Clone)]
pub struct HostFunction {
    pub name: SmolStr,
    pub params: Arc<[Kind]>,
    pub result: Kind,
    func: Arc<HostFn>,
}

impl HostFunction {
    pub fn new<F>(name: impl Into<SmolStr>, params: Vec<Kind>, result: Kind, func: F) -> Self
    where
        F: Fn(&mut Context<'_, '_>, Vec<Value>) -> Result<Value, RuntimeError>
            + Send
            + Sync
            + 'static,
    {
        HostFunction {
            name: name.into(),
            params: params.into(),
            result,
            func: Arc::new(func),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len().saturating_sub(1)
    }

    pub fn is_variadic(&self) -> bool {
        matches!(self.params.last(), Some(Kind::Variadic(_)))
    }

    pub fn required_args(&self) -> usize {
        self.arity().saturating_sub(usize::from(self.is_variadic()))
    }

    /// The kinds of the arguments, without the leading context.
    pub fn arg_kinds(&self) -> &[Kind] {
        self.params.get(1..).unwrap_or_default()
    }

    pub fn invoke(&self, ctx: &mut Context<'_, '_>, args: Vec<Value>) -> Result<Value, RuntimeError> {
        (self.func)(ctx, args)
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.params == other.params && self.result == other.result
    }
}

impl Debug for HostFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("result", &self.result)
            .finish()
    }
}

/// A compiled lambda. `captured` is filled in when the lambda value is
/// pushed, so the body sees the parameters of its enclosing lambdas.
#[derive(Debug, Clone)]
pub struct LambdaClosure {
    pub entry: u32,
    pub arity: u16,
    pub captured: Option<Slots>,
}

impl PartialEq for LambdaClosure {
    fn eq(&self, other: &Self) -> bool {
        let same_capture = match (&self.captured, &other.captured) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        self.entry == other.entry && self.arity == other.arity && same_capture
    }
}

/// A callable with a prefix of its arguments already supplied.
#[derive(Debug)]
pub struct PartialApplication {
    pub inner: Callable,
    pub bound: Vec<Value>,
    pub slots: Slots,
}

impl PartialEq for PartialApplication {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner && self.bound == other.bound
    }
}
