use crate::{
    range::Range,
    value::{Callable, Value},
};

/// One VM operation. Emitted once by the compiler and never modified.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    PushValue(Value),
    /// Pops the top of the stack into a slot.
    Store(u16),
    Load(u16),
    Jump(u32),
    /// Calls a callable known at compile time with the top `args` values.
    CallValue { callable: Callable, args: u16 },
    /// Pops a callee, then calls it with the `args` values beneath it.
    CallStack { args: u16 },
    Return,
}

/// A compiled expression.
///
/// `entries[0]` is the root target; every lambda gets one more entry.
/// `ranges` runs parallel to `instructions` and points at the source each
/// instruction was emitted for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub ranges: Vec<Option<Range>>,
    pub entries: Vec<u32>,
    pub slot_count: u16,
}

impl Program {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn range_at(&self, pc: usize) -> Option<Range> {
        self.ranges.get(pc).copied().flatten()
    }
}
