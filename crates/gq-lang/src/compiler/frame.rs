use crate::{arena::ArenaId, ast::Params};

pub type FrameId = ArenaId<Frame>;

/// The parameters one lambda (or the root expression) binds, and where in
/// the slot array they live. Frames only exist while compiling.
#[derive(Debug, Clone)]
pub struct Frame {
    pub parent: Option<FrameId>,
    pub params: Params,
    pub base: u16,
}

impl Frame {
    pub fn root() -> Self {
        Frame {
            parent: None,
            params: Params::new(),
            base: 0,
        }
    }

    /// The slot of `name` in this frame. A later parameter shadows an
    /// earlier one with the same name.
    pub fn slot_of(&self, name: &str) -> Option<u16> {
        self.params
            .iter()
            .rposition(|param| param == name)
            .map(|i| self.base + i as u16)
    }

    /// One past the last slot this frame uses.
    pub fn end(&self) -> usize {
        self.base as usize + self.params.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::first("a", Some(4))]
    #[case::shadowed("b", Some(6))]
    #[case::missing("c", None)]
    fn test_slot_of(#[case] name: &str, #[case] expected: Option<u16>) {
        let frame = Frame {
            parent: None,
            params: ["a", "b", "b"].into_iter().map(Into::into).collect(),
            base: 4,
        };
        assert_eq!(frame.slot_of(name), expected);
        assert_eq!(frame.end(), 7);
    }
}
