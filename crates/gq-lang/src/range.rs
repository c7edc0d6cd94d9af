use miette::SourceSpan;
use nom_locate::LocatedSpan;
use serde::{Deserialize, Serialize};

pub type Span<'a> = LocatedSpan<&'a str>;

/// Half-open `[start, end)` byte offsets into the expression text.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Default, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub const fn new(start: usize, end: usize) -> Self {
        Range { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    /// The smallest range covering both `self` and `other`.
    pub fn merge(&self, other: &Range) -> Range {
        Range::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// The source text this range covers, if it lies within `code`.
    pub fn slice<'a>(&self, code: &'a str) -> Option<&'a str> {
        code.get(self.start..self.end)
    }
}

impl<'a> From<Span<'a>> for Range {
    fn from(span: Span<'a>) -> Self {
        let start = span.location_offset();
        Range::new(start, start + span.fragment().len())
    }
}

impl From<Range> for SourceSpan {
    fn from(range: Range) -> Self {
        SourceSpan::new(range.start.into(), range.len().max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::inside(Range::new(2, 5), 2, true)]
    #[case::last_byte(Range::new(2, 5), 4, true)]
    #[case::end_is_exclusive(Range::new(2, 5), 5, false)]
    #[case::empty(Range::new(3, 3), 3, false)]
    fn test_contains(#[case] range: Range, #[case] offset: usize, #[case] expected: bool) {
        assert_eq!(range.contains(offset), expected);
    }

    #[test]
    fn test_from_span_uses_byte_offsets() {
        use nom::Parser;

        let taken: nom::IResult<Span, Span> = nom::bytes::complete::take(5usize).parse(Span::new("find-feature /a/1"));
        let (rest, _) = taken.unwrap();
        let range: Range = rest.into();
        assert_eq!(range, Range::new(5, 17));
        assert_eq!(range.slice("find-feature /a/1"), Some("feature /a/1"));
    }

    #[test]
    fn test_merge() {
        assert_eq!(Range::new(4, 6).merge(&Range::new(0, 2)), Range::new(0, 6));
    }
}
