use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
};

/// The numeric capability shared by integer and float values.
///
/// Mixed operations widen the integer side to a float. Nothing here narrows a
/// float back to an integer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(n) => n,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(self, Number::Int(_))
    }

    /// Returns `None` when integer arithmetic overflows.
    pub fn add(self, other: Number) -> Option<Number> {
        self.combine(other, i64::checked_add, |a, b| a + b)
    }

    pub fn subtract(self, other: Number) -> Option<Number> {
        self.combine(other, i64::checked_sub, |a, b| a - b)
    }

    pub fn multiply(self, other: Number) -> Option<Number> {
        self.combine(other, i64::checked_mul, |a, b| a * b)
    }

    /// Division always produces a float; `None` for an integer zero divisor.
    pub fn divide(self, other: Number) -> Option<Number> {
        match other {
            Number::Int(0) => None,
            _ => Some(Number::Float(self.as_f64() / other.as_f64())),
        }
    }

    /// `None` when either side is NaN.
    pub fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }

    #[inline(always)]
    fn combine(
        self,
        other: Number,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Option<Number> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => int_op(a, b).map(Number::Int),
            (a, b) => Some(Number::Float(float_op(a.as_f64(), b.as_f64()))),
        }
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{}", n),
            Number::Float(n) => write!(f, "{}", format_float(*n)),
        }
    }
}

/// Formats a float so that it lexes back as the same float. Whole numbers
/// keep a trailing `.0`, very large and very small magnitudes use an
/// exponent, and non-finite values use the `inf`, `-inf` and `nan` keywords.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{:?}", value)
    }
}
