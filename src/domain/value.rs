//! Typed field values

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Value carried by a field node or produced by a formula.
///
/// `Void` is "no value": a null literal, or a field nobody filled in yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Void,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
}

impl Value {
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value; booleans and strings are not numbers.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Real(r) => Some(Number::Real(*r)),
            _ => None,
        }
    }

    /// Parse a formula literal token.
    ///
    /// Priority: boolean, null, empty string, number, plain string.
    pub fn parse_literal(token: &str) -> Self {
        match token {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            "null" => return Value::Void,
            "\"\"" | "''" => return Value::Str(String::new()),
            _ => {}
        }
        if let Ok(i) = token.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(r) = token.parse::<f64>() {
            if r.is_finite() {
                return Value::Real(r);
            }
        }
        Value::Str(token.to_string())
    }

    /// Parse user input for a field (`--set path=value`).
    ///
    /// Same rules as literals, except an empty input clears the field.
    pub fn parse_input(input: &str) -> Self {
        if input.is_empty() {
            Value::Void
        } else {
            Self::parse_literal(input)
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(i) => Value::Int(i),
            Number::Real(r) => Value::Real(r),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Numeric operand with integer/real promotion.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Real(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Real(r) => r,
        }
    }

    /// Integer results stay integers; overflow degrades to real arithmetic.
    pub fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_add(b)
                .map(Number::Int)
                .unwrap_or(Number::Real(a as f64 + b as f64)),
            (a, b) => Number::Real(a.as_f64() + b.as_f64()),
        }
    }

    pub fn mul(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_mul(b)
                .map(Number::Int)
                .unwrap_or(Number::Real(a as f64 * b as f64)),
            (a, b) => Number::Real(a.as_f64() * b.as_f64()),
        }
    }

    /// Truncate toward zero.
    pub fn trunc(self) -> Number {
        match self {
            Number::Int(i) => Number::Int(i),
            Number::Real(r) => Number::Int(r.trunc() as i64),
        }
    }

    /// Floor division; `None` on a zero divisor or integer overflow.
    pub fn floor_div(self, divisor: Number) -> Option<Number> {
        match (self, divisor) {
            (_, Number::Int(0)) => None,
            (Number::Int(a), Number::Int(b)) => {
                let quotient = a.checked_div_euclid(b)?;
                Some(Number::Int(quotient - adjust(a, b)?))
            }
            (a, b) => {
                let d = b.as_f64();
                if d == 0.0 {
                    None
                } else {
                    Some(Number::Int((a.as_f64() / d).floor() as i64))
                }
            }
        }
    }
}

// `div_euclid` rounds toward negative infinity only for positive divisors.
fn adjust(a: i64, b: i64) -> Option<i64> {
    Some(if b < 0 && a.checked_rem_euclid(b)? != 0 { 1 } else { 0 })
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.partial_cmp(b),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_tokens_when_parse_literal_then_follows_priority() {
        assert_eq!(Value::parse_literal("true"), Value::Bool(true));
        assert_eq!(Value::parse_literal("null"), Value::Void);
        assert_eq!(Value::parse_literal("\"\""), Value::Str(String::new()));
        assert_eq!(Value::parse_literal("-7"), Value::Int(-7));
        assert_eq!(Value::parse_literal("1.5"), Value::Real(1.5));
        assert_eq!(Value::parse_literal("pos"), Value::Str("pos".into()));
        assert_eq!(Value::parse_literal("inf"), Value::Str("inf".into()));
    }

    #[test]
    fn given_int_and_real_when_compared_then_numeric_equality() {
        assert_eq!(Value::Int(2), Value::Real(2.0));
        assert_ne!(Value::Int(2), Value::Str("2".into()));
        assert_ne!(Value::Void, Value::Int(0));
    }

    #[test]
    fn test_floor_div() {
        assert_eq!(Number::Int(7).floor_div(Number::Int(2)), Some(Number::Int(3)));
        assert_eq!(Number::Int(-7).floor_div(Number::Int(2)), Some(Number::Int(-4)));
        assert_eq!(Number::Int(7).floor_div(Number::Int(-2)), Some(Number::Int(-4)));
        assert_eq!(Number::Int(-7).floor_div(Number::Int(-2)), Some(Number::Int(3)));
        assert_eq!(Number::Int(6).floor_div(Number::Int(-2)), Some(Number::Int(-3)));
        assert_eq!(Number::Real(7.5).floor_div(Number::Int(2)), Some(Number::Int(3)));
        assert_eq!(Number::Int(7).floor_div(Number::Int(0)), None);
        assert_eq!(Number::Int(i64::MIN).floor_div(Number::Int(-1)), None);
    }

    #[test]
    fn test_trunc_toward_zero() {
        assert_eq!(Number::Real(2.9).trunc(), Number::Int(2));
        assert_eq!(Number::Real(-2.9).trunc(), Number::Int(-2));
    }
}
