//! The runtime value representation (component C1).
//!
//! The original interpreter stores values as `void*` plus a type tag and
//! casts at every use site. Per the REDESIGN FLAGS in the language
//! specification this is re-expressed as a plain Rust sum type: `Clone`
//! gives deep copy (bit-copy for scalars, owned-string copy for `Str`) and
//! `Drop` gives "free" for free, so there is no separate `copy`/`free` API
//! to keep in sync with the variant list.

use crate::common::Id;

/// A half-open substring range. Each bound is a *stack offset* (relative
/// to the current frame's base pointer) at which the bound's own value
/// lives, not the bound value itself — this is what lets `s[i:]` and
/// `s[:j]` each omit one operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Range {
    pub from: Option<isize>,
    pub to: Option<isize>,
}

/// A dynamically-typed runtime value.
#[derive(Clone, Debug)]
pub enum Value {
    /// A reserved slot that has never been written. Reading this as an
    /// operand (rather than as a lazily-created destination) is a
    /// runtime error.
    Undefined,
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    /// A reference to a user-defined function, by name.
    Function(Id),
    /// A saved program counter (an instruction address), used for the
    /// caller's return address across a `CALL`/`RET` pair.
    InstructionPointer(usize),
    /// A saved base pointer, used to restore the caller's frame on `RET`.
    BasePointer(isize),
    Range(Range),
}

impl Value {
    /// Numeric type code for `typeOf` (spec §4.8): `nil -> 0`, `bool -> 1`,
    /// `number -> 3`, `function -> 6`, `string -> 8`.
    pub fn type_code(&self) -> Option<f64> {
        match self {
            Value::Nil => Some(0.0),
            Value::Bool(_) => Some(1.0),
            Value::Number(_) => Some(3.0),
            Value::Function(_) => Some(6.0),
            Value::Str(_) => Some(8.0),
            _ => None,
        }
    }

    /// Converts a value to its string form: numbers use the shortest
    /// round-trip representation, booleans are `true`/`false`, `nil` is
    /// `"Nil"`, and strings are copied verbatim. `Undefined` and the
    /// internal bookkeeping variants have no string form.
    pub fn to_display_string(&self) -> Option<String> {
        match self {
            Value::Nil => Some("Nil".to_string()),
            Value::Bool(b) => Some(if *b { "true".to_string() } else { "false".to_string() }),
            Value::Number(n) => Some(format_number(*n)),
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }
}

/// Formats a number using the shortest representation that round-trips
/// back to the same `f64` (the `%g`-equivalent spec.md calls for).
pub fn format_number(n: f64) -> String {
    if n == n.trunc() && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let mut buf = format!("{n}");
        if buf.contains('e') {
            // Rust's default exponent form (`1e20`) already round-trips;
            // nothing further to do.
        } else if !buf.contains('.') {
            buf.push_str(".0");
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_print_without_a_decimal_point() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(-3.0), "-3");
    }

    #[test]
    fn fractional_numbers_round_trip() {
        assert_eq!(format_number(3.5), "3.5");
    }

    #[test]
    fn type_codes_match_spec() {
        assert_eq!(Value::Nil.type_code(), Some(0.0));
        assert_eq!(Value::Bool(true).type_code(), Some(1.0));
        assert_eq!(Value::Number(1.0).type_code(), Some(3.0));
        assert_eq!(Value::Str("x".into()).type_code(), Some(8.0));
    }
}
