pub mod intern;
pub mod table;
pub mod value;

pub use intern::{StringHandle, StringInterner};
pub use table::{Table, TableError, METAEVENTS};
pub use value::{compare, parse_number, raw_eq, GcRef, Order, Tag, Value};

/// Shared number -> string formatting used by `CONCAT`, `tostring`, and
/// `table.concat`. Integral values print without a trailing `.0`, matching
/// the reference language's default `%.14g`-ish surface closely enough for
/// the non-bit-exact contract in spec.md's Non-goals.
pub fn value_number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod format_tests {
    use super::*;

    #[test]
    fn integral_floats_print_without_decimal() {
        assert_eq!(value_number_to_string(3.0), "3");
        assert_eq!(value_number_to_string(-3.0), "-3");
    }

    #[test]
    fn fractional_floats_print_with_decimal() {
        assert_eq!(value_number_to_string(3.5), "3.5");
    }
}
