//! Typed error model. Plain enum + `Display` + `std::error::Error`, matching
//! the teacher's manual-enum idiom (`CodeGenError` in its compiler crate)
//! rather than pulling in a derive-macro error crate.

use std::fmt;

#[derive(Debug, Clone)]
pub enum Error {
    /// A required argument was not supplied.
    MissingArg { index: u32, expected: &'static str, func: String },
    /// An argument had the wrong type.
    BadType { index: u32, expected: &'static str, got: &'static str, func: String },
    /// A value failed some additional check beyond its type.
    BadValue { index: u32, message: String, func: String },
    /// A raw message, prefixed with `source:line` by the innermost frame.
    RawMessage { message: String, position: Option<(String, u32)> },
    /// A raw message with no source-position prefix (native `error()` with
    /// level 0, or library-internal raises).
    RawMessageNoPosition { message: String },
    /// Arithmetic/coercion failure inside an opcode (bad operand to +, concat, etc).
    RuntimeArithmetic { message: String },
    /// Chunk-loader validation failure; the script never starts.
    LoaderFormat { message: String },
    /// Fatal: allocation failure, GC reentrancy, malformed bytecode, internal
    /// assertion. Must never be caught by `pcall`/`xpcall`.
    Internal { message: String },
}

impl Error {
    /// `pcall`/`xpcall` consult this single chokepoint instead of a
    /// convention scattered across call sites.
    pub fn is_catchable(&self) -> bool {
        !matches!(self, Error::Internal { .. })
    }

    pub fn missing_arg(index: u32, expected: &'static str, func: impl Into<String>) -> Error {
        Error::MissingArg { index, expected, func: func.into() }
    }

    pub fn bad_type(index: u32, expected: &'static str, got: &'static str, func: impl Into<String>) -> Error {
        Error::BadType { index, expected, got, func: func.into() }
    }

    pub fn bad_value(index: u32, message: impl Into<String>, func: impl Into<String>) -> Error {
        Error::BadValue { index, message: message.into(), func: func.into() }
    }

    pub fn raw(message: impl Into<String>, position: Option<(String, u32)>) -> Error {
        Error::RawMessage { message: message.into(), position }
    }

    pub fn raw_no_position(message: impl Into<String>) -> Error {
        Error::RawMessageNoPosition { message: message.into() }
    }

    pub fn arithmetic(message: impl Into<String>) -> Error {
        Error::RuntimeArithmetic { message: message.into() }
    }

    pub fn loader(message: impl Into<String>) -> Error {
        Error::LoaderFormat { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Error {
        Error::Internal { message: message.into() }
    }

    /// Render the payload as the string a script-visible `error()` value
    /// would carry (used when a native-code error needs to become a Lua
    /// string value rather than just a diagnostic).
    pub fn payload_string(&self) -> String {
        match self {
            Error::MissingArg { index, expected, func } => {
                format!("bad argument #{index} to '{func}' ({expected} expected, got no value)")
            }
            Error::BadType { index, expected, got, func } => {
                format!("bad argument #{index} to '{func}' ({expected} expected, got {got})")
            }
            Error::BadValue { index, message, func } => {
                format!("bad argument #{index} to '{func}' ({message})")
            }
            Error::RawMessage { message, position: Some((src, line)) } => {
                format!("{src}:{line}: {message}")
            }
            Error::RawMessage { message, position: None } => message.clone(),
            Error::RawMessageNoPosition { message } => message.clone(),
            Error::RuntimeArithmetic { message } => message.clone(),
            Error::LoaderFormat { message } => format!("cannot load chunk: {message}"),
            Error::Internal { message } => format!("internal error: {message}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.payload_string())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_are_not_catchable() {
        assert!(!Error::internal("boom").is_catchable());
    }

    #[test]
    fn other_errors_are_catchable() {
        assert!(Error::raw_no_position("boom").is_catchable());
        assert!(Error::loader("bad header").is_catchable());
    }

    #[test]
    fn positioned_message_includes_source_and_line() {
        let e = Error::raw("boom", Some(("script.lua".to_string(), 12)));
        assert_eq!(e.payload_string(), "script.lua:12: boom");
    }

    #[test]
    fn no_position_message_omits_prefix() {
        let e = Error::raw_no_position("boom");
        assert_eq!(e.payload_string(), "boom");
    }
}
