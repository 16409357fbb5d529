// Runtime error representation
//
// One variant per error kind the core can raise. Most variants carry the
// fully formatted message ("attempt to perform arithmetic on a nil value"
// etc.); `UserError` carries an arbitrary Lua value raised by user code,
// like the C API's error object on the stack.

use crate::lua_value::{LuaString, LuaValue};

pub type LuaResult<T> = Result<T, LuaError>;

#[derive(Debug, Clone)]
pub enum LuaError {
    /// Operand of the wrong kind ("attempt to perform arithmetic on a nil value")
    TypeMismatch(String),
    /// Wrong number or kind of arguments to a library function or metamethod
    Argument(String),
    /// Integer division or modulo by zero; carries the operator ("n//0", "n%0")
    DivisionByZero(&'static str),
    /// Float operand with a fractional part where an integer is required
    NoIntegerRepresentation(String),
    /// nil or NaN used as a table key
    TableKey(String),
    /// Assignment to a const-declared variable
    ConstAssignment(String),
    /// Read or write of a variable after its scope closed it
    ClosedVariable(String),
    /// Invalid coroutine transition (yield outside coroutine, close of running, ...)
    CoroutineState(String),
    /// Ill-formed pattern or capture reference
    PatternInvalid(String),
    /// Value raised by user error(); `level` counts frames up for the
    /// reported location (0 = no position information)
    UserError { value: LuaValue, level: u32 },
    /// Internal unwind signal delivered to a coroutine body by close().
    /// Never escapes the coroutine module.
    CloseThread,
}

impl LuaError {
    pub fn user(value: LuaValue) -> Self {
        LuaError::UserError { value, level: 1 }
    }

    pub fn user_with_level(value: LuaValue, level: u32) -> Self {
        LuaError::UserError { value, level }
    }

    /// The error as a Lua value, the shape pcall hands to its caller:
    /// the raised value for `UserError`, the message string otherwise.
    pub fn error_value(&self) -> LuaValue {
        match self {
            LuaError::UserError { value, .. } => value.clone(),
            other => LuaValue::String(LuaString::from_str(&other.to_string())),
        }
    }
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaError::TypeMismatch(msg) => write!(f, "{}", msg),
            LuaError::Argument(msg) => write!(f, "{}", msg),
            LuaError::DivisionByZero(op) => write!(f, "attempt to perform '{}'", op),
            LuaError::NoIntegerRepresentation(msg) => write!(f, "{}", msg),
            LuaError::TableKey(msg) => write!(f, "{}", msg),
            LuaError::ConstAssignment(msg) => write!(f, "{}", msg),
            LuaError::ClosedVariable(msg) => write!(f, "{}", msg),
            LuaError::CoroutineState(msg) => write!(f, "{}", msg),
            LuaError::PatternInvalid(msg) => write!(f, "{}", msg),
            LuaError::UserError { value, .. } => write!(f, "{}", value),
            LuaError::CloseThread => write!(f, "coroutine closed"),
        }
    }
}

impl std::error::Error for LuaError {}
