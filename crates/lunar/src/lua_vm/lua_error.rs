// Error taxonomy and control signals
//
// Faults travel on the `Err` channel; non-local control transfer
// (return, tail call) travels as `ControlSignal` values so it can never
// be mistaken for a fault at a call boundary.

use thiserror::Error;

use crate::lua_value::LuaValue;

pub type LuaResult<T> = Result<T, LuaError>;

#[derive(Debug, Clone, Error)]
pub enum LuaError {
    /// Operation on a value of the wrong kind.
    #[error("{0}")]
    Type(String),
    /// Message-carrying failure not tied to a type violation.
    #[error("{0}")]
    Runtime(String),
    /// A thrown value that must reach `pcall` verbatim (tables used as
    /// structured exceptions, nil from bare `error()`, raw strings under
    /// protection).
    #[error("{}", raw_value_message(.0))]
    RawValue(LuaValue),
    /// Classified parse/mode failure; surfaced as `(nil, message)` by the
    /// loading functions rather than thrown.
    #[error("{0}")]
    Load(String),
}

impl LuaError {
    /// The value `pcall` hands back: raw payloads unchanged, everything
    /// else as its message text.
    pub fn into_payload_string(self) -> Result<LuaValue, String> {
        match self {
            LuaError::RawValue(v) => Ok(v),
            LuaError::Type(m) | LuaError::Runtime(m) | LuaError::Load(m) => Err(m),
        }
    }
}

fn raw_value_message(value: &LuaValue) -> String {
    match value {
        LuaValue::Str(s) => s.to_string_lossy(),
        other => format!("error object is a {} value", other.type_name()),
    }
}

/// Outcome of running a chunk or closure body, threaded explicitly
/// through call boundaries.
#[derive(Debug, Clone)]
pub enum ControlSignal {
    /// Body completed without an explicit return.
    Done(LuaValue),
    /// Explicit return, possibly a multi-value.
    Return(LuaValue),
    /// A pending tail call: the receiver completes it.
    TailCall {
        func: LuaValue,
        args: Vec<LuaValue>,
    },
}

impl ControlSignal {
    pub fn values(self) -> Option<LuaValue> {
        match self {
            ControlSignal::Done(v) | ControlSignal::Return(v) => Some(v),
            ControlSignal::TailCall { .. } => None,
        }
    }
}
