// Protected calls
//
// `pcall`/`xpcall` convert faults into `(false, payload)` data. The
// protection state is per call thread: a depth counter, the yieldable
// flag (suspension is forbidden across a protected boundary), and a
// reentrancy guard for the top-level reporter. Enter/leave are paired on
// every exit path; `leave` restores the *prior* yieldable value because
// protected regions nest.

use tracing::trace;

use crate::lua_value::LuaValue;

use super::lua_error::{LuaError, LuaResult};
use super::lua_state::LuaVm;

pub struct ProtectionState {
    depth: u32,
    yieldable: bool,
    reporting: bool,
}

impl ProtectionState {
    pub fn new() -> Self {
        Self {
            depth: 0,
            yieldable: true,
            reporting: false,
        }
    }

    #[inline]
    pub fn is_protected(&self) -> bool {
        self.depth > 0
    }

    #[inline]
    pub fn yieldable(&self) -> bool {
        self.yieldable
    }

    /// Set by the executor around coroutine bodies. Returns the prior
    /// value so callers can restore it.
    pub fn set_yieldable(&mut self, yieldable: bool) -> bool {
        std::mem::replace(&mut self.yieldable, yieldable)
    }

    pub(crate) fn enter(&mut self) -> bool {
        self.depth += 1;
        std::mem::replace(&mut self.yieldable, false)
    }

    pub(crate) fn leave(&mut self, prior_yieldable: bool) {
        debug_assert!(self.depth > 0);
        self.depth -= 1;
        self.yieldable = prior_yieldable;
    }

    pub(crate) fn is_reporting(&self) -> bool {
        self.reporting
    }

    pub(crate) fn set_reporting(&mut self, on: bool) {
        self.reporting = on;
    }
}

impl Default for ProtectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaVm {
    /// Run `func(args...)` under protection. Success is `(true, results)`;
    /// any fault becomes `(false, payload)` with raw payloads preserved
    /// verbatim and structured errors reduced to their message text.
    pub fn protected_call(
        &mut self,
        func: LuaValue,
        args: Vec<LuaValue>,
    ) -> LuaResult<(bool, LuaValue)> {
        let prior = self.protection.enter();
        let outcome = self.call_value(func, args);
        self.protection.leave(prior);

        match outcome {
            Ok(results) => Ok((true, results)),
            Err(err) => {
                trace!(error = %err, "protected call failed");
                Ok((false, self.error_payload(err)))
            }
        }
    }

    /// `xpcall`: on fault, the handler runs on the payload before the
    /// failure tuple is built. A handler that itself faults collapses to
    /// a fixed-shape failure.
    pub fn protected_call_with_handler(
        &mut self,
        func: LuaValue,
        args: Vec<LuaValue>,
        handler: LuaValue,
    ) -> LuaResult<(bool, LuaValue)> {
        let prior = self.protection.enter();
        let outcome = self.call_value(func, args);
        let handled = match outcome {
            Ok(results) => Ok((true, results)),
            Err(err) => {
                let payload = self.error_payload(err);
                match self.call_value(handler, vec![payload]) {
                    Ok(results) => Ok((false, results)),
                    Err(_) => Ok((
                        false,
                        self.new_string("error in error handling"),
                    )),
                }
            }
        };
        self.protection.leave(prior);
        handled
    }

    fn error_payload(&mut self, err: LuaError) -> LuaValue {
        match err.into_payload_string() {
            Ok(raw) => raw,
            Err(message) => self.new_string(&message),
        }
    }

    /// The `error()` builtin's throw path. Under protection the value is
    /// thrown raw so `pcall` sees the exact object. At top level, string
    /// messages go through the reporter; the reporter's reentrancy guard
    /// degrades a nested failure to a plain raw throw.
    pub fn raise_error(&mut self, value: LuaValue) -> LuaError {
        if self.protection.is_protected() || self.protection.is_reporting() {
            return LuaError::RawValue(value);
        }
        match &value {
            LuaValue::Str(s) => {
                self.protection.set_reporting(true);
                let message = self.augment_with_traceback(&s.to_string_lossy());
                self.protection.set_reporting(false);
                LuaError::Runtime(message)
            }
            _ => LuaError::RawValue(value),
        }
    }

    pub(crate) fn augment_with_traceback(&self, message: &str) -> String {
        match self.executor().and_then(|e| e.stack_trace()) {
            Some(tb) => format!("{}\nstack traceback:\n{}", message, tb),
            None => message.to_string(),
        }
    }

    /// `assert` core: Lua truthiness on the first argument; on success
    /// every original argument comes back so chained call patterns work.
    pub fn check_assertion(&mut self, args: &[LuaValue]) -> LuaResult<LuaValue> {
        let condition = args.first().cloned().unwrap_or(LuaValue::Nil);
        if condition.is_truthy() {
            return Ok(LuaValue::multi(args.to_vec()));
        }
        match args.get(1) {
            Some(LuaValue::Str(s)) => Err(LuaError::Runtime(s.to_string_lossy())),
            Some(other) => Err(LuaError::RawValue(other.clone())),
            None => Err(LuaError::Runtime("assertion failed!".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_restores_prior_yieldable() {
        let mut p = ProtectionState::new();
        assert!(p.yieldable());
        let outer = p.enter();
        assert!(!p.yieldable());
        // Nested region: prior value is already false
        let inner = p.enter();
        assert!(!p.yieldable());
        p.leave(inner);
        assert!(!p.yieldable());
        p.leave(outer);
        assert!(p.yieldable());
    }

    #[test]
    fn test_depth_tracks_nesting() {
        let mut p = ProtectionState::new();
        assert!(!p.is_protected());
        let a = p.enter();
        let b = p.enter();
        assert!(p.is_protected());
        p.leave(b);
        assert!(p.is_protected());
        p.leave(a);
        assert!(!p.is_protected());
    }
}
