// VM session context
//
// One `LuaVm` owns everything that used to hide in globals: the globals
// and registry tables, the string interner, GC state, protection state,
// the current script path, and the host collaborator handles. Nothing in
// this crate is process-wide; two VMs never share state.

use std::path::PathBuf;
use std::rc::Rc;

use tracing::debug;

use crate::config::VmConfig;
use crate::gc::{GcMode, GcState, StringInterner};
use crate::lib_registry::LibraryRegistry;
use crate::lua_value::{LuaFunction, LuaTable, LuaValue, TableRef};

use super::environment::{EnvRef, Environment};
use super::host::{ChunkParser, HostExecutor, SourceResolver};
use super::lua_error::{ControlSignal, LuaError, LuaResult};
use super::metamethod;
use super::protected::ProtectionState;

pub struct LuaVm {
    globals: TableRef,
    registry: TableRef,
    pub(crate) interner: StringInterner,
    pub(crate) gc: GcState,
    pub(crate) protection: ProtectionState,
    pub(crate) current_script_path: Option<PathBuf>,
    pub(crate) current_env: EnvRef,
    parser: Option<Rc<dyn ChunkParser>>,
    executor: Option<Rc<dyn HostExecutor>>,
    resolver: Rc<dyn SourceResolver>,
    pub(crate) config: VmConfig,
}

impl LuaVm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let globals: TableRef = Rc::new(std::cell::RefCell::new(LuaTable::new()));
        let registry: TableRef = Rc::new(std::cell::RefCell::new(LuaTable::new()));
        let root_env = Environment::new();
        let mut vm = Self {
            globals: globals.clone(),
            registry,
            interner: StringInterner::new(),
            gc: GcState::new(config.gc),
            protection: ProtectionState::new(),
            current_script_path: None,
            current_env: root_env,
            parser: None,
            executor: None,
            resolver: Rc::new(super::host::FsSourceResolver),
            config,
        };
        vm.current_env
            .declare("_ENV", LuaValue::Table(globals.clone()));
        vm.current_env.declare("_G", LuaValue::Table(globals));
        LibraryRegistry::standard().install(&mut vm);
        let globals_value = LuaValue::Table(vm.globals.clone());
        vm.globals.borrow_mut().set_str("_G", globals_value);
        debug!("vm created");
        vm
    }

    // ============ Host collaborators ============

    pub fn set_parser(&mut self, parser: Rc<dyn ChunkParser>) {
        self.parser = Some(parser);
    }

    pub fn set_executor(&mut self, executor: Rc<dyn HostExecutor>) {
        self.executor = Some(executor);
    }

    pub fn set_resolver(&mut self, resolver: Rc<dyn SourceResolver>) {
        self.resolver = resolver;
    }

    pub(crate) fn parser(&self) -> Option<Rc<dyn ChunkParser>> {
        self.parser.clone()
    }

    pub(crate) fn executor(&self) -> Option<Rc<dyn HostExecutor>> {
        self.executor.clone()
    }

    pub(crate) fn resolver(&self) -> Rc<dyn SourceResolver> {
        self.resolver.clone()
    }

    // ============ Tables and strings ============

    pub fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    pub fn new_table(&mut self) -> LuaValue {
        self.gc.record_allocation(64);
        self.maybe_collect();
        LuaValue::table(LuaTable::new())
    }

    pub fn new_string(&mut self, s: &str) -> LuaValue {
        self.new_string_bytes(s.as_bytes())
    }

    pub fn new_string_bytes(&mut self, bytes: &[u8]) -> LuaValue {
        let s = self.interner.intern(bytes, &mut self.gc);
        self.maybe_collect();
        LuaValue::Str(s)
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        self.globals.borrow().get_str(name)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = self.new_string(name);
        // The globals table always accepts string keys.
        let _ = self.globals.borrow_mut().raw_set(key, value);
    }

    // ============ Registry (host-private table) ============

    pub fn registry_set(&mut self, name: &str, value: LuaValue) {
        let key = self.new_string(name);
        let _ = self.registry.borrow_mut().raw_set(key, value);
    }

    pub fn registry_get(&self, name: &str) -> LuaValue {
        self.registry.borrow().get_str(name)
    }

    // ============ Errors ============

    pub fn error(&self, message: impl Into<String>) -> LuaError {
        LuaError::Runtime(message.into())
    }

    pub fn type_error(&self, message: impl Into<String>) -> LuaError {
        LuaError::Type(message.into())
    }

    // ============ Call dispatch ============

    /// Invoke any callable with the full dispatch: native functions run
    /// directly, closures run through the host executor, `__call` tables
    /// re-enter with themselves prepended, and pending tail calls are
    /// completed here before results flow back.
    pub fn call_value(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<LuaValue> {
        let mut func = func;
        let mut args = args;
        for _ in 0..self.config.call_depth_limit {
            match func {
                LuaValue::Function(LuaFunction::Native { func: f, .. }) => {
                    return f(self, &args);
                }
                LuaValue::Function(LuaFunction::NativeClosure(nc)) => {
                    return (nc.func)(self, &args);
                }
                LuaValue::Function(LuaFunction::Closure(closure)) => {
                    let executor = self
                        .executor
                        .clone()
                        .ok_or_else(|| self.error("no executor installed"))?;
                    let signal = self.with_closure_scope(&closure, |vm| {
                        executor.call_closure(vm, &closure, &args)
                    })?;
                    match signal {
                        ControlSignal::Done(v) | ControlSignal::Return(v) => return Ok(v),
                        ControlSignal::TailCall {
                            func: next,
                            args: next_args,
                        } => {
                            func = next;
                            args = next_args;
                        }
                    }
                }
                other => match metamethod::resolve_metamethod(&other, metamethod::MM_CALL) {
                    Some(handler) => {
                        let mut call_args = Vec::with_capacity(args.len() + 1);
                        call_args.push(other);
                        call_args.append(&mut args);
                        func = handler;
                        args = call_args;
                    }
                    None => {
                        return Err(self.type_error(format!(
                            "attempt to call a {} value",
                            other.type_name()
                        )));
                    }
                },
            }
        }
        Err(self.error("stack overflow"))
    }

    /// Scoped switch of the active environment and script path around a
    /// nested execution; both are restored on every exit path.
    fn with_closure_scope<R>(
        &mut self,
        closure: &Rc<crate::lua_value::LuaClosure>,
        f: impl FnOnce(&mut LuaVm) -> R,
    ) -> R {
        let saved_env = std::mem::replace(&mut self.current_env, closure.env.clone());
        let saved_path = self.current_script_path.clone();
        let result = f(self);
        self.current_env = saved_env;
        self.current_script_path = saved_path;
        result
    }

    /// Scoped switch of the current script path (module execution).
    pub fn with_script_path<R>(
        &mut self,
        path: Option<PathBuf>,
        f: impl FnOnce(&mut LuaVm) -> R,
    ) -> R {
        let saved = std::mem::replace(&mut self.current_script_path, path);
        let result = f(self);
        self.current_script_path = saved;
        result
    }

    pub fn current_script_path(&self) -> Option<&PathBuf> {
        self.current_script_path.as_ref()
    }

    pub fn current_env(&self) -> EnvRef {
        self.current_env.clone()
    }

    pub fn yieldable(&self) -> bool {
        self.protection.yieldable()
    }

    /// For the executor's coroutine glue; returns the prior value.
    pub fn set_yieldable(&mut self, yieldable: bool) -> bool {
        self.protection.set_yieldable(yieldable)
    }

    pub fn is_in_protected_call(&self) -> bool {
        self.protection.is_protected()
    }

    /// String conversion through `__tostring`/`__name`.
    pub fn value_to_string(&mut self, value: &LuaValue) -> LuaResult<String> {
        metamethod::tostring(self, value)
    }

    // ============ GC surface ============

    /// Roots for collection: globals, registry, the active environment
    /// chain, and whatever the executor is keeping live.
    pub fn collect_roots(&self) -> Vec<LuaValue> {
        let mut roots = vec![
            LuaValue::Table(self.globals.clone()),
            LuaValue::Table(self.registry.clone()),
        ];
        let mut env = Some(self.current_env.clone());
        while let Some(e) = env {
            e.for_each_slot(|_, slot| roots.push(slot.get()));
            // Isolation only gates variable lookup; liveness follows the
            // raw parent link unconditionally.
            env = e.raw_parent();
        }
        if let Some(executor) = &self.executor {
            roots.extend(executor.extra_roots());
        }
        roots
    }

    fn maybe_collect(&mut self) {
        if self.gc.is_running() && self.gc.should_collect() {
            let roots = self.collect_roots();
            self.gc.step(0, &roots, &mut self.interner);
        }
    }

    pub fn gc_collect(&mut self) -> usize {
        let roots = self.collect_roots();
        self.gc.collect(&roots, &mut self.interner)
    }

    pub fn gc_step(&mut self, kb: usize) -> bool {
        let roots = self.collect_roots();
        self.gc.step(kb, &roots, &mut self.interner)
    }

    pub fn gc_count_kb(&self) -> f64 {
        self.gc.count_kb()
    }

    pub fn gc_set_mode(&mut self, mode: GcMode, major: u32, minor: u32, step_kb: u32) -> &'static str {
        self.gc.set_mode(mode, major, minor, step_kb)
    }

    pub fn gc_stop(&mut self) {
        self.gc.stop();
    }

    pub fn gc_restart(&mut self) {
        self.gc.restart();
    }

    pub fn gc_is_running(&self) -> bool {
        self.gc.is_running()
    }
}

impl Default for LuaVm {
    fn default() -> Self {
        Self::new()
    }
}
