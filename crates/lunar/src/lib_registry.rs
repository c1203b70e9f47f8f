// Library registration
//
// Modules declare flat (name, entry) tables; installation writes them
// into the globals table (for "_G") or a named module table, records the
// module in package.loaded when the package table exists, then runs the
// module's initializer.

use crate::lua_value::{LuaFunction, LuaTable, LuaValue, NativeFn};
use crate::lua_vm::LuaVm;

/// Positional argument access, 1-based like the language it serves.
pub fn get_arg(args: &[LuaValue], index: usize) -> Option<&LuaValue> {
    args.get(index - 1)
}

pub fn require_arg<'a>(
    args: &'a [LuaValue],
    index: usize,
    fname: &str,
) -> crate::lua_vm::LuaResult<&'a LuaValue> {
    args.get(index - 1).ok_or_else(|| {
        crate::lua_vm::LuaError::Runtime(format!(
            "bad argument #{} to '{}' (value expected)",
            index, fname
        ))
    })
}

pub enum LibraryEntry {
    Function(NativeFn),
    Value(fn(&mut LuaVm) -> LuaValue),
}

pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
    initializer: Option<fn(&mut LuaVm)>,
}

impl LibraryModule {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
            initializer: None,
        }
    }

    pub fn with_initializer(mut self, init: fn(&mut LuaVm)) -> Self {
        self.initializer = Some(init);
        self
    }
}

/// Build a [`LibraryModule`] from a flat entry table.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, { $($key:expr => $func:expr),* $(,)? }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push((
                $key,
                $crate::lib_registry::LibraryEntry::Function($func),
            ));
        )*
        module
    }};
}

pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// The module set every VM starts with.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(crate::stdlib::basic::create_basic_lib());
        registry.add(crate::stdlib::package::create_package_lib());
        registry
    }

    pub fn add(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    pub fn install(self, vm: &mut LuaVm) {
        for module in self.modules {
            install_module(vm, module);
        }
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn install_module(vm: &mut LuaVm, module: LibraryModule) {
    let into_globals = module.name == "_G";
    let target = if into_globals {
        vm.globals()
    } else {
        let t: crate::lua_value::TableRef =
            std::rc::Rc::new(std::cell::RefCell::new(LuaTable::new()));
        vm.globals()
            .borrow_mut()
            .set_str(module.name, LuaValue::Table(t.clone()));
        t
    };

    for (name, entry) in module.entries {
        let value = match entry {
            LibraryEntry::Function(func) => {
                LuaValue::Function(LuaFunction::native(name, func))
            }
            LibraryEntry::Value(make) => make(vm),
        };
        target.borrow_mut().set_str(name, value);
    }

    if let Some(init) = module.initializer {
        init(vm);
    }
}
