// Package library
// Implements: require, package.loaded, package.preload, package.path,
// package.config, package.searchers, package.searchpath
//
// Module resolution order: package.loaded (a false entry is the
// "currently loading" marker that breaks require cycles), then
// package.preload, then a file next to the requiring script, then the
// ordered searcher list. Searchers return a (loader, data) pair or a
// diagnostic string that accumulates into the final not-found report.

use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};

use tracing::debug;

use crate::lib_registry::{require_arg, LibraryModule};
use crate::lua_value::{LuaFunction, LuaTable, LuaValue, TableRef};
use crate::lua_vm::{ChunkMode, LuaResult, LuaVm};

pub fn create_package_lib() -> LibraryModule {
    crate::lib_module!("package", {
        "searchpath" => package_searchpath,
    })
    .with_initializer(init_package_fields)
}

fn new_table_ref() -> TableRef {
    std::rc::Rc::new(std::cell::RefCell::new(LuaTable::new()))
}

// Initialize package library fields (runs after the module table exists)
fn init_package_fields(vm: &mut LuaVm) {
    let package_val = vm.get_global("package");
    let Some(package) = package_val.as_table() else {
        return;
    };

    let loaded = new_table_ref();
    let preload = new_table_ref();
    let searchers = new_table_ref();
    searchers.borrow_mut().set_int(
        1,
        LuaValue::Function(LuaFunction::native("preload_searcher", searcher_preload)),
    );
    searchers.borrow_mut().set_int(
        2,
        LuaValue::Function(LuaFunction::native("path_searcher", searcher_lua)),
    );

    let path_value = vm.config.package_path.clone();
    let config_str = format!("{}\n;\n?\n!\n-", MAIN_SEPARATOR_STR);

    {
        let mut p = package.borrow_mut();
        p.set_str("loaded", LuaValue::Table(loaded.clone()));
        p.set_str("preload", LuaValue::Table(preload.clone()));
        p.set_str("searchers", LuaValue::Table(searchers));
        p.set_str("path", LuaValue::string(crate::lua_value::LuaString::from_str(&path_value)));
        p.set_str("config", LuaValue::string(crate::lua_value::LuaString::from_str(&config_str)));
    }

    // The package module records itself; it was loaded before
    // package.loaded existed.
    loaded
        .borrow_mut()
        .set_str("package", package_val.clone());

    // Registry copies survive reassignment of the global 'package'.
    vm.registry_set("_LOADED", LuaValue::Table(loaded));
    vm.registry_set("_PRELOAD", LuaValue::Table(preload));
    vm.registry_set("_PACKAGE", package_val);

    vm.set_global(
        "require",
        LuaValue::Function(LuaFunction::native("require", lua_require)),
    );
}

/// require(name) - Load a module once, caching the result
fn lua_require(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let name_val = require_arg(args, 1, "require")?.clone();
    let Some(name) = name_val.as_str().map(str::to_string) else {
        return Err(vm.type_error(format!(
            "bad argument #1 to 'require' (string expected, got {})",
            name_val.type_name()
        )));
    };

    let Some(loaded) = vm.registry_get("_LOADED").as_table() else {
        return Err(vm.error("'package.loaded' table is missing"));
    };

    // Tri-state cache: absent, false ("currently loading"), or the value.
    // The false marker comes back as-is so require cycles terminate.
    let cached = loaded.borrow().raw_get(&name_val);
    if !cached.is_nil() {
        return Ok(cached);
    }

    let (loader, data) = find_loader(vm, &name, &name_val)?;
    debug!(module = %name, "loading module");

    loaded
        .borrow_mut()
        .raw_set(name_val.clone(), LuaValue::Boolean(false))?;
    let outcome = vm.call_value(loader, vec![name_val.clone(), data.clone()]);
    let value = match outcome {
        Ok(v) => v.first_value(),
        Err(err) => {
            loaded.borrow_mut().raw_set(name_val.clone(), LuaValue::Nil)?;
            return Err(err);
        }
    };

    // A module returning nothing stores true, unless it wrote its own
    // entry into package.loaded while running.
    let stored = if value.is_nil() {
        let current = loaded.borrow().raw_get(&name_val);
        match current {
            LuaValue::Nil | LuaValue::Boolean(false) => LuaValue::Boolean(true),
            other => other,
        }
    } else {
        value
    };
    loaded
        .borrow_mut()
        .raw_set(name_val.clone(), stored.clone())?;

    Ok(LuaValue::multi(vec![stored, data]))
}

/// Resolution order: preload, the requiring script's directory, then the
/// searcher list. Diagnostics accumulate into the failure report.
fn find_loader(
    vm: &mut LuaVm,
    name: &str,
    name_val: &LuaValue,
) -> LuaResult<(LuaValue, LuaValue)> {
    let mut diagnostics = String::new();

    if let Some(preload) = vm.registry_get("_PRELOAD").as_table() {
        let loader = preload.borrow().raw_get(name_val);
        if !loader.is_nil() {
            let data = vm.new_string(":preload:");
            return Ok((loader, data));
        }
        diagnostics.push_str(&format!("\n\tno field package.preload['{}']", name));
    }

    if let Some(dir) = vm
        .current_script_path()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
    {
        let candidate = dir.join(format!(
            "{}.lua",
            name.replace('.', MAIN_SEPARATOR_STR)
        ));
        if vm.resolver().exists(&candidate) {
            let data = vm.new_string(&candidate.display().to_string());
            return Ok((file_loader_value(), data));
        }
        diagnostics.push_str(&format!("\n\tno file '{}'", candidate.display()));
    }

    if let Some(package) = vm.registry_get("_PACKAGE").as_table() {
        let searchers = package.borrow().get_str("searchers");
        if let Some(searchers) = searchers.as_table() {
            let mut index = 1;
            loop {
                let searcher = searchers.borrow().get_int(index);
                if searcher.is_nil() {
                    break;
                }
                index += 1;
                let reply = vm
                    .call_value(searcher, vec![name_val.clone()])?
                    .into_values();
                match reply.first() {
                    Some(LuaValue::Function(_)) => {
                        let loader = reply[0].clone();
                        let data = reply.get(1).cloned().unwrap_or(LuaValue::Nil);
                        return Ok((loader, data));
                    }
                    Some(LuaValue::Str(msg)) => diagnostics.push_str(&msg.to_string_lossy()),
                    _ => {}
                }
            }
        }
    }

    Err(vm.error(format!("module '{}' not found:{}", name, diagnostics)))
}

fn file_loader_value() -> LuaValue {
    LuaValue::Function(LuaFunction::native("module_loader", lua_file_loader))
}

// Loader for modules resolved to files. Called as loader(modname, path);
// the module chunk runs with the script path switched to its own file,
// restored afterwards on every exit path.
fn lua_file_loader(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let modname = require_arg(args, 1, "require")?.clone();
    let path_val = require_arg(args, 2, "require")?.clone();
    let Some(path) = path_val.as_str().map(PathBuf::from) else {
        return Err(vm.type_error("module path must be a string"));
    };

    let chunk = vm
        .load_file(Some(&path), ChunkMode::Both, None)
        .map_err(|message| {
            vm.error(format!(
                "error loading module '{}' from file '{}':\n\t{}",
                modname, path.display(), message
            ))
        })?;

    vm.with_script_path(Some(path), |vm| {
        vm.call_value(chunk, vec![modname, path_val])
    })
}

// Searcher 1: package.preload (for direct invocation through the list)
fn searcher_preload(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let name_val = require_arg(args, 1, "require")?.clone();
    let Some(preload) = vm.registry_get("_PRELOAD").as_table() else {
        return Err(vm.error("'package.preload' table is missing"));
    };
    let loader = preload.borrow().raw_get(&name_val);
    if loader.is_nil() {
        let name = name_val.as_str().unwrap_or("?").to_string();
        let msg = vm.new_string(&format!("\n\tno field package.preload['{}']", name));
        return Ok(msg);
    }
    let tag = vm.new_string(":preload:");
    Ok(LuaValue::multi(vec![loader, tag]))
}

// Searcher 2: package.path templates
fn searcher_lua(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let name_val = require_arg(args, 1, "require")?.clone();
    let Some(name) = name_val.as_str().map(str::to_string) else {
        return Err(vm.type_error("module name must be a string"));
    };

    let path_str = vm
        .registry_get("_PACKAGE")
        .as_table()
        .map(|p| p.borrow().get_str("path"))
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    match vm.resolver().resolve_module_path(&name, &path_str) {
        Some(found) => {
            let data = vm.new_string(&found.display().to_string());
            Ok(LuaValue::multi(vec![file_loader_value(), data]))
        }
        None => {
            let tried = path_str
                .split(';')
                .map(|template| template.replace('?', &name.replace('.', "/")))
                .collect::<Vec<_>>()
                .join("'\n\tno file '");
            let msg = vm.new_string(&format!("\n\tno file '{}'", tried));
            Ok(msg)
        }
    }
}

/// package.searchpath(name, path [, sep [, rep]]) - Resolve a name
/// against a `?`-template list, or report every candidate tried
fn package_searchpath(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let name = require_arg(args, 1, "searchpath")?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| vm.type_error("bad argument #1 to 'searchpath' (string expected)"))?;
    let path = require_arg(args, 2, "searchpath")?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| vm.type_error("bad argument #2 to 'searchpath' (string expected)"))?;
    let sep = args
        .get(2)
        .and_then(|v| v.as_str())
        .unwrap_or(".")
        .to_string();
    let rep = args
        .get(3)
        .and_then(|v| v.as_str())
        .unwrap_or(MAIN_SEPARATOR_STR)
        .to_string();

    let searchname = if sep.is_empty() {
        name.clone()
    } else {
        name.replace(&sep, &rep)
    };
    let resolver = vm.resolver();
    for template in path.split(';') {
        let candidate = template.replace('?', &searchname);
        if resolver.exists(Path::new(&candidate)) {
            return Ok(vm.new_string(&candidate));
        }
    }
    let tried = path
        .split(';')
        .map(|template| template.replace('?', &searchname))
        .collect::<Vec<_>>()
        .join("'\n\tno file '");
    let msg = vm.new_string(&format!("\n\tno file '{}'", tried));
    Ok(LuaValue::multi(vec![LuaValue::Nil, msg]))
}
