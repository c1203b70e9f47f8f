// Lua-compatible runtime core
// Dynamic values, metatable dispatch, environments and closures with
// shared upvalues, protected calls, the GC control surface, and the
// chunk loader. Parsing and statement execution plug in from outside.

#[cfg(test)]
mod test;

pub mod config;
pub mod gc;
pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use config::VmConfig;
pub use gc::{GcMode, GcState, GcTunables};
pub use lib_registry::LibraryRegistry;
pub use lua_value::{
    LuaClosure, LuaFunction, LuaString, LuaTable, LuaUserdata, LuaValue, NativeFn, TableRef,
};
pub use lua_vm::{
    ChunkAst, ChunkMode, ChunkParser, ChunkSource, ControlSignal, EnvRef, Environment,
    FsSourceResolver, HostExecutor, LoadOptions, LuaError, LuaResult, LuaVm, PrefixStatus,
    SourceResolver, Upvalue, BINARY_CHUNK_MARKER,
};
