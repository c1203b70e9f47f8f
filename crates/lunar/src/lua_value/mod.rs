// Runtime value model: tagged values, byte strings, tables, callables.
mod lua_function;
mod lua_string;
mod lua_table;
mod lua_value;

pub use lua_function::{LuaClosure, LuaFunction, NativeClosure, NativeFn};
pub use lua_string::LuaString;
pub(crate) use lua_string::content_hash;
pub use lua_table::{LuaKey, LuaTable, TableRef};
pub use lua_value::{LuaUserdata, LuaValue, LuaValueKind};
pub(crate) use lua_value::{float_to_exact_int, format_float};
