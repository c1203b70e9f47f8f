// VM core: session context, environments, dispatch, protection, loading.
mod chunk_loader;
mod environment;
mod host;
mod lua_error;
mod lua_state;
pub mod metamethod;
mod protected;
mod upvalue;

pub use chunk_loader::{ChunkMode, ChunkSource, LoadOptions, BINARY_CHUNK_MARKER};
pub use environment::{EnvRef, Environment};
pub use host::{ChunkAst, ChunkParser, FsSourceResolver, HostExecutor, PrefixStatus, SourceResolver};
pub use lua_error::{ControlSignal, LuaError, LuaResult};
pub use lua_state::LuaVm;
pub use protected::ProtectionState;
pub use upvalue::Upvalue;
