// Host collaborator boundary
//
// The parser, the statement executor and the filesystem are external to
// this crate; they plug in through these traits. The runtime never looks
// inside a parsed chunk: it carries the handle from the parser to the
// executor and wires environments and upvalues around it.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::lua_value::{LuaClosure, LuaValue};

use super::lua_error::{ControlSignal, LuaResult};
use super::lua_state::LuaVm;

/// A parsed chunk. Opaque here; the executor downcasts through `as_any`.
pub trait ChunkAst: Any {
    fn chunk_name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

/// Verdict on a partial source buffer while a reader is still producing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixStatus {
    /// No verdict yet; keep reading.
    NeedMore,
    /// The buffer already parses as a complete chunk.
    Complete,
    /// Unrecoverable lexical/syntactic damage: stop consuming the reader.
    Fatal(String),
}

pub trait ChunkParser {
    fn parse(&self, source: &[u8], chunk_name: &str) -> Result<Rc<dyn ChunkAst>, String>;

    /// Incremental check used between reader calls so a broken stream is
    /// rejected before it is consumed whole.
    fn check_prefix(&self, _source: &[u8], _chunk_name: &str) -> PrefixStatus {
        PrefixStatus::NeedMore
    }

    /// Pre-serialized chunk bodies (after the marker byte). The payload
    /// format belongs to the serializer, not to this crate.
    fn parse_binary(&self, _payload: &[u8], chunk_name: &str) -> Result<Rc<dyn ChunkAst>, String> {
        Err(format!("binary chunk '{}' is not supported by this host", chunk_name))
    }
}

pub trait SourceResolver {
    fn load_source(&self, path: &Path) -> Option<Vec<u8>>;

    fn exists(&self, path: &Path) -> bool {
        self.load_source(path).is_some()
    }

    /// Module-name resolution against one `?`-template list.
    fn resolve_module_path(&self, name: &str, search_path: &str) -> Option<PathBuf> {
        let replaced = name.replace('.', std::path::MAIN_SEPARATOR_STR);
        for template in search_path.split(';') {
            let candidate = PathBuf::from(template.replace('?', &replaced));
            if self.exists(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

/// Filesystem-backed resolver, the default for a standalone VM.
pub struct FsSourceResolver;

impl SourceResolver for FsSourceResolver {
    fn load_source(&self, path: &Path) -> Option<Vec<u8>> {
        std::fs::read(path).ok()
    }

    fn exists(&self, path: &Path) -> bool {
        std::fs::metadata(path).is_ok()
    }
}

/// The statement executor. Owns evaluation, coroutine scheduling and the
/// call stack; this crate owns everything around it.
pub trait HostExecutor {
    /// Run a closure body. The signal is the body's outcome; pending tail
    /// calls are completed by the caller.
    fn call_closure(
        &self,
        vm: &mut LuaVm,
        closure: &Rc<LuaClosure>,
        args: &[LuaValue],
    ) -> LuaResult<ControlSignal>;

    /// Additional GC roots (live call frames, coroutine stacks).
    fn extra_roots(&self) -> Vec<LuaValue> {
        Vec::new()
    }

    /// Human-readable call-stack context for top-level error reports.
    fn stack_trace(&self) -> Option<String> {
        None
    }
}
