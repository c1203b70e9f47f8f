// Chunk loading
//
// load/loadfile pipeline: acquire source (literal bytes or a reader
// function), classify text vs. pre-serialized, enforce the caller's mode
// string, hand off to the parser, then wire the closure to a fresh
// environment. Failures come back as `Err(message)` and the stdlib glue
// turns them into the `(nil, message)` convention.

use std::io::Read;
use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::lua_value::{LuaClosure, LuaFunction, LuaValue};

use super::environment::Environment;
use super::host::{ChunkAst, PrefixStatus};
use super::lua_error::LuaResult;
use super::lua_state::LuaVm;

/// Marker byte distinguishing a pre-serialized chunk from source text.
pub const BINARY_CHUNK_MARKER: u8 = 0x1b;

pub enum ChunkSource {
    Bytes(Vec<u8>),
    /// A callable invoked with no arguments until it returns nil or an
    /// empty string; the pieces concatenate into the chunk.
    Reader(LuaValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    Text,
    Binary,
    Both,
}

impl ChunkMode {
    pub fn parse(mode: Option<&str>) -> Result<ChunkMode, String> {
        match mode {
            None | Some("bt") => Ok(ChunkMode::Both),
            Some("t") => Ok(ChunkMode::Text),
            Some("b") => Ok(ChunkMode::Binary),
            Some(other) => Err(format!("invalid mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    Text,
    Binary,
}

impl ChunkKind {
    fn name(self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::Binary => "binary",
        }
    }
}

pub struct LoadOptions {
    pub name: Option<String>,
    pub mode: ChunkMode,
    /// `Some(Nil)` is a provided environment and is observably different
    /// from `None`: an explicitly nil `_ENV` still isolates the chunk.
    pub env: Option<LuaValue>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self {
            name: None,
            mode: ChunkMode::Both,
            env: None,
        }
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaVm {
    /// The `load` pipeline. Returns the callable chunk closure, or the
    /// message for a `(nil, message)` reply.
    pub fn load_chunk(
        &mut self,
        source: ChunkSource,
        options: LoadOptions,
    ) -> Result<LuaValue, String> {
        let name = options.name.clone().unwrap_or_else(|| "=(load)".to_string());
        let bytes = self.acquire_source(source, &name)?;
        let kind = classify_chunk(&bytes);
        enforce_mode(kind, options.mode)?;
        debug!(chunk = %name, kind = kind.name(), len = bytes.len(), "loading chunk");

        let parser = self
            .parser()
            .ok_or_else(|| "no parser installed".to_string())?;
        let chunk = match kind {
            ChunkKind::Text => parser.parse(&bytes, &name)?,
            ChunkKind::Binary => parser.parse_binary(&bytes, &name)?,
        };
        Ok(self.build_chunk_closure(chunk, options.env))
    }

    /// `loadfile`: path through the source resolver, no path means the
    /// host's standard input.
    pub fn load_file(
        &mut self,
        path: Option<&Path>,
        mode: ChunkMode,
        env: Option<LuaValue>,
    ) -> Result<LuaValue, String> {
        let (bytes, name) = match path {
            Some(p) => {
                let bytes = self
                    .resolver()
                    .load_source(p)
                    .ok_or_else(|| format!("cannot open '{}'", p.display()))?;
                (bytes, format!("@{}", p.display()))
            }
            None => {
                let mut bytes = Vec::new();
                std::io::stdin()
                    .read_to_end(&mut bytes)
                    .map_err(|e| format!("cannot read stdin: {}", e))?;
                (bytes, "=stdin".to_string())
            }
        };
        self.load_chunk(
            ChunkSource::Bytes(bytes),
            LoadOptions {
                name: Some(name),
                mode,
                env,
            },
        )
    }

    fn acquire_source(&mut self, source: ChunkSource, name: &str) -> Result<Vec<u8>, String> {
        match source {
            ChunkSource::Bytes(b) => Ok(b),
            ChunkSource::Reader(reader) => self.drain_reader(reader, name),
        }
    }

    /// The reader protocol: call with no arguments until nil or an empty
    /// string, concatenating pieces. The call count is capped, and the
    /// growing buffer is checked after every piece so an unrecoverable
    /// lexical error stops the stream immediately.
    fn drain_reader(&mut self, reader: LuaValue, name: &str) -> Result<Vec<u8>, String> {
        let mut buffer: Vec<u8> = Vec::new();
        let max_calls = self.config.max_reader_chunks;
        for _ in 0..max_calls {
            let piece = self
                .call_value(reader.clone(), Vec::new())
                .map_err(|e| e.to_string())?
                .first_value();
            match piece {
                LuaValue::Nil => return Ok(buffer),
                LuaValue::Str(s) => {
                    if s.is_empty() {
                        return Ok(buffer);
                    }
                    buffer.extend_from_slice(s.as_bytes());
                    // Binary payloads are opaque; only text prefixes are
                    // worth checking early.
                    if classify_chunk(&buffer) == ChunkKind::Text {
                        if let Some(parser) = self.parser() {
                            if let PrefixStatus::Fatal(msg) = parser.check_prefix(&buffer, name) {
                                return Err(msg);
                            }
                        }
                    }
                }
                other => {
                    return Err(format!(
                        "reader function must return a string (got {})",
                        other.type_name()
                    ));
                }
            }
        }
        Err("too many chunks".to_string())
    }

    /// Wire a parsed chunk to its environment. An explicit environment
    /// argument produces a parentless isolated scope with `_ENV` bound to
    /// it; otherwise the chunk sees only the globals table, never the
    /// caller's locals.
    pub(crate) fn build_chunk_closure(
        &mut self,
        chunk: Rc<dyn ChunkAst>,
        env_arg: Option<LuaValue>,
    ) -> LuaValue {
        let env = Environment::isolated();
        match env_arg {
            Some(env_value) => {
                env.declare("_ENV", env_value.clone());
                env.declare("_G", env_value);
            }
            None => {
                let globals = LuaValue::Table(self.globals());
                env.declare("_ENV", globals.clone());
                env.declare("_G", globals);
            }
        }
        let closure = LuaClosure::with_chunk_upvalues(chunk, env);
        LuaValue::Function(LuaFunction::Closure(Rc::new(closure)))
    }

    /// `dofile`: load and immediately run, errors propagating unprotected.
    pub fn do_file(&mut self, path: Option<&Path>) -> LuaResult<LuaValue> {
        match self.load_file(path, ChunkMode::Both, None) {
            Ok(chunk) => self.call_value(chunk, Vec::new()),
            Err(message) => Err(super::lua_error::LuaError::Load(message)),
        }
    }
}

fn classify_chunk(bytes: &[u8]) -> ChunkKind {
    if bytes.first() == Some(&BINARY_CHUNK_MARKER) {
        ChunkKind::Binary
    } else {
        ChunkKind::Text
    }
}

fn enforce_mode(kind: ChunkKind, mode: ChunkMode) -> Result<(), String> {
    let allowed = match mode {
        ChunkMode::Both => true,
        ChunkMode::Text => kind == ChunkKind::Text,
        ChunkMode::Binary => kind == ChunkKind::Binary,
    };
    if allowed {
        Ok(())
    } else {
        Err(format!("attempt to load a {} chunk (mode is '{}')", kind.name(), match mode {
            ChunkMode::Text => "t",
            ChunkMode::Binary => "b",
            ChunkMode::Both => "bt",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(classify_chunk(b"print(1)"), ChunkKind::Text);
        assert_eq!(classify_chunk(&[0x1b, b'L']), ChunkKind::Binary);
        assert_eq!(classify_chunk(b""), ChunkKind::Text);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(ChunkMode::parse(None).unwrap(), ChunkMode::Both);
        assert_eq!(ChunkMode::parse(Some("t")).unwrap(), ChunkMode::Text);
        assert_eq!(ChunkMode::parse(Some("b")).unwrap(), ChunkMode::Binary);
        assert!(ChunkMode::parse(Some("x")).is_err());
    }

    #[test]
    fn test_mode_enforcement_names_offender() {
        let err = enforce_mode(ChunkKind::Binary, ChunkMode::Text).unwrap_err();
        assert!(err.contains("binary chunk"));
        assert!(err.contains("'t'"));
        let err = enforce_mode(ChunkKind::Text, ChunkMode::Binary).unwrap_err();
        assert!(err.contains("text chunk"));
    }
}
