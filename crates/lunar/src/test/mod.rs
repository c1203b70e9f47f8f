// Integration tests with stub host collaborators: a scriptable executor
// standing in for the statement runner and a parser producing chunks
// whose bodies are Rust closures.

mod test_closures;
mod test_package;
mod test_pcall;

use std::any::Any;
use std::rc::Rc;

use crate::lua_value::{LuaClosure, LuaValue};
use crate::lua_vm::{
    ChunkAst, ChunkParser, ControlSignal, HostExecutor, LuaResult, LuaVm, PrefixStatus,
};

type ChunkBody = Rc<dyn Fn(&mut LuaVm, &Rc<LuaClosure>, &[LuaValue]) -> LuaResult<ControlSignal>>;

/// A chunk whose "AST" is a Rust closure.
pub(crate) struct ScriptChunk {
    name: String,
    body: ChunkBody,
}

impl ScriptChunk {
    pub fn new(
        name: &str,
        body: impl Fn(&mut LuaVm, &Rc<LuaClosure>, &[LuaValue]) -> LuaResult<ControlSignal> + 'static,
    ) -> Rc<dyn ChunkAst> {
        Rc::new(Self {
            name: name.to_string(),
            body: Rc::new(body),
        })
    }
}

impl ChunkAst for ScriptChunk {
    fn chunk_name(&self) -> &str {
        &self.name
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct ScriptExecutor;

impl HostExecutor for ScriptExecutor {
    fn call_closure(
        &self,
        vm: &mut LuaVm,
        closure: &Rc<LuaClosure>,
        args: &[LuaValue],
    ) -> LuaResult<ControlSignal> {
        let body = {
            let chunk = closure
                .chunk
                .as_any()
                .downcast_ref::<ScriptChunk>()
                .expect("executor only runs script chunks");
            chunk.body.clone()
        };
        body(vm, closure, args)
    }
}

/// Parser stub. The source `return answer` "parses" to a body that
/// reads `answer` through the chunk's `_ENV` upvalue; anything else
/// parses to a body echoing the source text back. Sources containing
/// `@@fail@@` are a parse error, and a prefix containing `@@bad@@` is
/// fatally broken mid-read.
pub(crate) struct ScriptParser;

impl ChunkParser for ScriptParser {
    fn parse(&self, source: &[u8], chunk_name: &str) -> Result<Rc<dyn ChunkAst>, String> {
        if contains(source, b"@@fail@@") {
            return Err(format!("{}: syntax error near '@@fail@@'", chunk_name));
        }
        if source == b"return answer" {
            return Ok(ScriptChunk::new(chunk_name, |vm, closure, _args| {
                let env = closure.get_upvalue(1).unwrap_or(LuaValue::Nil);
                let key = vm.new_string("answer");
                let value = crate::lua_vm::metamethod::index(vm, &env, &key)?;
                Ok(ControlSignal::Return(value))
            }));
        }
        let captured = source.to_vec();
        Ok(ScriptChunk::new(chunk_name, move |vm, _closure, _args| {
            let echoed = vm.new_string_bytes(&captured);
            Ok(ControlSignal::Return(echoed))
        }))
    }

    fn check_prefix(&self, source: &[u8], _chunk_name: &str) -> PrefixStatus {
        if contains(source, b"@@bad@@") {
            PrefixStatus::Fatal("unfinished long comment".to_string())
        } else {
            PrefixStatus::NeedMore
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// A VM wired to the stub collaborators.
pub(crate) fn new_vm() -> LuaVm {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut vm = LuaVm::new();
    vm.set_executor(Rc::new(ScriptExecutor));
    vm.set_parser(Rc::new(ScriptParser));
    vm
}

/// Call a global function by name.
pub(crate) fn call_global(vm: &mut LuaVm, name: &str, args: Vec<LuaValue>) -> LuaResult<LuaValue> {
    let func = vm.get_global(name);
    vm.call_value(func, args)
}
