// VM configuration
// Plain data, filled once at construction; no runtime mutation except
// through the collectgarbage tunable surface.

use crate::gc::GcTunables;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VmConfig {
    /// Initial collector tunables; mutable later through `collectgarbage`.
    pub gc: GcTunables,
    /// Hard cap on reader-function invocations in `load`.
    pub max_reader_chunks: usize,
    /// Depth limit for `__index`/`__newindex` metatable chains.
    pub metamethod_depth: usize,
    /// Depth limit for nested calls dispatched through the VM.
    pub call_depth_limit: usize,
    /// Template list for module resolution (`package.path`).
    pub package_path: String,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            gc: GcTunables::default(),
            max_reader_chunks: 10_000,
            metamethod_depth: 100,
            call_depth_limit: 200,
            package_path: "./?.lua;./?/init.lua".to_string(),
        }
    }
}
