//! Target configuration types.

/// Configuration of the code generation target
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Whether the target may run on more than one processor. Atomic
    /// fast paths get a lock prefix only when this is set.
    pub mp: bool,
    /// Alignment of method entry points in bytes
    pub code_entry_alignment: usize,
    /// Trace emitted instructions to stderr
    pub trace_codegen: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            mp: true,
            code_entry_alignment: 16,
            trace_codegen: false,
        }
    }
}
