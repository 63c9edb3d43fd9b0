//! Ferrite - an IA-32 machine-code generation backend
//!
//! This library turns abstract operand descriptions into byte-exact x86
//! instruction streams, tracks relocation metadata for a moving collector,
//! and can disassemble the result for verification.

pub mod asm;
pub mod config;

// Re-export commonly used types
pub use asm::{Address, Assembler, CodeBuffer, Cond, Disassembler, Label, MacroAssembler, Register};
pub use config::TargetConfig;
