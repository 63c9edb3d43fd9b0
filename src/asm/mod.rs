//! IA-32 code emission and inspection.
//!
//! This module contains the code generation core:
//! - Operand value types (registers and addresses)
//! - Code buffer with relocation and debug-info side tables
//! - x86 instruction encoding with forward-reference patching
//! - x87 floating-point stack simulation
//! - Composite emission idioms (frames, locking, allocation)
//! - A disassembler for diagnostics and round-trip checks
//! - Executable memory allocation

mod assembler;
mod codebuf;
pub mod disasm;
mod fpu;
mod label;
mod macroasm;
mod memory;
mod register;
pub mod reloc;

pub use assembler::{
    Assembler, Cond, CALL32_OPERAND, CS_SEGMENT, DISP32_OPERAND, DS_SEGMENT, ES_SEGMENT,
    FPU_STATE_SIZE_IN_WORDS, FS_SEGMENT, GS_SEGMENT, IMM32_OPERAND, SS_SEGMENT,
};
pub use codebuf::{CodeBuffer, DebugEntry, Oop};
pub use disasm::Disassembler;
pub use fpu::FpuStack;
pub use label::{Displacement, DispKind, Label};
pub use macroasm::{MacroAssembler, RuntimeLayout};
pub use memory::{ExecutableMemory, MemoryError};
pub use register::{Address, Register, ScaleFactor};
pub use reloc::{RelocInfo, RelocType};
