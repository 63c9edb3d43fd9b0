//! IA-32 operand location types.
//!
//! `Register` names one of the eight general-purpose registers and
//! `Address` describes a memory operand in one of the four canonical
//! shapes (absolute, base, base + displacement, base + index * scale +
//! displacement).

use super::reloc::RelocType;

/// IA-32 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    Eax = 0, // Return value, allocator scratch
    Ecx = 1, // Shift counts
    Edx = 2, // High half of long results
    Ebx = 3,
    Esp = 4, // Stack pointer
    Ebp = 5, // Frame pointer
    Esi = 6,
    Edi = 7,
}

impl Register {
    /// Get the register number used in ModR/M and SIB encodings.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Check if this register can be addressed as an 8-bit operand.
    /// Only EAX, ECX, EDX and EBX have byte-sized subregisters.
    pub fn has_byte_register(self) -> bool {
        (self as u8) < 4
    }

    /// Get the 32-bit register name.
    pub fn name(self) -> &'static str {
        match self {
            Register::Eax => "eax",
            Register::Ecx => "ecx",
            Register::Edx => "edx",
            Register::Ebx => "ebx",
            Register::Esp => "esp",
            Register::Ebp => "ebp",
            Register::Esi => "esi",
            Register::Edi => "edi",
        }
    }

    /// Look up a register by its encoding number.
    pub fn from_code(code: u8) -> Register {
        match code {
            0 => Register::Eax,
            1 => Register::Ecx,
            2 => Register::Edx,
            3 => Register::Ebx,
            4 => Register::Esp,
            5 => Register::Ebp,
            6 => Register::Esi,
            7 => Register::Edi,
            _ => panic!("invalid register code {}", code),
        }
    }
}

/// Scale factors for indexed addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScaleFactor {
    Times1 = 0,
    Times2 = 1,
    Times4 = 2,
    Times8 = 3,
}

impl ScaleFactor {
    /// Get the scale bits for the SIB byte.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Get the multiplier this scale stands for.
    pub fn multiplier(self) -> u32 {
        1 << (self as u8)
    }
}

/// A memory operand.
///
/// The index register and the scale factor are either both present or
/// both absent, so they are stored as one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    base: Option<Register>,
    index: Option<(Register, ScaleFactor)>,
    disp: i32,
    rtype: RelocType,
}

impl Address {
    /// Create an absolute address (displacement only, no registers).
    pub fn absolute(disp: i32, rtype: RelocType) -> Self {
        Self {
            base: None,
            index: None,
            disp,
            rtype,
        }
    }

    /// Create a base-register address without displacement.
    pub fn base(base: Register) -> Self {
        Self::base_disp(base, 0)
    }

    /// Create a base-register address with displacement.
    pub fn base_disp(base: Register, disp: i32) -> Self {
        Self {
            base: Some(base),
            index: None,
            disp,
            rtype: RelocType::None,
        }
    }

    /// Create a base + index * scale + displacement address.
    pub fn base_index(base: Register, index: Register, scale: ScaleFactor, disp: i32) -> Self {
        assert!(index != Register::Esp, "illegal index register");
        Self {
            base: Some(base),
            index: Some((index, scale)),
            disp,
            rtype: RelocType::None,
        }
    }

    /// Create an index * scale + displacement address without a base.
    pub fn index_disp(index: Register, scale: ScaleFactor, disp: i32) -> Self {
        assert!(index != Register::Esp, "illegal index register");
        Self {
            base: None,
            index: Some((index, scale)),
            disp,
            rtype: RelocType::None,
        }
    }

    pub fn base_reg(&self) -> Option<Register> {
        self.base
    }

    /// Get the index register and scale factor, if any.
    pub fn index(&self) -> Option<(Register, ScaleFactor)> {
        self.index
    }

    pub fn index_reg(&self) -> Option<Register> {
        self.index.map(|(reg, _)| reg)
    }

    pub fn scale(&self) -> Option<ScaleFactor> {
        self.index.map(|(_, scale)| scale)
    }

    pub fn disp(&self) -> i32 {
        self.disp
    }

    pub fn rtype(&self) -> RelocType {
        self.rtype
    }

    /// Check if this address uses the specified register.
    pub fn uses(&self, reg: Register) -> bool {
        self.base == Some(reg) || self.index_reg() == Some(reg)
    }
}
