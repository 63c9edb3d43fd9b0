//! IA-32 instruction encoding.
//!
//! One method per mnemonic and operand shape. All encodings are subsets
//! of the general instruction format: prefixes, opcode, ModR/M, SIB,
//! displacement, immediate. Methods are named after the mnemonic with a
//! suffix giving the operand shapes: `r` register, `a` address, `i`
//! immediate, `o` object pointer, so `movl_ra` moves from an address
//! into a register. FPU instructions address their operands as ST(i)
//! offsets relative to the current top of the register stack.
//!
//! Instructions that embed relocatable values are bracketed by an
//! instruction mark tying the relocation record to the instruction
//! start rather than to the position of the embedded word.

use super::codebuf::{CodeBuffer, Oop};
use super::label::{DispKind, Displacement, Label};
use super::register::{Address, Register, ScaleFactor};
use super::reloc::{RelocInfo, RelocType};

/// Segment override prefixes.
pub const CS_SEGMENT: u8 = 0x2e;
pub const SS_SEGMENT: u8 = 0x36;
pub const DS_SEGMENT: u8 = 0x3e;
pub const ES_SEGMENT: u8 = 0x26;
pub const FS_SEGMENT: u8 = 0x64;
pub const GS_SEGMENT: u8 = 0x65;

/// The size of the FPU state in 32-bit words.
pub const FPU_STATE_SIZE_IN_WORDS: i32 = 27;

/// Selects the embedded 32-bit immediate operand.
pub const IMM32_OPERAND: u16 = 0;
/// Selects the embedded 32-bit displacement or address.
pub const DISP32_OPERAND: u16 = 1;
/// Selects the embedded self-relative displacement.
pub const CALL32_OPERAND: u16 = 2;

/// Condition codes for `jcc`, `setb` and `cmovl`.
///
/// Some conditions share an encoding; the alias constants are provided
/// only to make call sites more intelligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    Overflow = 0x0,
    NoOverflow = 0x1,
    Below = 0x2,
    AboveEqual = 0x3,
    Equal = 0x4,
    NotEqual = 0x5,
    BelowEqual = 0x6,
    Above = 0x7,
    Negative = 0x8,
    Positive = 0x9,
    Parity = 0xa,
    NoParity = 0xb,
    Less = 0xc,
    GreaterEqual = 0xd,
    LessEqual = 0xe,
    Greater = 0xf,
}

impl Cond {
    pub const CARRY_SET: Cond = Cond::Below;
    pub const CARRY_CLEAR: Cond = Cond::AboveEqual;
    pub const ZERO: Cond = Cond::Equal;
    pub const NOT_ZERO: Cond = Cond::NotEqual;

    /// Get the condition code nibble.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Invert the condition.
    pub fn invert(self) -> Cond {
        match self {
            Cond::Overflow => Cond::NoOverflow,
            Cond::NoOverflow => Cond::Overflow,
            Cond::Below => Cond::AboveEqual,
            Cond::AboveEqual => Cond::Below,
            Cond::Equal => Cond::NotEqual,
            Cond::NotEqual => Cond::Equal,
            Cond::BelowEqual => Cond::Above,
            Cond::Above => Cond::BelowEqual,
            Cond::Negative => Cond::Positive,
            Cond::Positive => Cond::Negative,
            Cond::Parity => Cond::NoParity,
            Cond::NoParity => Cond::Parity,
            Cond::Less => Cond::GreaterEqual,
            Cond::GreaterEqual => Cond::Less,
            Cond::LessEqual => Cond::Greater,
            Cond::Greater => Cond::LessEqual,
        }
    }
}

/// Check if a value fits a signed byte.
pub(crate) fn is_8bit(x: i32) -> bool {
    (-128..128).contains(&x)
}

/// Check if a value fits an unsigned byte.
pub(crate) fn is_byte(x: i32) -> bool {
    (0..256).contains(&x)
}

fn is_shift_count(x: i32) -> bool {
    (0..32).contains(&x)
}

/// The instruction encoder.
pub struct Assembler<'a> {
    buf: &'a mut CodeBuffer,
    /// Start of the current instruction while a relocatable value is
    /// being emitted, 0 otherwise
    instr_mark: i32,
}

impl<'a> Assembler<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf, instr_mark: 0 }
    }

    /// Get the underlying code buffer.
    pub fn buf(&mut self) -> &mut CodeBuffer {
        self.buf
    }

    /// Get the address of the first byte of the code.
    pub fn code_begin(&self) -> i32 {
        self.buf.code_begin()
    }

    /// Get the current code generation address.
    pub fn code_pos(&self) -> i32 {
        self.buf.code_end()
    }

    /// Get the current code generation offset.
    pub fn offset(&self) -> i32 {
        self.code_pos() - self.code_begin()
    }

    // ==================== Primitive emission ====================

    /// Emit one byte.
    pub fn emit_byte(&mut self, x: u8) {
        self.buf.append(x);
    }

    /// Emit a 16-bit value (little-endian).
    pub fn emit_int(&mut self, x: u16) {
        self.emit_byte(x as u8);
        self.emit_byte((x >> 8) as u8);
    }

    /// Emit a 32-bit value (little-endian).
    pub fn emit_long(&mut self, x: i32) {
        self.emit_int(x as u16);
        self.emit_int((x as u32 >> 16) as u16);
    }

    pub fn byte_at(&self, pos: i32) -> u8 {
        self.buf.byte_at(pos as usize)
    }

    pub fn int_at(&self, pos: i32) -> u16 {
        (self.byte_at(pos) as u16) | ((self.byte_at(pos + 1) as u16) << 8)
    }

    pub fn long_at(&self, pos: i32) -> i32 {
        (self.int_at(pos) as i32) | ((self.int_at(pos + 2) as i32) << 16)
    }

    pub fn set_byte_at(&mut self, pos: i32, x: u8) {
        self.buf.set_byte_at(pos as usize, x);
    }

    pub fn set_int_at(&mut self, pos: i32, x: u16) {
        self.set_byte_at(pos, x as u8);
        self.set_byte_at(pos + 1, (x >> 8) as u8);
    }

    pub fn set_long_at(&mut self, pos: i32, x: i32) {
        self.set_int_at(pos, x as u16);
        self.set_int_at(pos + 2, (x as u32 >> 16) as u16);
    }

    // ==================== Relocation ====================

    /// Mark the current instruction as using relocatable values.
    fn mark_instruction(&mut self) {
        assert!(self.instr_mark == 0, "overlapping instructions");
        self.instr_mark = self.code_pos();
    }

    /// Reset the instruction mark.
    fn unmark_instruction(&mut self) {
        self.instr_mark = 0;
    }

    /// Record relocation information for the current instruction.
    pub fn relocate_info(&mut self, reloc: RelocInfo, format: u16) {
        assert!(
            self.instr_mark == 0 || self.instr_mark == self.code_pos(),
            "relocate between instructions"
        );
        let at = self.code_pos();
        self.buf.relocate_info(at, reloc, format);
    }

    /// Record relocation information of the given type.
    pub fn relocate(&mut self, rtype: RelocType) {
        if rtype != RelocType::None {
            self.relocate_info(RelocInfo::new(rtype), 0);
        }
    }

    /// Emit a 32-bit value, recording relocation information at the
    /// instruction mark when the value is relocatable.
    fn emit_data_info(&mut self, data: i32, reloc: RelocInfo, format: u16) {
        if reloc.type_code() != RelocType::None.code() {
            assert!(self.instr_mark != 0, "must be inside instruction mark");
            self.buf.relocate_info(self.instr_mark, reloc, format);
        }
        self.emit_long(data);
    }

    fn emit_data(&mut self, data: i32, rtype: RelocType, format: u16) {
        if rtype == RelocType::None {
            self.emit_long(data);
        } else {
            self.emit_data_info(data, RelocInfo::new(rtype), format);
        }
    }

    /// Emit an object pointer as its index in the oop table, with an
    /// oop relocation.
    fn emit_data_oop(&mut self, oop: Oop) {
        let index = self.buf.record_oop(oop) as i32;
        self.emit_data(index, RelocType::Oop, 0);
    }

    // ==================== Encoding helpers ====================

    /// Emit an arithmetic instruction with an 8-bit immediate operand.
    fn emit_arith_byte(&mut self, op1: u8, op2: u8, dst: Register, imm8: i32) {
        assert!(op1 & 0x01 == 0, "wrong operation code");
        assert!(dst.has_byte_register(), "must have byte register");
        assert!(is_byte(imm8), "immediate out of range");
        self.emit_byte(op1);
        self.emit_byte(op2 | dst.code());
        self.emit_byte(imm8 as u8);
    }

    /// Emit an arithmetic instruction with a 32-bit immediate operand,
    /// using the sign-extended 8-bit form when possible.
    fn emit_arith_imm(&mut self, op1: u8, op2: u8, dst: Register, imm32: i32) {
        assert!(op1 & 0x03 == 1, "wrong operation code");
        if is_8bit(imm32) {
            self.emit_byte(op1 | 0x02);
            self.emit_byte(op2 | dst.code());
            self.emit_byte(imm32 as u8);
        } else {
            self.emit_byte(op1);
            self.emit_byte(op2 | dst.code());
            self.emit_long(imm32);
        }
    }

    /// Emit an arithmetic instruction with a register operand.
    fn emit_arith(&mut self, op1: u8, op2: u8, dst: Register, src: Register) {
        self.emit_byte(op1);
        self.emit_byte(op2 | (dst.code() << 3) | src.code());
    }

    /// Emit an arithmetic instruction with an object pointer operand.
    fn emit_arith_oop(&mut self, op1: u8, op2: u8, dst: Register, oop: Oop) {
        assert!(op1 & 0x03 == 1, "wrong operation code");
        self.mark_instruction();
        self.emit_byte(op1);
        self.emit_byte(op2 | dst.code());
        self.emit_data_oop(oop);
        self.unmark_instruction();
    }

    fn emit_sib(&mut self, scale: ScaleFactor, index: Register, base: Register) {
        self.emit_byte((scale.code() << 6) | (index.code() << 3) | base.code());
    }

    /// Emit the ModR/M byte and everything after it for a memory
    /// operand, choosing the shortest displacement encoding that
    /// represents the exact value.
    fn emit_operand(&mut self, reg: Register, adr: Address) {
        let rtype = adr.rtype();
        let disp = adr.disp();
        let reloc = match rtype {
            RelocType::None => RelocInfo::new(RelocType::None),
            RelocType::InternalWord => {
                let offset = self.instr_mark - disp;
                RelocInfo::with_data(RelocType::InternalWord, offset)
            }
            _ => panic!("unexpected relocation type for operand"),
        };
        let plain = rtype == RelocType::None;
        match (adr.base_reg(), adr.index()) {
            (Some(base), Some((index, scale))) => {
                assert!(index != Register::Esp, "illegal addressing mode");
                if disp == 0 && plain && base != Register::Ebp {
                    self.emit_byte(0x04 | (reg.code() << 3));
                    self.emit_sib(scale, index, base);
                } else if is_8bit(disp) && plain {
                    self.emit_byte(0x44 | (reg.code() << 3));
                    self.emit_sib(scale, index, base);
                    self.emit_byte(disp as u8);
                } else {
                    self.emit_byte(0x84 | (reg.code() << 3));
                    self.emit_sib(scale, index, base);
                    self.emit_data_info(disp, reloc, DISP32_OPERAND);
                }
            }
            (Some(base), None) if base == Register::Esp => {
                // ESP as base always needs a SIB byte.
                if disp == 0 && plain {
                    self.emit_byte(0x04 | (reg.code() << 3));
                    self.emit_byte(0x24);
                } else if is_8bit(disp) && plain {
                    self.emit_byte(0x44 | (reg.code() << 3));
                    self.emit_byte(0x24);
                    self.emit_byte(disp as u8);
                } else {
                    self.emit_byte(0x84 | (reg.code() << 3));
                    self.emit_byte(0x24);
                    self.emit_data_info(disp, reloc, DISP32_OPERAND);
                }
            }
            (Some(base), None) => {
                // Mod 00 with EBP as base would decode as disp32 only.
                if disp == 0 && plain && base != Register::Ebp {
                    self.emit_byte(reg.code() << 3 | base.code());
                } else if is_8bit(disp) && plain {
                    self.emit_byte(0x40 | (reg.code() << 3) | base.code());
                    self.emit_byte(disp as u8);
                } else {
                    self.emit_byte(0x80 | (reg.code() << 3) | base.code());
                    self.emit_data_info(disp, reloc, DISP32_OPERAND);
                }
            }
            (None, Some((index, scale))) => {
                assert!(index != Register::Esp, "illegal addressing mode");
                self.emit_byte(0x04 | (reg.code() << 3));
                self.emit_byte((scale.code() << 6) | (index.code() << 3) | 0x05);
                self.emit_data_info(disp, reloc, DISP32_OPERAND);
            }
            (None, None) => {
                self.emit_byte(0x05 | (reg.code() << 3));
                self.emit_data_info(disp, reloc, DISP32_OPERAND);
            }
        }
    }

    /// Emit a floating-point arithmetic instruction for stack offset i.
    fn emit_farith(&mut self, op1: u8, op2: u8, i: i32) {
        assert!((0..8).contains(&i), "illegal stack offset");
        self.emit_byte(op1);
        self.emit_byte(op2 + i as u8);
    }

    // ==================== Labels ====================

    /// Emit a displacement for a branch to a yet unknown position and
    /// link the label to it.
    fn emit_disp(&mut self, label: &mut Label, kind: DispKind, info: u8) {
        let disp = Displacement::new(label, kind, info);
        label.link_to(self.offset());
        self.emit_long(disp.data());
    }

    /// Bind the label to the specified code position, patching every
    /// pending forward reference in its chain.
    pub fn bind_to(&mut self, label: &mut Label, pos: i32) {
        assert!(
            pos >= 0 && pos <= self.offset(),
            "must have a valid binding position"
        );
        while label.is_unbound() {
            let fixup_pos = label.pos();
            let disp = Displacement::from_data(self.long_at(fixup_pos));
            #[cfg(debug_assertions)]
            match disp.kind() {
                DispKind::Call => {
                    assert!(self.byte_at(fixup_pos - 1) == 0xe8, "procedure call expected");
                }
                DispKind::AbsoluteJump => {
                    assert!(self.byte_at(fixup_pos - 1) == 0xe9, "absolute jump expected");
                }
                DispKind::ConditionalJump => {
                    assert!(
                        self.byte_at(fixup_pos - 2) == 0x0f
                            && self.byte_at(fixup_pos - 1) == 0x80 | disp.info(),
                        "conditional jump expected"
                    );
                }
            }
            self.set_long_at(fixup_pos, pos - (fixup_pos + 4));
            disp.next(label);
        }
        label.bind_to(pos);
    }

    /// Bind the label to the current code position.
    pub fn bind(&mut self, label: &mut Label) {
        assert!(!label.is_bound(), "label can be bound once only");
        let pos = self.offset();
        self.bind_to(label, pos);
    }

    // ==================== Data movement ====================

    pub fn movl_rr(&mut self, dst: Register, src: Register) {
        self.emit_byte(0x8b);
        self.emit_byte(0xc0 | (dst.code() << 3) | src.code());
    }

    pub fn movl_ri(&mut self, dst: Register, imm32: i32) {
        self.emit_byte(0xb8 | dst.code());
        self.emit_long(imm32);
    }

    pub fn movl_ro(&mut self, dst: Register, oop: Oop) {
        self.mark_instruction();
        self.emit_byte(0xb8 | dst.code());
        self.emit_data_oop(oop);
        self.unmark_instruction();
    }

    pub fn movl_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x8b);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn movl_ar(&mut self, dst: Address, src: Register) {
        self.mark_instruction();
        self.emit_byte(0x89);
        self.emit_operand(src, dst);
        self.unmark_instruction();
    }

    pub fn movl_ai(&mut self, dst: Address, imm32: i32) {
        self.mark_instruction();
        self.emit_byte(0xc7);
        self.emit_operand(Register::Eax, dst);
        self.emit_long(imm32);
        self.unmark_instruction();
    }

    pub fn movl_ao(&mut self, dst: Address, oop: Oop) {
        self.mark_instruction();
        self.emit_byte(0xc7);
        self.emit_operand(Register::Eax, dst);
        self.emit_data_oop(oop);
        self.unmark_instruction();
    }

    pub fn movb_ra(&mut self, dst: Register, src: Address) {
        assert!(dst.has_byte_register(), "must have byte register");
        self.mark_instruction();
        self.emit_byte(0x8a);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn movb_ar(&mut self, dst: Address, src: Register) {
        assert!(src.has_byte_register(), "must have byte register");
        self.mark_instruction();
        self.emit_byte(0x88);
        self.emit_operand(src, dst);
        self.unmark_instruction();
    }

    pub fn movb_ai(&mut self, dst: Address, imm8: i32) {
        self.mark_instruction();
        self.emit_byte(0xc6);
        self.emit_operand(Register::Eax, dst);
        self.emit_byte(imm8 as u8);
        self.unmark_instruction();
    }

    pub fn movw_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x66);
        self.emit_byte(0x8b);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn movw_ar(&mut self, dst: Address, src: Register) {
        self.mark_instruction();
        self.emit_byte(0x66);
        self.emit_byte(0x89);
        self.emit_operand(src, dst);
        self.unmark_instruction();
    }

    pub fn movsxb_rr(&mut self, dst: Register, src: Register) {
        assert!(src.has_byte_register(), "must have byte register");
        self.emit_byte(0x0f);
        self.emit_byte(0xbe);
        self.emit_byte(0xc0 | (dst.code() << 3) | src.code());
    }

    pub fn movsxb_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x0f);
        self.emit_byte(0xbe);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn movsxw_rr(&mut self, dst: Register, src: Register) {
        self.emit_byte(0x0f);
        self.emit_byte(0xbf);
        self.emit_byte(0xc0 | (dst.code() << 3) | src.code());
    }

    pub fn movsxw_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x0f);
        self.emit_byte(0xbf);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn movzxb_rr(&mut self, dst: Register, src: Register) {
        assert!(src.has_byte_register(), "must have byte register");
        self.emit_byte(0x0f);
        self.emit_byte(0xb6);
        self.emit_byte(0xc0 | (dst.code() << 3) | src.code());
    }

    pub fn movzxb_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x0f);
        self.emit_byte(0xb6);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn movzxw_rr(&mut self, dst: Register, src: Register) {
        self.emit_byte(0x0f);
        self.emit_byte(0xb7);
        self.emit_byte(0xc0 | (dst.code() << 3) | src.code());
    }

    pub fn movzxw_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x0f);
        self.emit_byte(0xb7);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn leal(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x8d);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn xchg(&mut self, reg: Register, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0x87);
        self.emit_operand(reg, adr);
        self.unmark_instruction();
    }

    pub fn bswap(&mut self, reg: Register) {
        self.emit_byte(0x0f);
        self.emit_byte(0xc8 | reg.code());
    }

    // ==================== Stack ====================

    pub fn pushl_r(&mut self, src: Register) {
        self.emit_byte(0x50 | src.code());
    }

    pub fn pushl_a(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xff);
        self.emit_operand(Register::Esi, src);
        self.unmark_instruction();
    }

    pub fn pushl_i(&mut self, imm32: i32) {
        self.emit_byte(0x68);
        self.emit_long(imm32);
    }

    pub fn pushl_i_reloc(&mut self, imm32: i32, rtype: RelocType) {
        self.mark_instruction();
        self.emit_byte(0x68);
        self.emit_data(imm32, rtype, 0);
        self.unmark_instruction();
    }

    pub fn pushl_o(&mut self, oop: Oop) {
        self.mark_instruction();
        self.emit_byte(0x68);
        self.emit_data_oop(oop);
        self.unmark_instruction();
    }

    /// Push the absolute address of a bound label.
    pub fn pushl_l(&mut self, label: &Label, rtype: RelocType) {
        assert!(label.is_bound(), "label must be bound");
        let address = self.code_begin() + label.pos();
        self.mark_instruction();
        self.emit_byte(0x68);
        self.emit_data(address, rtype, 0);
        self.unmark_instruction();
    }

    pub fn popl_r(&mut self, dst: Register) {
        self.emit_byte(0x58 | dst.code());
    }

    pub fn popl_a(&mut self, dst: Address) {
        self.mark_instruction();
        self.emit_byte(0x8f);
        self.emit_operand(Register::Eax, dst);
        self.unmark_instruction();
    }

    pub fn pushad(&mut self) {
        self.emit_byte(0x60);
    }

    pub fn popad(&mut self) {
        self.emit_byte(0x61);
    }

    pub fn pushfd(&mut self) {
        self.emit_byte(0x9c);
    }

    pub fn popfd(&mut self) {
        self.emit_byte(0x9d);
    }

    // ==================== Arithmetic and logic ====================

    pub fn addl_ri(&mut self, dst: Register, imm32: i32) {
        self.emit_arith_imm(0x81, 0xc0, dst, imm32);
    }

    pub fn addl_rr(&mut self, dst: Register, src: Register) {
        self.emit_arith(0x03, 0xc0, dst, src);
    }

    pub fn addl_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x03);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn addl_ai(&mut self, dst: Address, imm32: i32) {
        self.mark_instruction();
        if is_8bit(imm32) {
            self.emit_byte(0x83);
            self.emit_operand(Register::Eax, dst);
            self.emit_byte(imm32 as u8);
        } else {
            self.emit_byte(0x81);
            self.emit_operand(Register::Eax, dst);
            self.emit_long(imm32);
        }
        self.unmark_instruction();
    }

    pub fn addl_ar(&mut self, dst: Address, src: Register) {
        self.mark_instruction();
        self.emit_byte(0x01);
        self.emit_operand(src, dst);
        self.unmark_instruction();
    }

    pub fn adcl_ri(&mut self, dst: Register, imm32: i32) {
        self.emit_arith_imm(0x81, 0xd0, dst, imm32);
    }

    pub fn adcl_rr(&mut self, dst: Register, src: Register) {
        self.emit_arith(0x13, 0xc0, dst, src);
    }

    pub fn adcl_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x13);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn subl_ri(&mut self, dst: Register, imm32: i32) {
        self.emit_arith_imm(0x81, 0xe8, dst, imm32);
    }

    pub fn subl_rr(&mut self, dst: Register, src: Register) {
        self.emit_arith(0x2b, 0xc0, dst, src);
    }

    pub fn subl_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x2b);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn subl_ai(&mut self, dst: Address, imm32: i32) {
        self.mark_instruction();
        if is_8bit(imm32) {
            self.emit_byte(0x83);
            self.emit_operand(Register::Ebp, dst);
            self.emit_byte(imm32 as u8);
        } else {
            self.emit_byte(0x81);
            self.emit_operand(Register::Ebp, dst);
            self.emit_long(imm32);
        }
        self.unmark_instruction();
    }

    pub fn sbbl_ri(&mut self, dst: Register, imm32: i32) {
        self.emit_arith_imm(0x81, 0xd8, dst, imm32);
    }

    pub fn sbbl_rr(&mut self, dst: Register, src: Register) {
        self.emit_arith(0x1b, 0xc0, dst, src);
    }

    pub fn sbbl_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x1b);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn andl_ri(&mut self, dst: Register, imm32: i32) {
        self.emit_arith_imm(0x81, 0xe0, dst, imm32);
    }

    pub fn andl_rr(&mut self, dst: Register, src: Register) {
        self.emit_arith(0x23, 0xc0, dst, src);
    }

    pub fn andl_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x23);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn orl_ri(&mut self, dst: Register, imm32: i32) {
        self.emit_arith_imm(0x81, 0xc8, dst, imm32);
    }

    pub fn orl_rr(&mut self, dst: Register, src: Register) {
        self.emit_arith(0x0b, 0xc0, dst, src);
    }

    pub fn orl_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x0b);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn xorl_ri(&mut self, dst: Register, imm32: i32) {
        self.emit_arith_imm(0x81, 0xf0, dst, imm32);
    }

    pub fn xorl_rr(&mut self, dst: Register, src: Register) {
        self.emit_arith(0x33, 0xc0, dst, src);
    }

    pub fn xorl_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x33);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn cmpl_ri(&mut self, dst: Register, imm32: i32) {
        self.emit_arith_imm(0x81, 0xf8, dst, imm32);
    }

    pub fn cmpl_ro(&mut self, dst: Register, oop: Oop) {
        self.emit_arith_oop(0x81, 0xf8, dst, oop);
    }

    pub fn cmpl_rr(&mut self, dst: Register, src: Register) {
        self.emit_arith(0x3b, 0xc0, dst, src);
    }

    pub fn cmpl_ra(&mut self, dst: Register, src: Address) {
        self.mark_instruction();
        self.emit_byte(0x3b);
        self.emit_operand(dst, src);
        self.unmark_instruction();
    }

    pub fn cmpl_ai(&mut self, dst: Address, imm32: i32) {
        self.mark_instruction();
        if is_8bit(imm32) {
            self.emit_byte(0x83);
            self.emit_operand(Register::Edi, dst);
            self.emit_byte(imm32 as u8);
        } else {
            self.emit_byte(0x81);
            self.emit_operand(Register::Edi, dst);
            self.emit_long(imm32);
        }
        self.unmark_instruction();
    }

    pub fn cmpl_ao(&mut self, dst: Address, oop: Oop) {
        self.mark_instruction();
        self.emit_byte(0x81);
        self.emit_operand(Register::Edi, dst);
        self.emit_data_oop(oop);
        self.unmark_instruction();
    }

    pub fn incl_r(&mut self, dst: Register) {
        self.emit_byte(0x40 | dst.code());
    }

    pub fn incl_a(&mut self, dst: Address) {
        self.mark_instruction();
        self.emit_byte(0xff);
        self.emit_operand(Register::Eax, dst);
        self.unmark_instruction();
    }

    pub fn decl_r(&mut self, dst: Register) {
        self.emit_byte(0x48 | dst.code());
    }

    pub fn decl_a(&mut self, dst: Address) {
        self.mark_instruction();
        self.emit_byte(0xff);
        self.emit_operand(Register::Ecx, dst);
        self.unmark_instruction();
    }

    pub fn decb(&mut self, dst: Register) {
        assert!(dst.has_byte_register(), "must have byte register");
        self.emit_byte(0xfe);
        self.emit_byte(0xc8 | dst.code());
    }

    pub fn negl(&mut self, dst: Register) {
        self.emit_byte(0xf7);
        self.emit_byte(0xd8 | dst.code());
    }

    pub fn notl(&mut self, dst: Register) {
        self.emit_byte(0xf7);
        self.emit_byte(0xd0 | dst.code());
    }

    pub fn imull_rr(&mut self, dst: Register, src: Register) {
        self.emit_byte(0x0f);
        self.emit_byte(0xaf);
        self.emit_byte(0xc0 | (dst.code() << 3) | src.code());
    }

    pub fn imull_rri(&mut self, dst: Register, src: Register, value: i32) {
        if is_8bit(value) {
            self.emit_byte(0x6b);
            self.emit_byte(0xc0 | (dst.code() << 3) | src.code());
            self.emit_byte(value as u8);
        } else {
            self.emit_byte(0x69);
            self.emit_byte(0xc0 | (dst.code() << 3) | src.code());
            self.emit_long(value);
        }
    }

    pub fn mull_r(&mut self, src: Register) {
        self.emit_byte(0xf7);
        self.emit_byte(0xe0 | src.code());
    }

    pub fn mull_a(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xf7);
        self.emit_operand(Register::Esp, src);
        self.unmark_instruction();
    }

    pub fn idivl(&mut self, src: Register) {
        self.emit_byte(0xf7);
        self.emit_byte(0xf8 | src.code());
    }

    /// Sign-extend EAX into EDX:EAX.
    pub fn cdql(&mut self) {
        self.emit_byte(0x99);
    }

    pub fn testb(&mut self, dst: Register, imm8: i32) {
        assert!(dst.has_byte_register(), "must have byte register");
        self.emit_arith_byte(0xf6, 0xc0, dst, imm8);
    }

    pub fn testl_ri(&mut self, dst: Register, imm32: i32) {
        if dst.code() == 0 {
            self.emit_byte(0xa9);
        } else {
            self.emit_byte(0xf7);
            self.emit_byte(0xc0 | dst.code());
        }
        self.emit_long(imm32);
    }

    pub fn testl_rr(&mut self, dst: Register, src: Register) {
        self.emit_arith(0x85, 0xc0, dst, src);
    }

    pub fn xaddl(&mut self, dst: Address, src: Register) {
        self.mark_instruction();
        self.emit_byte(0x0f);
        self.emit_byte(0xc1);
        self.emit_operand(src, dst);
        self.unmark_instruction();
    }

    // ==================== Shifts ====================

    pub fn shll(&mut self, dst: Register, imm8: i32) {
        assert!(is_shift_count(imm8), "illegal shift count");
        if imm8 == 1 {
            self.emit_byte(0xd1);
            self.emit_byte(0xe0 | dst.code());
        } else {
            self.emit_byte(0xc1);
            self.emit_byte(0xe0 | dst.code());
            self.emit_byte(imm8 as u8);
        }
    }

    /// Shift left by the count in CL.
    pub fn shll_cl(&mut self, dst: Register) {
        self.emit_byte(0xd3);
        self.emit_byte(0xe0 | dst.code());
    }

    pub fn shrl(&mut self, dst: Register, imm8: i32) {
        assert!(is_shift_count(imm8), "illegal shift count");
        if imm8 == 1 {
            self.emit_byte(0xd1);
            self.emit_byte(0xe8 | dst.code());
        } else {
            self.emit_byte(0xc1);
            self.emit_byte(0xe8 | dst.code());
            self.emit_byte(imm8 as u8);
        }
    }

    pub fn shrl_cl(&mut self, dst: Register) {
        self.emit_byte(0xd3);
        self.emit_byte(0xe8 | dst.code());
    }

    pub fn sarl(&mut self, dst: Register, imm8: i32) {
        assert!(is_shift_count(imm8), "illegal shift count");
        if imm8 == 1 {
            self.emit_byte(0xd1);
            self.emit_byte(0xf8 | dst.code());
        } else {
            self.emit_byte(0xc1);
            self.emit_byte(0xf8 | dst.code());
            self.emit_byte(imm8 as u8);
        }
    }

    pub fn sarl_cl(&mut self, dst: Register) {
        self.emit_byte(0xd3);
        self.emit_byte(0xf8 | dst.code());
    }

    pub fn rcll(&mut self, dst: Register, imm8: i32) {
        assert!(is_shift_count(imm8), "illegal shift count");
        if imm8 == 1 {
            self.emit_byte(0xd1);
            self.emit_byte(0xd0 | dst.code());
        } else {
            self.emit_byte(0xc1);
            self.emit_byte(0xd0 | dst.code());
            self.emit_byte(imm8 as u8);
        }
    }

    /// Double-precision shift left by the count in CL.
    pub fn shldl(&mut self, dst: Register, src: Register) {
        self.emit_byte(0x0f);
        self.emit_byte(0xa5);
        self.emit_byte(0xc0 | (src.code() << 3) | dst.code());
    }

    /// Double-precision shift right by the count in CL.
    pub fn shrdl(&mut self, dst: Register, src: Register) {
        self.emit_byte(0x0f);
        self.emit_byte(0xad);
        self.emit_byte(0xc0 | (src.code() << 3) | dst.code());
    }

    // ==================== Control flow ====================

    pub fn call_a(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xff);
        self.emit_operand(Register::Edx, adr);
        self.unmark_instruction();
    }

    pub fn call_r(&mut self, dst: Register, rtype: RelocType) {
        self.relocate(rtype);
        self.emit_byte(0xff);
        self.emit_byte(0xd0 | dst.code());
    }

    /// Call a label; forward references go through the displacement
    /// chain.
    pub fn call_l(&mut self, label: &mut Label, rtype: RelocType) {
        if label.is_bound() {
            const LONG_SIZE: i32 = 5;
            let offset = label.pos() - self.offset();
            assert!(offset <= 0, "assembler error");
            self.mark_instruction();
            self.emit_byte(0xe8);
            self.emit_data(offset - LONG_SIZE, rtype, 0);
            self.unmark_instruction();
        } else {
            self.mark_instruction();
            self.emit_byte(0xe8);
            let disp = Displacement::new(label, DispKind::Call, 0);
            label.link_to(self.offset());
            self.emit_data(disp.data(), rtype, 0);
            self.unmark_instruction();
        }
    }

    /// Call an absolute entry point.
    pub fn call_e(&mut self, entry: i32, rtype: RelocType) {
        assert!(rtype != RelocType::VirtualCall, "should not reach here");
        assert!(entry != 0, "call most probably wrong");
        self.mark_instruction();
        self.emit_byte(0xe8);
        let target = entry - (self.code_pos() + 4);
        self.emit_data(target, rtype, 0);
        self.unmark_instruction();
    }

    /// Call an absolute entry point with prebuilt relocation data.
    pub fn call_e_info(&mut self, entry: i32, reloc: RelocInfo) {
        assert!(entry != 0, "call most probably wrong");
        self.mark_instruction();
        self.emit_byte(0xe8);
        let target = entry - (self.code_pos() + 4);
        self.emit_data_info(target, reloc, 0);
        self.unmark_instruction();
    }

    pub fn jmp_a(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xff);
        self.emit_operand(Register::Esp, adr);
        self.unmark_instruction();
    }

    pub fn jmp_r(&mut self, reg: Register, rtype: RelocType) {
        self.relocate(rtype);
        self.emit_byte(0xff);
        self.emit_byte(0xe0 | reg.code());
    }

    pub fn jmp_e(&mut self, entry: i32, rtype: RelocType) {
        assert!(entry != 0, "jump most probably wrong");
        self.mark_instruction();
        self.emit_byte(0xe9);
        let target = entry - (self.code_pos() + 4);
        self.emit_data(target, rtype, 0);
        self.unmark_instruction();
    }

    /// Jump to a label, choosing the short form for backward targets in
    /// range.
    pub fn jmp_l(&mut self, label: &mut Label, rtype: RelocType) {
        self.relocate(rtype);
        if label.is_bound() {
            const SHORT_SIZE: i32 = 2;
            const LONG_SIZE: i32 = 5;
            let offset = label.pos() - self.offset();
            assert!(offset <= 0, "assembler error");
            if is_8bit(offset - SHORT_SIZE) {
                self.emit_byte(0xeb);
                self.emit_byte((offset - SHORT_SIZE) as u8);
            } else {
                self.emit_byte(0xe9);
                self.emit_long(offset - LONG_SIZE);
            }
        } else {
            self.emit_byte(0xe9);
            self.emit_disp(label, DispKind::AbsoluteJump, 0);
        }
    }

    pub fn jmp(&mut self, label: &mut Label) {
        self.jmp_l(label, RelocType::None);
    }

    /// Conditional jump to a label.
    pub fn jcc_l(&mut self, cc: Cond, label: &mut Label, rtype: RelocType) {
        self.relocate(rtype);
        if label.is_bound() {
            const SHORT_SIZE: i32 = 2;
            const LONG_SIZE: i32 = 6;
            let offset = label.pos() - self.offset();
            assert!(offset <= 0, "assembler error");
            if is_8bit(offset - SHORT_SIZE) {
                self.emit_byte(0x70 | cc.code());
                self.emit_byte((offset - SHORT_SIZE) as u8);
            } else {
                self.emit_byte(0x0f);
                self.emit_byte(0x80 | cc.code());
                self.emit_long(offset - LONG_SIZE);
            }
        } else {
            self.emit_byte(0x0f);
            self.emit_byte(0x80 | cc.code());
            self.emit_disp(label, DispKind::ConditionalJump, cc.code());
        }
    }

    pub fn jcc(&mut self, cc: Cond, label: &mut Label) {
        self.jcc_l(cc, label, RelocType::None);
    }

    pub fn jcc_e(&mut self, cc: Cond, entry: i32, rtype: RelocType) {
        assert!(entry != 0, "jump most probably wrong");
        self.mark_instruction();
        self.emit_byte(0x0f);
        self.emit_byte(0x80 | cc.code());
        let target = entry - (self.code_pos() + 4);
        self.emit_data(target, rtype, 0);
        self.unmark_instruction();
    }

    pub fn setb(&mut self, cc: Cond, dst: Register) {
        self.emit_byte(0x0f);
        self.emit_byte(0x90 | cc.code());
        self.emit_byte(0xc0 | dst.code());
    }

    /// Conditional move. Requires a P6 or later target.
    pub fn cmovl(&mut self, cc: Cond, dst: Register, src: Register) {
        self.emit_byte(0x0f);
        self.emit_byte(0x40 | cc.code());
        self.emit_byte(0xc0 | (dst.code() << 3) | src.code());
    }

    /// Return, popping the given number of argument bytes.
    pub fn ret(&mut self, imm16: u16) {
        if imm16 == 0 {
            self.emit_byte(0xc3);
        } else {
            self.emit_byte(0xc2);
            self.emit_int(imm16);
        }
    }

    // ==================== System ====================

    pub fn nop(&mut self) {
        self.emit_byte(0x90);
    }

    pub fn hlt(&mut self) {
        self.emit_byte(0xf4);
    }

    pub fn int3(&mut self) {
        self.emit_byte(0xcc);
    }

    pub fn sahf(&mut self) {
        self.emit_byte(0x9e);
    }

    /// Emit a LOCK prefix turning the following instruction into an
    /// atomic one.
    pub fn lock(&mut self) {
        self.emit_byte(0xf0);
    }

    /// Emit a raw prefix byte such as a segment override.
    pub fn prefix(&mut self, prefix: u8) {
        self.emit_byte(prefix);
    }

    /// Compare EAX with the destination and exchange on equality.
    pub fn cmpxchg(&mut self, reg: Register, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0x0f);
        self.emit_byte(0xb1);
        self.emit_operand(reg, adr);
        self.unmark_instruction();
    }

    /// Read the processor time-stamp counter into EDX:EAX.
    pub fn rdtsc(&mut self) {
        self.emit_byte(0x0f);
        self.emit_byte(0x31);
    }

    pub fn repmovs(&mut self) {
        self.emit_byte(0xf3);
        self.emit_byte(0xa5);
    }

    pub fn repstos(&mut self) {
        self.emit_byte(0xf3);
        self.emit_byte(0xab);
    }

    // ==================== Floating point ====================

    pub fn fld1(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xe8);
    }

    pub fn fldz(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xee);
    }

    pub fn fldpi(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xeb);
    }

    pub fn flds(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xd9);
        self.emit_operand(Register::Eax, adr);
        self.unmark_instruction();
    }

    pub fn fldd(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xdd);
        self.emit_operand(Register::Eax, adr);
        self.unmark_instruction();
    }

    /// Push the value of ST(i) onto the register stack.
    pub fn flds_st(&mut self, i: i32) {
        self.emit_farith(0xd9, 0xc0, i);
    }

    pub fn fsts(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xd9);
        self.emit_operand(Register::Edx, adr);
        self.unmark_instruction();
    }

    pub fn fstd(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xdd);
        self.emit_operand(Register::Edx, adr);
        self.unmark_instruction();
    }

    pub fn fstps(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xd9);
        self.emit_operand(Register::Ebx, adr);
        self.unmark_instruction();
    }

    pub fn fstpd(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xdd);
        self.emit_operand(Register::Ebx, adr);
        self.unmark_instruction();
    }

    /// Copy ST(0) into ST(i) and pop the register stack.
    pub fn fstpd_st(&mut self, i: i32) {
        self.emit_farith(0xdd, 0xd8, i);
    }

    pub fn filds(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xdb);
        self.emit_operand(Register::Eax, adr);
        self.unmark_instruction();
    }

    pub fn fildd(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xdf);
        self.emit_operand(Register::Ebp, adr);
        self.unmark_instruction();
    }

    pub fn fists(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xdb);
        self.emit_operand(Register::Edx, adr);
        self.unmark_instruction();
    }

    pub fn fistps(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xdb);
        self.emit_operand(Register::Ebx, adr);
        self.unmark_instruction();
    }

    pub fn fistpd(&mut self, adr: Address) {
        self.mark_instruction();
        self.emit_byte(0xdf);
        self.emit_operand(Register::Edi, adr);
        self.unmark_instruction();
    }

    pub fn fadds(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xd8);
        self.emit_operand(Register::Eax, src);
        self.unmark_instruction();
    }

    pub fn faddd(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xdc);
        self.emit_operand(Register::Eax, src);
        self.unmark_instruction();
    }

    pub fn fadd(&mut self, i: i32) {
        self.emit_farith(0xd8, 0xc0, i);
    }

    pub fn faddp(&mut self, i: i32) {
        self.emit_farith(0xde, 0xc0, i);
    }

    pub fn fsubs(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xd8);
        self.emit_operand(Register::Esp, src);
        self.unmark_instruction();
    }

    pub fn fsubd(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xdc);
        self.emit_operand(Register::Esp, src);
        self.unmark_instruction();
    }

    pub fn fsub(&mut self, i: i32) {
        self.emit_farith(0xd8, 0xe0, i);
    }

    pub fn fsubp(&mut self, i: i32) {
        self.emit_farith(0xde, 0xe8, i);
    }

    pub fn fsubrs(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xd8);
        self.emit_operand(Register::Ebp, src);
        self.unmark_instruction();
    }

    pub fn fsubrd(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xdc);
        self.emit_operand(Register::Ebp, src);
        self.unmark_instruction();
    }

    pub fn fsubrp(&mut self, i: i32) {
        self.emit_farith(0xde, 0xe0, i);
    }

    pub fn fmuls(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xd8);
        self.emit_operand(Register::Ecx, src);
        self.unmark_instruction();
    }

    pub fn fmuld(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xdc);
        self.emit_operand(Register::Ecx, src);
        self.unmark_instruction();
    }

    pub fn fmul(&mut self, i: i32) {
        self.emit_farith(0xd8, 0xc8, i);
    }

    pub fn fmulp(&mut self, i: i32) {
        self.emit_farith(0xde, 0xc8, i);
    }

    pub fn fdivs(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xd8);
        self.emit_operand(Register::Esi, src);
        self.unmark_instruction();
    }

    pub fn fdivd(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xdc);
        self.emit_operand(Register::Esi, src);
        self.unmark_instruction();
    }

    pub fn fdiv(&mut self, i: i32) {
        self.emit_farith(0xd8, 0xf0, i);
    }

    pub fn fdivp(&mut self, i: i32) {
        self.emit_farith(0xde, 0xf8, i);
    }

    pub fn fdivrs(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xd8);
        self.emit_operand(Register::Edi, src);
        self.unmark_instruction();
    }

    pub fn fdivrd(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xdc);
        self.emit_operand(Register::Edi, src);
        self.unmark_instruction();
    }

    pub fn fdivrp(&mut self, i: i32) {
        self.emit_farith(0xde, 0xf0, i);
    }

    pub fn fabs(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xe1);
    }

    pub fn fchs(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xe0);
    }

    pub fn fsqrt(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xfa);
    }

    pub fn fsin(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xfe);
    }

    pub fn fcos(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xff);
    }

    pub fn fprem(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xf8);
    }

    pub fn fprem1(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xf5);
    }

    pub fn fcomps(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xd8);
        self.emit_operand(Register::Ebx, src);
        self.unmark_instruction();
    }

    pub fn fcompd(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xdc);
        self.emit_operand(Register::Ebx, src);
        self.unmark_instruction();
    }

    pub fn fcompp(&mut self) {
        self.emit_byte(0xde);
        self.emit_byte(0xd9);
    }

    /// Unordered compare of ST(0) with ST(i).
    pub fn fucom(&mut self, i: i32) {
        self.emit_farith(0xdd, 0xe0, i);
    }

    /// Unordered compare of ST(0) with ST(i) and pop.
    pub fn fucomp(&mut self, i: i32) {
        self.emit_farith(0xdd, 0xe8, i);
    }

    /// Unordered compare of ST(0) with ST(1) and pop both.
    pub fn fucompp(&mut self) {
        self.emit_byte(0xda);
        self.emit_byte(0xe9);
    }

    pub fn ftst(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xe4);
    }

    /// Unordered compare with ST(i). Requires a P6 or later target.
    pub fn fucomi(&mut self, i: i32) {
        self.emit_farith(0xdb, 0xe8, i);
    }

    /// Unordered compare with ST(i) and pop. Requires a P6 or later
    /// target.
    pub fn fucomip(&mut self, i: i32) {
        self.emit_farith(0xdf, 0xe8, i);
    }

    pub fn fxch(&mut self, i: i32) {
        self.emit_farith(0xd9, 0xc8, i);
    }

    pub fn ffree(&mut self, i: i32) {
        self.emit_farith(0xdd, 0xc0, i);
    }

    pub fn fincstp(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xf7);
    }

    pub fn fdecstp(&mut self) {
        self.emit_byte(0xd9);
        self.emit_byte(0xf6);
    }

    /// Store the FPU status word in AX.
    pub fn fnstswax(&mut self) {
        self.emit_byte(0xdf);
        self.emit_byte(0xe0);
    }

    pub fn fstcw(&mut self, dst: Address) {
        self.mark_instruction();
        self.emit_byte(0x9b);
        self.emit_byte(0xd9);
        self.emit_operand(Register::Edi, dst);
        self.unmark_instruction();
    }

    pub fn fldcw(&mut self, src: Address) {
        self.mark_instruction();
        self.emit_byte(0xd9);
        self.emit_operand(Register::Ebp, src);
        self.unmark_instruction();
    }

    pub fn fldenv(&mut self, src: Address) {
        self.emit_byte(0xd9);
        self.emit_operand(Register::Esp, src);
    }

    pub fn fnsave(&mut self, dst: Address) {
        self.emit_byte(0xdd);
        self.emit_operand(Register::Esi, dst);
    }

    pub fn frstor(&mut self, src: Address) {
        self.emit_byte(0xdd);
        self.emit_operand(Register::Esp, src);
    }

    pub fn finit(&mut self) {
        self.emit_byte(0x9b);
        self.emit_byte(0xdb);
        self.emit_byte(0xe3);
    }

    pub fn fwait(&mut self) {
        self.emit_byte(0x9b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_asm(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
        let mut buf = CodeBuffer::default();
        let mut asm = Assembler::new(&mut buf);
        f(&mut asm);
        buf.bytes().to_vec()
    }

    #[test]
    fn test_movl_ri() {
        let code = with_asm(|a| a.movl_ri(Register::Eax, 0x12345678));
        assert_eq!(code, &[0xb8, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_addl_rr() {
        let code = with_asm(|a| a.addl_rr(Register::Eax, Register::Ebx));
        assert_eq!(code, &[0x03, 0xc3]);
    }

    #[test]
    fn test_movl_rr() {
        let code = with_asm(|a| a.movl_rr(Register::Esi, Register::Edx));
        assert_eq!(code, &[0x8b, 0xf2]);
    }

    #[test]
    fn test_arith_imm_forms() {
        // Sign-extended 8-bit form for small immediates.
        let code = with_asm(|a| a.addl_ri(Register::Ecx, 8));
        assert_eq!(code, &[0x83, 0xc1, 0x08]);
        let code = with_asm(|a| a.addl_ri(Register::Ecx, 0x1234));
        assert_eq!(code, &[0x81, 0xc1, 0x34, 0x12, 0x00, 0x00]);
        let code = with_asm(|a| a.subl_ri(Register::Esp, 16));
        assert_eq!(code, &[0x83, 0xec, 0x10]);
    }

    #[test]
    fn test_operand_base_disp() {
        // Zero displacement drops the displacement byte.
        let code = with_asm(|a| a.movl_ra(Register::Eax, Address::base(Register::Esi)));
        assert_eq!(code, &[0x8b, 0x06]);
        // 8-bit displacement.
        let code = with_asm(|a| a.movl_ra(Register::Eax, Address::base_disp(Register::Esi, 12)));
        assert_eq!(code, &[0x8b, 0x46, 0x0c]);
        // 32-bit displacement.
        let code = with_asm(|a| a.movl_ra(Register::Eax, Address::base_disp(Register::Esi, 0x200)));
        assert_eq!(code, &[0x8b, 0x86, 0x00, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_operand_esp_base_needs_sib() {
        let code = with_asm(|a| a.movl_ra(Register::Ecx, Address::base(Register::Esp)));
        assert_eq!(code, &[0x8b, 0x0c, 0x24]);
        let code = with_asm(|a| a.movl_ra(Register::Ecx, Address::base_disp(Register::Esp, 4)));
        assert_eq!(code, &[0x8b, 0x4c, 0x24, 0x04]);
    }

    #[test]
    fn test_operand_ebp_base_needs_disp() {
        // EBP with zero displacement still emits a disp8 of zero.
        let code = with_asm(|a| a.movl_ra(Register::Eax, Address::base(Register::Ebp)));
        assert_eq!(code, &[0x8b, 0x45, 0x00]);
    }

    #[test]
    fn test_operand_base_index_scale() {
        let adr = Address::base_index(Register::Ebx, Register::Ecx, ScaleFactor::Times4, 0);
        let code = with_asm(|a| a.movl_ra(Register::Eax, adr));
        assert_eq!(code, &[0x8b, 0x04, 0x8b]);
        let adr = Address::base_index(Register::Ebx, Register::Ecx, ScaleFactor::Times4, 8);
        let code = with_asm(|a| a.movl_ra(Register::Eax, adr));
        assert_eq!(code, &[0x8b, 0x44, 0x8b, 0x08]);
    }

    #[test]
    fn test_operand_index_no_base() {
        let adr = Address::index_disp(Register::Edx, ScaleFactor::Times8, 0x40);
        let code = with_asm(|a| a.movl_ra(Register::Eax, adr));
        assert_eq!(code, &[0x8b, 0x04, 0xd5, 0x40, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_operand_absolute() {
        let adr = Address::absolute(0x1000, RelocType::None);
        let code = with_asm(|a| a.movl_ra(Register::Eax, adr));
        assert_eq!(code, &[0x8b, 0x05, 0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn test_push_pop() {
        let code = with_asm(|a| {
            a.pushl_r(Register::Ebp);
            a.popl_r(Register::Ebp);
        });
        assert_eq!(code, &[0x55, 0x5d]);
    }

    #[test]
    fn test_inc_dec() {
        let code = with_asm(|a| {
            a.incl_r(Register::Eax);
            a.decl_r(Register::Edi);
        });
        assert_eq!(code, &[0x40, 0x4f]);
    }

    #[test]
    fn test_shifts() {
        let code = with_asm(|a| a.shll(Register::Eax, 1));
        assert_eq!(code, &[0xd1, 0xe0]);
        let code = with_asm(|a| a.shll(Register::Eax, 4));
        assert_eq!(code, &[0xc1, 0xe0, 0x04]);
        let code = with_asm(|a| a.sarl_cl(Register::Edx));
        assert_eq!(code, &[0xd3, 0xfa]);
        let code = with_asm(|a| a.shldl(Register::Edx, Register::Eax));
        assert_eq!(code, &[0x0f, 0xa5, 0xc2]);
        let code = with_asm(|a| a.shrdl(Register::Eax, Register::Edx));
        assert_eq!(code, &[0x0f, 0xad, 0xd0]);
    }

    #[test]
    fn test_ret_forms() {
        let code = with_asm(|a| a.ret(0));
        assert_eq!(code, &[0xc3]);
        let code = with_asm(|a| a.ret(8));
        assert_eq!(code, &[0xc2, 0x08, 0x00]);
    }

    #[test]
    fn test_testl_eax_short_form() {
        let code = with_asm(|a| a.testl_ri(Register::Eax, 1));
        assert_eq!(code, &[0xa9, 0x01, 0x00, 0x00, 0x00]);
        let code = with_asm(|a| a.testl_ri(Register::Ebx, 1));
        assert_eq!(code, &[0xf7, 0xc3, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_setb_and_cmov() {
        let code = with_asm(|a| a.setb(Cond::Equal, Register::Eax));
        assert_eq!(code, &[0x0f, 0x94, 0xc0]);
        let code = with_asm(|a| a.cmovl(Cond::Less, Register::Eax, Register::Ebx));
        assert_eq!(code, &[0x0f, 0x4c, 0xc3]);
    }

    #[test]
    fn test_cmpxchg_with_lock() {
        let code = with_asm(|a| {
            a.lock();
            a.cmpxchg(Register::Ebx, Address::base(Register::Esi));
        });
        assert_eq!(code, &[0xf0, 0x0f, 0xb1, 0x1e]);
    }

    #[test]
    fn test_fpu_encodings() {
        let code = with_asm(|a| {
            a.fxch(1);
            a.fadd(2);
            a.fstpd_st(3);
            a.fabs();
            a.fnstswax();
        });
        assert_eq!(
            code,
            &[0xd9, 0xc9, 0xd8, 0xc2, 0xdd, 0xdb, 0xd9, 0xe1, 0xdf, 0xe0]
        );
    }

    #[test]
    fn test_jcc_forward_patch() {
        let mut buf = CodeBuffer::default();
        let mut asm = Assembler::new(&mut buf);
        let mut label = Label::new();
        asm.jcc(Cond::Equal, &mut label);
        let operand_pos = asm.offset() - 4;
        asm.nop();
        asm.nop();
        asm.nop();
        let bind_pos = asm.offset();
        asm.bind(&mut label);
        let patched = asm.long_at(operand_pos);
        assert_eq!(patched, bind_pos - (operand_pos + 4));
        assert_eq!(patched, 3);
        assert!(label.is_bound());
    }

    #[test]
    fn test_multiple_forward_refs_one_label() {
        let mut buf = CodeBuffer::default();
        let mut asm = Assembler::new(&mut buf);
        let mut label = Label::new();
        asm.jmp(&mut label);
        let first = asm.offset() - 4;
        asm.jcc(Cond::NotEqual, &mut label);
        let second = asm.offset() - 4;
        asm.call_l(&mut label, RelocType::None);
        let third = asm.offset() - 4;
        let pos = asm.offset();
        asm.bind(&mut label);
        for fixup in [first, second, third] {
            assert_eq!(asm.long_at(fixup), pos - (fixup + 4));
        }
    }

    #[test]
    fn test_backward_branches_choose_short_form() {
        let mut buf = CodeBuffer::default();
        let mut asm = Assembler::new(&mut buf);
        let mut label = Label::new();
        asm.bind(&mut label);
        asm.nop();
        asm.jmp(&mut label);
        asm.jcc(Cond::Above, &mut label);
        let code = buf.bytes();
        assert_eq!(code[1], 0xeb);
        assert_eq!(code[2] as i8, -3);
        assert_eq!(code[3], 0x77);
        assert_eq!(code[4] as i8, -5);
    }

    #[test]
    fn test_backward_branch_long_form() {
        let mut buf = CodeBuffer::default();
        let mut asm = Assembler::new(&mut buf);
        let mut label = Label::new();
        asm.bind(&mut label);
        for _ in 0..200 {
            asm.nop();
        }
        asm.jmp(&mut label);
        assert_eq!(asm.byte_at(200), 0xe9);
        assert_eq!(asm.long_at(201), -205);
    }

    #[test]
    fn test_movl_oop_records_and_relocates() {
        let mut buf = CodeBuffer::default();
        let mut asm = Assembler::new(&mut buf);
        asm.movl_ro(Register::Eax, Oop(0xcafe));
        assert_eq!(buf.bytes(), &[0xb8, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(buf.relocs().len(), 1);
        assert_eq!(buf.relocs()[0].type_code(), RelocType::Oop.code());
        assert_eq!(buf.oops().len(), 2);
    }

    #[test]
    fn test_call_entry_self_relative() {
        let mut buf = CodeBuffer::default();
        let mut asm = Assembler::new(&mut buf);
        let entry = asm.code_begin() + 0x100;
        asm.call_e(entry, RelocType::RuntimeCall);
        let code = buf.bytes();
        assert_eq!(code[0], 0xe8);
        let disp = i32::from_le_bytes([code[1], code[2], code[3], code[4]]);
        assert_eq!(disp, 0x100 - 5);
        assert_eq!(buf.relocs()[0].type_code(), RelocType::RuntimeCall.code());
    }

    #[test]
    fn test_cond_invert_roundtrip() {
        for cc in [
            Cond::Overflow,
            Cond::Below,
            Cond::Equal,
            Cond::BelowEqual,
            Cond::Negative,
            Cond::Parity,
            Cond::Less,
            Cond::LessEqual,
        ] {
            assert_eq!(cc.invert().invert(), cc);
            assert_eq!(cc.invert().code(), cc.code() ^ 1);
        }
    }
}
