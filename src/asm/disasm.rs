//! Instruction decoding and diagnostic output.
//!
//! The disassembler walks a finished code buffer and prints the machine
//! code side by side with the decoded assembly instructions. The operand
//! mode table mirrors the encoder one to one, so every byte sequence the
//! assembler can produce decodes back to its mnemonic. Output goes into
//! any `fmt::Write` sink.

use std::cell::Cell;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{self, Write};

use super::codebuf::CodeBuffer;
use super::reloc::{self, RelocType};

/// Operand modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    R8,
    R32,
    Mem,
    Rm8,
    Rm16,
    Rm32,
    Rm64,
    Imm8,
    Imm16,
    Imm32,
    Rel8,
    Rel32,
}

use Mode::*;

/// The names of the byte general-purpose registers.
const BYTE_REG_NAMES: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];

/// The names of the word general-purpose registers.
const WORD_REG_NAMES: [&str; 8] = ["ax", "cx", "dx", "bx", "sp", "bp", "si", "di"];

/// The names of the double-word general-purpose registers.
const DWORD_REG_NAMES: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];

/// The condition code suffixes, in the encoder's nibble order.
const CC: [&str; 16] = [
    "o", "no", "b", "ae", "e", "ne", "be", "a", "s", "ns", "p", "np", "l", "ge", "le", "g",
];

/// Errors surfaced while decoding machine code.
#[derive(Debug)]
pub enum DecodeError {
    /// An opcode outside the supported table was encountered.
    UnknownOpcode { offset: i32, opcode: u8 },
    /// The code ends before the instruction does.
    TruncatedInstruction { offset: i32 },
    /// The output sink failed.
    Output(fmt::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownOpcode { offset, opcode } => {
                write!(f, "unknown opcode {:02X}h at offset {}", opcode, offset)
            }
            DecodeError::TruncatedInstruction { offset } => {
                write!(f, "truncated instruction at offset {}", offset)
            }
            DecodeError::Output(e) => write!(f, "output error: {}", e),
        }
    }
}

impl Error for DecodeError {}

impl From<fmt::Error> for DecodeError {
    fn from(e: fmt::Error) -> Self {
        DecodeError::Output(e)
    }
}

fn hex_string(value: i32) -> String {
    format!("{:X}h", value as u32)
}

fn address_string(value: i32) -> String {
    format!("{:08X}", value as u32)
}

fn reloc_format_string(format: u16) -> &'static str {
    match format {
        0 => "imm32",
        1 => "disp32",
        _ => unreachable!("wrong relocation format"),
    }
}

/// Decodes machine code from a finished code buffer.
pub struct Disassembler<'a> {
    code: &'a CodeBuffer,
    code_start: i32,
    /// Position of the next byte to be disassembled
    cur: i32,
    /// The accumulated lock and repeat prefixes
    prefix: String,
    /// A possible segment-override prefix
    segment: String,
    /// Whether the instruction has an operand-size override prefix
    operand_size_override: bool,
    /// Starts of the detected patching stubs
    stubs_start: HashSet<i32>,
    /// Known patching stub entry addresses
    patch_entries: Vec<i32>,
    /// Whether the current instruction read past the end of the code
    truncated: Cell<bool>,
}

impl<'a> Disassembler<'a> {
    pub fn new(code: &'a CodeBuffer) -> Self {
        Self {
            code,
            code_start: code.code_begin(),
            cur: 0,
            prefix: String::new(),
            segment: String::new(),
            operand_size_override: false,
            stubs_start: HashSet::new(),
            patch_entries: Vec::new(),
            truncated: Cell::new(false),
        }
    }

    /// Register the entry addresses of the runtime patching stubs so
    /// calls into them can be recognized during disassembly.
    pub fn set_patch_entries(&mut self, entries: Vec<i32>) {
        self.patch_entries = entries;
    }

    /// Get the byte at the given position. A position outside the code
    /// marks the current instruction as truncated and reads as zero.
    fn byte_at(&self, pos: i32) -> i32 {
        if pos < 0 || pos >= self.code.code_size() as i32 {
            self.truncated.set(true);
            return 0;
        }
        self.code.byte_at(pos as usize) as i32
    }

    fn int_at(&self, pos: i32) -> i32 {
        (self.byte_at(pos + 1) << 8) | self.byte_at(pos)
    }

    fn long_at(&self, pos: i32) -> i32 {
        (self.int_at(pos + 2) << 16) | self.int_at(pos)
    }

    fn next(&mut self) -> i32 {
        let b = self.byte_at(self.cur);
        self.cur += 1;
        b
    }

    /// Get the byte at the given offset from the current position
    /// without advancing, or -1 outside the code.
    fn peek(&self, offset: i32) -> i32 {
        let pos = self.cur + offset;
        if pos >= 0 && pos < self.code.code_size() as i32 {
            self.byte_at(pos)
        } else {
            -1
        }
    }

    fn register(&self, reg: usize) -> &'static str {
        if self.operand_size_override {
            WORD_REG_NAMES[reg]
        } else {
            DWORD_REG_NAMES[reg]
        }
    }

    fn displacement(&self, disp: i32) -> String {
        if disp < 0 {
            format!("-{}", hex_string(-disp))
        } else if disp > 0 {
            format!("+{}", hex_string(disp))
        } else {
            String::new()
        }
    }

    /// Format the SIB byte. Advances past the 32-bit displacement when
    /// the SIB byte implies one that is not read anywhere else.
    fn scale_index_base(&mut self, modb: i32, sib: i32) -> String {
        let scale = (sib >> 6) & 0x3;
        let index = (sib >> 3) & 0x7;
        let base = sib & 0x7;
        let mut str = String::new();
        if modb != 0 || base != 5 {
            str.push_str(DWORD_REG_NAMES[base as usize]);
        }
        if index != 4 {
            if modb != 0 || base != 5 {
                str.push('+');
            }
            str.push_str(DWORD_REG_NAMES[index as usize]);
            if scale != 0 {
                str.push('*');
                str.push_str(&(1 << scale).to_string());
            }
        }
        if modb == 0 && base == 5 {
            let disp = self.long_at(self.cur);
            if index != 4 {
                str.push_str(&self.displacement(disp));
            } else {
                str.push_str(&hex_string(disp));
            }
            self.cur += 4;
        }
        str
    }

    fn reg_mem(&mut self, mode: Mode, modb: i32, rm: i32) -> String {
        if modb == 3 {
            match mode {
                Rm8 => BYTE_REG_NAMES[rm as usize].to_string(),
                Rm32 => self.register(rm as usize).to_string(),
                _ => unreachable!("register operand of wrong size"),
            }
        } else {
            let mut str = String::new();
            match mode {
                Mem => {}
                Rm8 => str.push_str("byte ptr "),
                Rm16 => str.push_str("word ptr "),
                Rm32 => str.push_str(if self.operand_size_override {
                    "word ptr "
                } else {
                    "dword ptr "
                }),
                Rm64 => str.push_str("qword ptr "),
                _ => unreachable!("not an address operand"),
            }
            str.push_str(&self.segment);
            str.push('[');
            if rm == 4 {
                let sib = self.next();
                str.push_str(&self.scale_index_base(modb, sib));
            } else if modb == 0 && rm == 5 {
                let disp = self.long_at(self.cur);
                str.push_str(&hex_string(disp));
                self.cur += 4;
            } else {
                str.push_str(DWORD_REG_NAMES[rm as usize]);
            }
            if modb == 1 {
                let disp8 = self.next() as i8 as i32;
                str.push_str(&self.displacement(disp8));
            } else if modb == 2 {
                let disp32 = self.long_at(self.cur);
                self.cur += 4;
                str.push_str(&self.displacement(disp32));
            }
            str.push(']');
            str
        }
    }

    fn operand(&mut self, mode: Mode, modrm: i32) -> String {
        match mode {
            R8 => BYTE_REG_NAMES[((modrm >> 3) & 0x7) as usize].to_string(),
            R32 => self.register(((modrm >> 3) & 0x7) as usize).to_string(),
            Mem | Rm8 | Rm16 | Rm32 | Rm64 => self.reg_mem(mode, (modrm >> 6) & 0x3, modrm & 0x7),
            Imm8 => hex_string(self.next()),
            Imm16 => {
                self.cur += 2;
                hex_string(self.int_at(self.cur - 2))
            }
            Imm32 => {
                if self.operand_size_override {
                    self.cur += 2;
                    hex_string(self.int_at(self.cur - 2))
                } else {
                    self.cur += 4;
                    hex_string(self.long_at(self.cur - 4))
                }
            }
            Rel8 => {
                let rel8 = self.next() as i8 as i32;
                address_string(self.code_start + self.cur + rel8)
            }
            Rel32 => {
                let rel32 = self.long_at(self.cur);
                self.cur += 4;
                address_string(self.code_start + self.cur + rel32)
            }
        }
    }

    fn is_reg_mem(mode: Mode) -> bool {
        matches!(mode, R8 | R32 | Mem | Rm8 | Rm16 | Rm32 | Rm64)
    }

    /// Format the mnemonic with its prefixes, padded for column
    /// alignment.
    fn op0(&self, opname: &str) -> String {
        let mut str = format!("{}{}", self.prefix, opname);
        while str.len() < 14 {
            str.push(' ');
        }
        str
    }

    fn op1(&mut self, opname: &str, mode: Mode) -> String {
        let mut str = self.op0(opname);
        let modrm = if Self::is_reg_mem(mode) { self.next() } else { -1 };
        str.push_str(&self.operand(mode, modrm));
        str
    }

    fn op2(&mut self, opname: &str, mode1: Mode, mode2: Mode) -> String {
        let mut str = self.op0(opname);
        let modrm = if Self::is_reg_mem(mode1) || Self::is_reg_mem(mode2) {
            self.next()
        } else {
            -1
        };
        str.push_str(&self.operand(mode1, modrm));
        str.push_str(", ");
        str.push_str(&self.operand(mode2, modrm));
        str
    }

    /// Format an arithmetic instruction, choosing the immediate width
    /// from the sign-extension bit of the opcode.
    fn arith(&mut self, opname: &str, opcode: i32) -> String {
        if opcode & 0x02 != 0 {
            self.op2(opname, Rm32, Imm8)
        } else {
            self.op2(opname, Rm32, Imm32)
        }
    }

    fn farith0(&mut self, opname: &str) -> String {
        self.cur += 1;
        self.op0(opname)
    }

    fn farith1(&mut self, opname: &str, i: i32) -> String {
        assert!((0..8).contains(&i), "invalid floating-point register");
        format!("{}st({})", self.farith0(opname), i)
    }

    fn farith2(&mut self, opname: &str, i: i32, j: i32) -> String {
        assert!(
            (0..8).contains(&i) && (0..8).contains(&j),
            "invalid floating-point register"
        );
        format!("{}st({}), st({})", self.farith0(opname), i, j)
    }

    fn digit(&self) -> i32 {
        (self.byte_at(self.cur) >> 3) & 0x7
    }

    fn unknown(&self, opcode: i32) -> DecodeError {
        DecodeError::UnknownOpcode {
            offset: self.cur - 1,
            opcode: opcode as u8,
        }
    }

    /// Decode instructions whose first opcode byte is 0F.
    fn escape(&mut self) -> Result<String, DecodeError> {
        let opcode2 = self.next();
        Ok(match opcode2 {
            0x40..=0x4f => {
                let name = format!("cmov{}", CC[(opcode2 & 0xf) as usize]);
                self.op2(&name, R32, Rm32)
            }
            0x80..=0x8f => {
                let name = format!("j{}", CC[(opcode2 & 0xf) as usize]);
                self.op1(&name, Rel32)
            }
            0x90..=0x9f => {
                let name = format!("set{}", CC[(opcode2 & 0xf) as usize]);
                self.op1(&name, Rm8)
            }
            0x31 => self.op0("rdtsc"),
            0xa2 => self.op0("cpuid"),
            0xa5 => format!("{}, cl", self.op2("shld", Rm32, R32)),
            0xad => format!("{}, cl", self.op2("shrd", Rm32, R32)),
            0xaf => self.op2("imul", R32, Rm32),
            0xb1 => self.op2("cmpxchg", Rm32, R32),
            0xb6 => self.op2("movzx", R32, Rm8),
            0xb7 => self.op2("movzx", R32, Rm16),
            0xbe => self.op2("movsx", R32, Rm8),
            0xbf => self.op2("movsx", R32, Rm16),
            0xc0 => self.op2("xadd", Rm8, R8),
            0xc1 => self.op2("xadd", Rm32, R32),
            0xc8..=0xcf => format!(
                "{}{}",
                self.op0("bswap"),
                DWORD_REG_NAMES[(opcode2 - 0xc8) as usize]
            ),
            _ => return Err(self.unknown(opcode2)),
        })
    }

    /// Decode a floating-point instruction.
    fn float_op(&mut self, opcode: i32) -> Result<String, DecodeError> {
        let opcode2 = self.byte_at(self.cur);
        let digit = (opcode2 >> 3) & 0x7;
        Ok(match opcode {
            0xd8 => match opcode2 {
                0xc0..=0xc7 => self.farith2("fadd", 0, opcode2 - 0xc0),
                0xc8..=0xcf => self.farith2("fmul", 0, opcode2 - 0xc8),
                0xe0..=0xe7 => self.farith2("fsub", 0, opcode2 - 0xe0),
                0xe8..=0xef => self.farith2("fsubr", 0, opcode2 - 0xe8),
                0xf0..=0xf7 => self.farith2("fdiv", 0, opcode2 - 0xf0),
                0xf8..=0xff => self.farith2("fdivr", 0, opcode2 - 0xf8),
                _ => match digit {
                    0 => self.op1("fadd", Rm32),
                    1 => self.op1("fmul", Rm32),
                    3 => self.op1("fcomp", Rm32),
                    4 => self.op1("fsub", Rm32),
                    5 => self.op1("fsubr", Rm32),
                    6 => self.op1("fdiv", Rm32),
                    7 => self.op1("fdivr", Rm32),
                    _ => return Err(self.unknown(opcode2)),
                },
            },
            0xd9 => match opcode2 {
                0xc0..=0xc7 => self.farith1("fld", opcode2 - 0xc0),
                0xc8..=0xcf => self.farith1("fxch", opcode2 - 0xc8),
                0xd0 => self.farith0("fnop"),
                0xe0 => self.farith0("fchs"),
                0xe1 => self.farith0("fabs"),
                0xe4 => self.farith0("ftst"),
                0xe8 => self.farith0("fld1"),
                0xeb => self.farith0("fldpi"),
                0xee => self.farith0("fldz"),
                0xf5 => self.farith0("fprem1"),
                0xf6 => self.farith0("fdecstp"),
                0xf7 => self.farith0("fincstp"),
                0xf8 => self.farith0("fprem"),
                0xfa => self.farith0("fsqrt"),
                0xfe => self.farith0("fsin"),
                0xff => self.farith0("fcos"),
                _ => match digit {
                    0 => self.op1("fld", Rm32),
                    2 => self.op1("fst", Rm32),
                    3 => self.op1("fstp", Rm32),
                    4 => self.op1("fldenv", Mem),
                    5 => self.op1("fldcw", Rm16),
                    _ => return Err(self.unknown(opcode2)),
                },
            },
            0xda => match opcode2 {
                0xe9 => self.farith0("fucompp"),
                _ => return Err(self.unknown(opcode2)),
            },
            0xdb => match opcode2 {
                0xe8..=0xef => self.farith2("fucomi", 0, opcode2 - 0xe8),
                _ => match digit {
                    0 => self.op1("fild", Rm32),
                    2 => self.op1("fist", Rm32),
                    3 => self.op1("fistp", Rm32),
                    _ => return Err(self.unknown(opcode2)),
                },
            },
            0xdc => match opcode2 {
                0xc0..=0xc7 => self.farith2("fadd", opcode2 - 0xc0, 0),
                0xc8..=0xcf => self.farith2("fmul", opcode2 - 0xc8, 0),
                0xe0..=0xe7 => self.farith2("fsubr", opcode2 - 0xe0, 0),
                0xe8..=0xef => self.farith2("fsub", opcode2 - 0xe8, 0),
                0xf0..=0xf7 => self.farith2("fdivr", opcode2 - 0xf0, 0),
                0xf8..=0xff => self.farith2("fdiv", opcode2 - 0xf8, 0),
                _ => match digit {
                    0 => self.op1("fadd", Rm64),
                    1 => self.op1("fmul", Rm64),
                    3 => self.op1("fcomp", Rm64),
                    4 => self.op1("fsub", Rm64),
                    5 => self.op1("fsubr", Rm64),
                    6 => self.op1("fdiv", Rm64),
                    7 => self.op1("fdivr", Rm64),
                    _ => return Err(self.unknown(opcode2)),
                },
            },
            0xdd => match opcode2 {
                0xc0..=0xc7 => self.farith1("ffree", opcode2 - 0xc0),
                0xd8..=0xdf => self.farith1("fstp", opcode2 - 0xd8),
                0xe0..=0xe7 => self.farith1("fucom", opcode2 - 0xe0),
                0xe8..=0xef => self.farith1("fucomp", opcode2 - 0xe8),
                _ => match digit {
                    0 => self.op1("fld", Rm64),
                    2 => self.op1("fst", Rm64),
                    3 => self.op1("fstp", Rm64),
                    4 => self.op1("frstor", Mem),
                    6 => self.op1("fnsave", Mem),
                    _ => return Err(self.unknown(opcode2)),
                },
            },
            0xde => match opcode2 {
                0xc0..=0xc7 => self.farith2("faddp", opcode2 - 0xc0, 0),
                0xc8..=0xcf => self.farith2("fmulp", opcode2 - 0xc8, 0),
                0xd9 => self.farith0("fcompp"),
                0xe0..=0xe7 => self.farith2("fsubrp", opcode2 - 0xe0, 0),
                0xe8..=0xef => self.farith2("fsubp", opcode2 - 0xe8, 0),
                0xf0..=0xf7 => self.farith2("fdivrp", opcode2 - 0xf0, 0),
                0xf8..=0xff => self.farith2("fdivp", opcode2 - 0xf8, 0),
                _ => return Err(self.unknown(opcode2)),
            },
            0xdf => match opcode2 {
                0xe0 => format!("{}ax", self.farith0("fnstsw")),
                0xe8..=0xef => self.farith2("fucomip", 0, opcode2 - 0xe8),
                _ => match digit {
                    5 => self.op1("fild", Rm64),
                    7 => self.op1("fistp", Rm64),
                    _ => return Err(self.unknown(opcode2)),
                },
            },
            _ => unreachable!("not a floating-point opcode"),
        })
    }

    /// Decode the next instruction.
    fn decode(&mut self) -> Result<String, DecodeError> {
        self.prefix.clear();
        self.segment.clear();
        self.operand_size_override = false;
        self.truncated.set(false);
        let start = self.cur;
        loop {
            let opcode = self.next();
            if self.truncated.get() {
                return Err(DecodeError::TruncatedInstruction { offset: start });
            }
            let instr = match opcode {
                0x01 => self.op2("add", Rm32, R32),
                0x03 => self.op2("add", R32, Rm32),
                0x0b => self.op2("or", R32, Rm32),
                0x0f => self.escape()?,
                0x13 => self.op2("adc", R32, Rm32),
                0x1b => self.op2("sbb", R32, Rm32),
                0x23 => self.op2("and", R32, Rm32),
                0x26 => {
                    self.segment = "es:".to_string();
                    continue;
                }
                0x2b => self.op2("sub", R32, Rm32),
                0x2e => {
                    self.segment = "cs:".to_string();
                    continue;
                }
                0x33 => self.op2("xor", R32, Rm32),
                0x36 => {
                    self.segment = "ss:".to_string();
                    continue;
                }
                0x3b => self.op2("cmp", R32, Rm32),
                0x3e => {
                    self.segment = "ds:".to_string();
                    continue;
                }
                0x40..=0x47 => format!(
                    "{}{}",
                    self.op0("inc"),
                    self.register((opcode - 0x40) as usize)
                ),
                0x48..=0x4f => format!(
                    "{}{}",
                    self.op0("dec"),
                    self.register((opcode - 0x48) as usize)
                ),
                0x50..=0x57 => format!(
                    "{}{}",
                    self.op0("push"),
                    self.register((opcode - 0x50) as usize)
                ),
                0x58..=0x5f => format!(
                    "{}{}",
                    self.op0("pop"),
                    self.register((opcode - 0x58) as usize)
                ),
                0x60 => self.op0("pushad"),
                0x61 => self.op0("popad"),
                0x64 => {
                    self.segment = "fs:".to_string();
                    continue;
                }
                0x65 => {
                    self.segment = "gs:".to_string();
                    continue;
                }
                0x66 => {
                    self.operand_size_override = true;
                    continue;
                }
                0x68 => self.op1("push", Imm32),
                0x69 => {
                    let head = self.op2("imul", R32, Rm32);
                    format!("{}, {}", head, self.operand(Imm32, -1))
                }
                0x6b => {
                    let head = self.op2("imul", R32, Rm32);
                    format!("{}, {}", head, self.operand(Imm8, -1))
                }
                0x70..=0x7f => {
                    let name = format!("j{}", CC[(opcode & 0xf) as usize]);
                    self.op1(&name, Rel8)
                }
                0x81 | 0x83 => match self.digit() {
                    0 => self.arith("add", opcode),
                    1 => self.arith("or", opcode),
                    2 => self.arith("adc", opcode),
                    3 => self.arith("sbb", opcode),
                    4 => self.arith("and", opcode),
                    5 => self.arith("sub", opcode),
                    6 => self.arith("xor", opcode),
                    7 => self.arith("cmp", opcode),
                    _ => unreachable!(),
                },
                0x85 => self.op2("test", Rm32, R32),
                0x87 => self.op2("xchg", R32, Rm32),
                0x88 => self.op2("mov", Rm8, R8),
                0x89 => self.op2("mov", Rm32, R32),
                0x8a => self.op2("mov", R8, Rm8),
                0x8b => self.op2("mov", R32, Rm32),
                0x8d => self.op2("lea", R32, Mem),
                0x8f => {
                    if self.digit() == 0 {
                        self.op1("pop", Rm32)
                    } else {
                        return Err(self.unknown(opcode));
                    }
                }
                0x90 => self.op0("nop"),
                0x99 => self.op0("cdq"),
                0x9b => {
                    if self.peek(0) == 0xd9 && (self.peek(1) & 0x38) == 0x38 {
                        self.cur += 1;
                        self.op1("fstcw", Rm16)
                    } else if self.peek(0) == 0xdb && self.peek(1) == 0xe3 {
                        self.cur += 2;
                        self.op0("finit")
                    } else {
                        self.op0("fwait")
                    }
                }
                0x9c => self.op0("pushfd"),
                0x9d => self.op0("popfd"),
                0x9e => self.op0("sahf"),
                0xa5 => self.op0("movsd"),
                0xa9 => format!("{}eax, {}", self.op0("test"), self.operand(Imm32, -1)),
                0xab => self.op0("stosd"),
                0xb8..=0xbf => {
                    let head = self.op0("mov");
                    let reg = self.register((opcode - 0xb8) as usize);
                    format!("{}{}, {}", head, reg, self.operand(Imm32, -1))
                }
                0xc1 => match self.digit() {
                    2 => self.op2("rcl", Rm32, Imm8),
                    4 => self.op2("shl", Rm32, Imm8),
                    5 => self.op2("shr", Rm32, Imm8),
                    7 => self.op2("sar", Rm32, Imm8),
                    _ => return Err(self.unknown(opcode)),
                },
                0xc2 => self.op1("ret", Imm16),
                0xc3 => self.op0("ret"),
                0xc6 => {
                    if self.digit() == 0 {
                        self.op2("mov", Rm8, Imm8)
                    } else {
                        return Err(self.unknown(opcode));
                    }
                }
                0xc7 => {
                    if self.digit() == 0 {
                        self.op2("mov", Rm32, Imm32)
                    } else {
                        return Err(self.unknown(opcode));
                    }
                }
                0xcc => format!("{}3", self.op0("int")),
                0xd1 => match self.digit() {
                    2 => format!("{}, 1", self.op1("rcl", Rm32)),
                    4 => format!("{}, 1", self.op1("shl", Rm32)),
                    5 => format!("{}, 1", self.op1("shr", Rm32)),
                    7 => format!("{}, 1", self.op1("sar", Rm32)),
                    _ => return Err(self.unknown(opcode)),
                },
                0xd3 => match self.digit() {
                    2 => format!("{}, cl", self.op1("rcl", Rm32)),
                    4 => format!("{}, cl", self.op1("shl", Rm32)),
                    5 => format!("{}, cl", self.op1("shr", Rm32)),
                    7 => format!("{}, cl", self.op1("sar", Rm32)),
                    _ => return Err(self.unknown(opcode)),
                },
                0xd8..=0xdf => self.float_op(opcode)?,
                0xe8 => self.op1("call", Rel32),
                0xe9 => self.op1("jmp", Rel32),
                0xeb => self.op1("jmp", Rel8),
                0xf0 => {
                    self.prefix.push_str("lock ");
                    continue;
                }
                0xf3 => {
                    self.prefix.push_str("rep ");
                    continue;
                }
                0xf4 => self.op0("hlt"),
                0xf6 => {
                    if self.digit() == 0 {
                        self.op2("test", Rm8, Imm8)
                    } else {
                        return Err(self.unknown(opcode));
                    }
                }
                0xf7 => match self.digit() {
                    0 => self.op2("test", Rm32, Imm32),
                    2 => self.op1("not", Rm32),
                    3 => self.op1("neg", Rm32),
                    4 => self.op1("mul", Rm32),
                    7 => self.op1("idiv", Rm32),
                    _ => return Err(self.unknown(opcode)),
                },
                0xfe => {
                    if self.digit() == 1 {
                        self.op1("dec", Rm8)
                    } else {
                        return Err(self.unknown(opcode));
                    }
                }
                0xff => match self.digit() {
                    0 => self.op1("inc", Rm32),
                    1 => self.op1("dec", Rm32),
                    2 => self.op1("call", Rm32),
                    4 => self.op1("jmp", Rm32),
                    6 => self.op1("push", Rm32),
                    _ => return Err(self.unknown(opcode)),
                },
                _ => return Err(self.unknown(opcode)),
            };
            if self.truncated.get() {
                return Err(DecodeError::TruncatedInstruction { offset: start });
            }
            return Ok(instr);
        }
    }

    /// Print the raw bytes of a code area, aligned into the raw-byte
    /// column.
    fn print_bytes<W: Write>(&self, start: i32, size: i32, out: &mut W) -> fmt::Result {
        let mut line = format!("{} ", address_string(self.code_start + start));
        for i in 0..size {
            if line.len() > 30 {
                writeln!(out, "{}", line)?;
                line = " ".repeat(9);
            }
            line.push_str(&format!(" {:02X}", self.byte_at(start + i)));
        }
        while line.len() < 35 {
            line.push(' ');
        }
        write!(out, "{}", line)
    }

    /// Resynchronize after code rewritten by a patching stub. The
    /// install of a patch replaces the original instruction with a call
    /// into the stub; the copied original bytes that follow the call,
    /// and the byte-count byte preceding the stub, must not be decoded
    /// as instructions.
    fn patching<W: Write>(&mut self, last: i32, out: &mut W) -> fmt::Result {
        if self.stubs_start.contains(&(self.cur + 1)) {
            self.print_bytes(self.cur, 1, out)?;
            let bytes_to_copy = self.next();
            writeln!(out, "-- end of original code (size = {})", bytes_to_copy)?;
        } else if self.byte_at(last) == 0xe8 {
            let entry = self.cur + self.long_at(last + 1);
            if entry >= 0
                && entry < self.code.code_size() as i32
                && self.byte_at(entry) == 0xe9
            {
                let dest = self.code_start + entry + 5 + self.long_at(entry + 1);
                if self.patch_entries.contains(&dest) {
                    self.stubs_start.insert(entry);
                    let bytes_to_copy = self.byte_at(entry - 1);
                    if bytes_to_copy > self.cur - last {
                        self.print_bytes(self.cur, bytes_to_copy + last - self.cur, out)?;
                        writeln!(out)?;
                    }
                    self.cur = last + bytes_to_copy;
                }
            }
        }
        Ok(())
    }

    /// Print a code area without disassembling it.
    pub fn hex_dump<W: Write>(&self, start: i32, end: i32, out: &mut W) -> fmt::Result {
        if end <= start {
            return Ok(());
        }
        let mut line = String::new();
        for addr in (start & !0x0f)..end {
            if addr & 0x0f == 0 {
                if !line.is_empty() {
                    writeln!(out, "{}", line)?;
                }
                line = format!("{} ", address_string(addr));
            } else if addr & 0x07 == 0 {
                line.push(' ');
            }
            if addr < start {
                line.push_str("   ");
            } else {
                line.push_str(&format!(" {:02X}", self.byte_at(addr - self.code_start)));
            }
        }
        writeln!(out, "{}", line)
    }

    /// Disassemble the code between the two addresses.
    pub fn disassemble<W: Write>(
        &mut self,
        start: i32,
        end: i32,
        out: &mut W,
    ) -> Result<(), DecodeError> {
        self.cur = start - self.code_start;
        while self.code_start + self.cur < end {
            let last = self.cur;
            let instr = self.decode()?;
            self.print_bytes(last, self.cur - last, out)?;
            writeln!(out, "{}", instr)?;
            self.patching(last, out)?;
        }
        assert!(self.code_start + self.cur <= end, "last instruction too long");
        Ok(())
    }

    /// Print the relocation information stored in the code buffer.
    pub fn print_reloc_info<W: Write>(&self, out: &mut W) -> fmt::Result {
        let stream = self.code.reloc_stream();
        writeln!(out, "__address___type______________format__")?;
        let mut addr = self.code_start;
        let mut i = 0;
        while i < stream.len() {
            if reloc::is_prefix_word(stream[i]) {
                i += reloc::prefix_length(stream[i]);
            }
            let word = stream[i];
            addr += reloc::word_offset(word);
            let rtype = reloc::word_type(word);
            if rtype != RelocType::None.code() {
                let name = RelocType::from_code(rtype)
                    .map(|t| t.name())
                    .unwrap_or("data prefix");
                let format = reloc::word_format(word);
                writeln!(
                    out,
                    "  {}  {:<18}{}",
                    address_string(addr),
                    name,
                    reloc_format_string(format)
                )?;
            }
            i += 1;
        }
        Ok(())
    }

    /// Print the debug information stored in the code buffer.
    pub fn print_debug_info<W: Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "__bci_______offset____at call__")?;
        for entry in self.code.debug_info() {
            writeln!(
                out,
                "  {:<10}{:<10}{}",
                entry.bci,
                entry.offset,
                if entry.at_call { "yes" } else { "no" }
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assembler::{Assembler, Cond};
    use crate::asm::label::Label;
    use crate::asm::register::{Address, Register, ScaleFactor};

    fn decode_all(buf: &CodeBuffer) -> Vec<String> {
        let mut disasm = Disassembler::new(buf);
        let mut result = Vec::new();
        let end = buf.code_end();
        disasm.cur = 0;
        while buf.code_begin() + disasm.cur < end {
            let instr = disasm.decode().expect("decode failed");
            result.push(instr.split_whitespace().collect::<Vec<_>>().join(" "));
        }
        assert_eq!(buf.code_begin() + disasm.cur, end);
        result
    }

    fn encode(f: impl FnOnce(&mut Assembler)) -> CodeBuffer {
        let mut buf = CodeBuffer::default();
        let mut asm = Assembler::new(&mut buf);
        f(&mut asm);
        buf
    }

    #[test]
    fn test_decode_mov_imm() {
        let buf = encode(|a| a.movl_ri(Register::Eax, 0x12345678));
        assert_eq!(decode_all(&buf), vec!["mov eax, 12345678h"]);
    }

    #[test]
    fn test_decode_add_rr() {
        let buf = encode(|a| a.addl_rr(Register::Eax, Register::Ebx));
        assert_eq!(decode_all(&buf), vec!["add eax, ebx"]);
    }

    #[test]
    fn test_decode_memory_shapes() {
        let buf = encode(|a| {
            a.movl_ra(Register::Ecx, Address::base_disp(Register::Esi, 12));
            a.movl_ra(
                Register::Eax,
                Address::base_index(Register::Ebx, Register::Ecx, ScaleFactor::Times4, 8),
            );
            a.movl_ar(Address::base(Register::Esp), Register::Edx);
        });
        assert_eq!(
            decode_all(&buf),
            vec![
                "mov ecx, dword ptr [esi+Ch]",
                "mov eax, dword ptr [ebx+ecx*4+8h]",
                "mov dword ptr [esp], edx",
            ]
        );
    }

    #[test]
    fn test_decode_arith_imm_widths() {
        let buf = encode(|a| {
            a.addl_ri(Register::Ecx, 8);
            a.subl_ri(Register::Edx, 0x1234);
        });
        assert_eq!(
            decode_all(&buf),
            vec!["add ecx, 8h", "sub edx, 1234h"]
        );
    }

    #[test]
    fn test_decode_branches() {
        let buf = encode(|a| {
            let mut label = Label::new();
            a.bind(&mut label);
            a.nop();
            a.jmp(&mut label);
            a.jcc(Cond::Equal, &mut label);
        });
        let decoded = decode_all(&buf);
        assert_eq!(decoded[0], "nop");
        // Backward branches are short and resolve to the label address.
        assert_eq!(decoded[1], format!("jmp {}", address_string(1024)));
        assert_eq!(decoded[2], format!("je {}", address_string(1024)));
    }

    #[test]
    fn test_decode_long_jcc() {
        let buf = encode(|a| {
            let mut label = Label::new();
            a.jcc(Cond::Less, &mut label);
            let pos = a.offset();
            a.bind_to(&mut label, pos);
        });
        let decoded = decode_all(&buf);
        assert_eq!(decoded, vec![format!("jl {}", address_string(1024 + 6))]);
    }

    #[test]
    fn test_decode_lock_cmpxchg() {
        let buf = encode(|a| {
            a.lock();
            a.cmpxchg(Register::Ebx, Address::base(Register::Esi));
        });
        assert_eq!(decode_all(&buf), vec!["lock cmpxchg dword ptr [esi], ebx"]);
    }

    #[test]
    fn test_decode_shifts_and_setcc() {
        let buf = encode(|a| {
            a.shll(Register::Eax, 4);
            a.sarl_cl(Register::Edx);
            a.setb(Cond::NotEqual, Register::Ecx);
        });
        assert_eq!(
            decode_all(&buf),
            vec!["shl eax, 4h", "sar edx, cl", "setne cl"]
        );
    }

    #[test]
    fn test_decode_fpu() {
        let buf = encode(|a| {
            a.fxch(1);
            a.faddp(1);
            a.fnstswax();
            a.flds(Address::base(Register::Esp));
        });
        assert_eq!(
            decode_all(&buf),
            vec![
                "fxch st(1)",
                "faddp st(1), st(0)",
                "fnstsw ax",
                "fld dword ptr [esp]",
            ]
        );
    }

    #[test]
    fn test_decode_operand_size_override() {
        let buf = encode(|a| {
            a.movw_ar(Address::base(Register::Esi), Register::Eax);
        });
        assert_eq!(decode_all(&buf), vec!["mov word ptr [esi], ax"]);
    }

    #[test]
    fn test_unknown_opcode_is_an_error() {
        let mut buf = CodeBuffer::default();
        buf.append(0x0f);
        buf.append(0x0b);
        let mut disasm = Disassembler::new(&buf);
        let err = disasm.decode().unwrap_err();
        match err {
            DecodeError::UnknownOpcode { opcode, .. } => assert_eq!(opcode, 0x0b),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_truncated_instruction_is_an_error() {
        // mov eax, imm32 with three immediate bytes missing.
        let mut buf = CodeBuffer::default();
        buf.append(0xb8);
        buf.append(0x2a);
        let mut disasm = Disassembler::new(&buf);
        let err = disasm.decode().unwrap_err();
        match err {
            DecodeError::TruncatedInstruction { offset } => assert_eq!(offset, 0),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_truncated_after_prefix_is_an_error() {
        // The code ends right after an operand-size override.
        let mut buf = CodeBuffer::default();
        buf.append(0x66);
        let mut disasm = Disassembler::new(&buf);
        assert!(matches!(
            disasm.decode(),
            Err(DecodeError::TruncatedInstruction { offset: 0 })
        ));
    }

    #[test]
    fn test_disassemble_output_columns() {
        let buf = encode(|a| {
            a.nop();
            a.ret(0);
        });
        let mut disasm = Disassembler::new(&buf);
        let mut out = String::new();
        disasm
            .disassemble(buf.code_begin(), buf.code_end(), &mut out)
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&address_string(1024)));
        assert!(lines[0].contains("90"));
        assert!(lines[0].contains("nop"));
        assert!(lines[1].contains("ret"));
    }

    #[test]
    fn test_patch_stub_resynchronization() {
        // A call into a patching stub overwrites the original code. The
        // copied original bytes behind the call and the byte count in
        // front of the stub must be skipped, not decoded.
        let mut buf = CodeBuffer::default();
        let bytes: &[u8] = &[
            0xe8, 0x0b, 0x00, 0x00, 0x00, // call to the stub at offset 16
            0xaa, 0xbb, // leftover original bytes
            0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, // real code
            0x07, // stub byte count
            0xe9, 0xeb, 0x4b, 0x00, 0x00, // stub: jmp to the patch entry
        ];
        for &b in bytes {
            buf.append(b);
        }
        let mut disasm = Disassembler::new(&buf);
        disasm.set_patch_entries(vec![0x5000]);
        let mut out = String::new();
        disasm
            .disassemble(buf.code_begin(), buf.code_end(), &mut out)
            .unwrap();
        assert!(out.contains("-- end of original code (size = 7)"));
        // The leftover bytes at offsets 5 and 6 only appear in the raw
        // column, never as decoded instructions.
        assert!(out.contains("AA"));
        assert!(out.contains("BB"));
        let nops = out.matches("nop").count();
        assert_eq!(nops, 8);
    }

    #[test]
    fn test_print_reloc_info() {
        let buf = encode(|a| {
            a.nop();
            a.call_e(0x4000, crate::asm::reloc::RelocType::RuntimeCall);
        });
        let disasm = Disassembler::new(&buf);
        let mut out = String::new();
        disasm.print_reloc_info(&mut out).unwrap();
        assert!(out.contains("runtime_call"));
        assert!(out.contains(&address_string(1024 + 1)));
    }

    #[test]
    fn test_print_debug_info() {
        use crate::asm::codebuf::DebugEntry;
        let mut buf = CodeBuffer::default();
        buf.add_debug_info(DebugEntry {
            offset: 8,
            bci: 3,
            at_call: true,
            frame_size: 2,
            arg_count: 0,
            oop_regs: Vec::new(),
        });
        let disasm = Disassembler::new(&buf);
        let mut out = String::new();
        disasm.print_debug_info(&mut out).unwrap();
        assert!(out.contains("yes"));
        assert!(out.contains('3'));
        assert!(out.contains('8'));
    }

    #[test]
    fn test_hex_dump() {
        let buf = encode(|a| {
            for _ in 0..20 {
                a.nop();
            }
        });
        let disasm = Disassembler::new(&buf);
        let mut out = String::new();
        disasm.hex_dump(buf.code_begin(), buf.code_end(), &mut out).unwrap();
        assert!(out.contains("90"));
        // The first output line is the first address row.
        assert!(out.starts_with(&address_string(1024)));
    }
}
