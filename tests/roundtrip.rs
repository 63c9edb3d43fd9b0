//! Encode-decode round trips through the public API.

use ferrite::asm::reloc::{self, RelocType};
use ferrite::asm::{Disassembler, Oop, ScaleFactor};
use ferrite::{Address, Assembler, CodeBuffer, Cond, Label, MacroAssembler, Register, TargetConfig};

fn disassemble(buf: &CodeBuffer) -> Vec<String> {
    let mut disasm = Disassembler::new(buf);
    let mut out = String::new();
    disasm
        .disassemble(buf.code_begin(), buf.code_end(), &mut out)
        .expect("generated code must decode");
    out.lines()
        .map(|line| {
            // Strip the address and raw-byte columns.
            line[35.min(line.len())..]
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect()
}

#[test]
fn test_straight_line_code_round_trips() {
    let mut buf = CodeBuffer::default();
    {
        let mut asm = Assembler::new(&mut buf);
        asm.movl_ri(Register::Eax, 100);
        asm.addl_ra(Register::Eax, Address::base_disp(Register::Ebp, 8));
        asm.imull_rri(Register::Eax, Register::Eax, 3);
        asm.ret(0);
    }
    assert_eq!(
        disassemble(&buf),
        vec![
            "mov eax, 64h",
            "add eax, dword ptr [ebp+8h]",
            "imul eax, eax, 3h",
            "ret",
        ]
    );
}

#[test]
fn test_every_addressing_shape_round_trips() {
    let mut buf = CodeBuffer::default();
    {
        let mut asm = Assembler::new(&mut buf);
        asm.movl_ra(Register::Edx, Address::base(Register::Esi));
        asm.movl_ra(Register::Edx, Address::base_disp(Register::Esi, -4));
        asm.movl_ra(Register::Edx, Address::base_disp(Register::Ebp, 0));
        asm.movl_ra(
            Register::Edx,
            Address::base_index(Register::Eax, Register::Ebx, ScaleFactor::Times2, 0x100),
        );
        asm.movl_ra(
            Register::Edx,
            Address::index_disp(Register::Ecx, ScaleFactor::Times8, 0x40),
        );
        asm.movl_ra(Register::Edx, Address::absolute(0x2000, RelocType::None));
    }
    assert_eq!(
        disassemble(&buf),
        vec![
            "mov edx, dword ptr [esi]",
            "mov edx, dword ptr [esi-4h]",
            "mov edx, dword ptr [ebp]",
            "mov edx, dword ptr [eax+ebx*2+100h]",
            "mov edx, dword ptr [ecx*8+40h]",
            "mov edx, dword ptr [2000h]",
        ]
    );
}

#[test]
fn test_forward_branch_decodes_to_bound_position() {
    let mut buf = CodeBuffer::default();
    let target;
    {
        let mut asm = Assembler::new(&mut buf);
        let mut done = Label::new();
        asm.testl_rr(Register::Eax, Register::Eax);
        asm.jcc(Cond::Equal, &mut done);
        asm.decl_r(Register::Eax);
        asm.bind(&mut done);
        target = asm.code_begin() + done.pos();
        asm.ret(0);
    }
    let lines = disassemble(&buf);
    assert_eq!(lines[1], format!("je {:08X}", target as u32));
}

#[test]
fn test_loop_with_backward_branch_round_trips() {
    let mut buf = CodeBuffer::default();
    let head;
    {
        let mut asm = Assembler::new(&mut buf);
        let mut loop_head = Label::new();
        asm.movl_ri(Register::Ecx, 10);
        asm.bind(&mut loop_head);
        head = asm.code_begin() + loop_head.pos();
        asm.decl_r(Register::Ecx);
        asm.jcc(Cond::NotEqual, &mut loop_head);
        asm.ret(0);
    }
    let lines = disassemble(&buf);
    // The backward branch uses the short form and still resolves to
    // the head of the loop.
    assert_eq!(lines[2], format!("jne {:08X}", head as u32));
    assert_eq!(buf.byte_at(buf.code_size() - 3), 0x75);
}

#[test]
fn test_method_prologue_epilogue_round_trips() {
    let mut buf = CodeBuffer::default();
    {
        let mut masm = MacroAssembler::new(&mut buf, TargetConfig::default());
        masm.verified_entry();
        masm.enter();
        masm.increment(Register::Eax, 2);
        masm.leave();
        masm.ret(0);
    }
    let lines = disassemble(&buf);
    // The entry padding decodes as a single prefixed nop.
    assert_eq!(
        lines,
        vec![
            "nop",
            "push ebp",
            "mov ebp, esp",
            "add eax, 2h",
            "mov esp, ebp",
            "pop ebp",
            "ret",
        ]
    );
}

#[test]
fn test_fpu_sequences_round_trip() {
    let mut buf = CodeBuffer::default();
    {
        let mut asm = Assembler::new(&mut buf);
        asm.flds(Address::base_disp(Register::Esp, 4));
        asm.fld1();
        asm.faddp(1);
        asm.fstps(Address::base_disp(Register::Esp, 4));
    }
    assert_eq!(
        disassemble(&buf),
        vec![
            "fld dword ptr [esp+4h]",
            "fld1",
            "faddp st(1), st(0)",
            "fstp dword ptr [esp+4h]",
        ]
    );
}

#[test]
fn test_reloc_stream_reconstructs_addresses() {
    let mut buf = CodeBuffer::default();
    let mut expected = Vec::new();
    {
        let mut asm = Assembler::new(&mut buf);
        for i in 0..4 {
            // Spread the call sites out so several offsets accumulate.
            for _ in 0..i * 7 {
                asm.nop();
            }
            expected.push(asm.code_pos());
            asm.call_e(0x8000, RelocType::RuntimeCall);
        }
    }
    let stream = buf.reloc_stream();
    let mut addrs = Vec::new();
    let mut addr = buf.code_begin();
    let mut i = 0;
    while i < stream.len() {
        if reloc::is_prefix_word(stream[i]) {
            i += reloc::prefix_length(stream[i]);
        }
        addr += reloc::word_offset(stream[i]);
        if reloc::word_type(stream[i]) == RelocType::RuntimeCall.code() {
            addrs.push(addr);
        }
        i += 1;
    }
    assert_eq!(addrs, expected);
}

#[test]
fn test_oop_constant_is_recorded_once() {
    let mut buf = CodeBuffer::default();
    {
        let mut asm = Assembler::new(&mut buf);
        asm.movl_ro(Register::Eax, Oop(0x1234));
        asm.cmpl_ro(Register::Eax, Oop(0x1234));
    }
    // Index 0 is the reserved empty slot.
    assert_eq!(buf.oops().len(), 2);
    let oop_relocs = buf
        .relocs()
        .iter()
        .filter(|r| r.type_code() == RelocType::Oop.code())
        .count();
    assert_eq!(oop_relocs, 2);
}

#[test]
fn test_finalize_produces_executable_memory() {
    let mut buf = CodeBuffer::default();
    {
        let mut asm = Assembler::new(&mut buf);
        asm.movl_ri(Register::Eax, 42);
        asm.ret(0);
    }
    let mem = buf.finalize().expect("finalize must succeed");
    assert!(mem.is_executable());
    assert!(mem.size() >= buf.code_size());
    assert!(!mem.as_ptr().is_null());
}

#[test]
fn test_allocation_sequence_round_trips() {
    let mut buf = CodeBuffer::default();
    {
        let mut masm = MacroAssembler::new(&mut buf, TargetConfig::default());
        let mut slow = Label::new();
        masm.allocate_object(
            Register::Eax,
            Register::Ebx,
            Register::Ecx,
            2,
            4,
            Register::Edx,
            &mut slow,
        );
        masm.bind(&mut slow);
    }
    // Every byte the composite sequence emitted must decode.
    let lines = disassemble(&buf);
    assert!(lines.iter().any(|l| l.starts_with("lock cmpxchg")));
}
