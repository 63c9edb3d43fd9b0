//! Composite emission idioms built on top of the instruction encoder.
//!
//! The macro assembler wraps the plain assembler and adds the multi
//! instruction sequences code generation uses over and over: stack
//! frames, null checks, long arithmetic on register pairs, the
//! floating-point remainder loop, and the atomic fast paths for object
//! locking and heap allocation. The atomic sequences emit a lock prefix
//! only when the target is configured as multiprocessor capable.

use std::ops::{Deref, DerefMut};

use super::assembler::{Assembler, Cond, FPU_STATE_SIZE_IN_WORDS};
use super::assembler::{CS_SEGMENT, ES_SEGMENT, FS_SEGMENT, GS_SEGMENT};
use super::codebuf::CodeBuffer;
use super::label::Label;
use super::register::{Address, Register, ScaleFactor};
use super::reloc::RelocType;
use crate::config::TargetConfig;

const BYTES_PER_WORD: i32 = 4;
const BITS_PER_WORD: i32 = 32;

/// Object and heap layout constants the emitted fast paths depend on.
#[derive(Debug, Clone)]
pub struct RuntimeLayout {
    /// Offset of the mark word in an object header
    pub mark_offset: i32,
    /// Offset of the class pointer in an object header
    pub klass_offset: i32,
    /// Offset of the length field in an array header
    pub array_length_offset: i32,
    /// Mark word tag of an unlocked object
    pub mark_unlocked_value: i32,
    /// Mark word installed into freshly allocated objects
    pub mark_prototype: i32,
    /// Size of a virtual memory page in bytes
    pub vm_page_size: i32,
    /// Address of the shared heap top pointer
    pub heap_top_addr: i32,
    /// Address of the shared heap end pointer
    pub heap_end_addr: i32,
    /// Whether all objects are aligned to double words
    pub align_all_objects: bool,
}

impl Default for RuntimeLayout {
    fn default() -> Self {
        Self {
            mark_offset: 0,
            klass_offset: 4,
            array_length_offset: 8,
            mark_unlocked_value: 1,
            mark_prototype: 1,
            vm_page_size: 4096,
            heap_top_addr: 0x2000,
            heap_end_addr: 0x2004,
            align_all_objects: true,
        }
    }
}

/// Extends the assembler by frequently used macros.
pub struct MacroAssembler<'a> {
    asm: Assembler<'a>,
    config: TargetConfig,
    layout: RuntimeLayout,
}

impl<'a> Deref for MacroAssembler<'a> {
    type Target = Assembler<'a>;

    fn deref(&self) -> &Assembler<'a> {
        &self.asm
    }
}

impl<'a> DerefMut for MacroAssembler<'a> {
    fn deref_mut(&mut self) -> &mut Assembler<'a> {
        &mut self.asm
    }
}

impl<'a> MacroAssembler<'a> {
    pub fn new(buf: &'a mut CodeBuffer, config: TargetConfig) -> Self {
        Self::with_layout(buf, config, RuntimeLayout::default())
    }

    pub fn with_layout(
        buf: &'a mut CodeBuffer,
        config: TargetConfig,
        layout: RuntimeLayout,
    ) -> Self {
        Self {
            asm: Assembler::new(buf),
            config,
            layout,
        }
    }

    /// Emit 5 bytes that perform no operation. The sequence is a single
    /// instruction and therefore safe for patching.
    pub fn fat_nop(&mut self) {
        self.prefix(ES_SEGMENT);
        self.prefix(CS_SEGMENT);
        self.prefix(FS_SEGMENT);
        self.prefix(GS_SEGMENT);
        self.nop();
    }

    /// Emit the method entry sequence at the configured entry
    /// alignment. The first instruction must span at least two bytes so
    /// it can be overwritten atomically on a multiprocessor.
    pub fn verified_entry(&mut self) {
        let alignment = self.config.code_entry_alignment as i32;
        self.align(alignment);
        if self.config.mp {
            self.fat_nop();
        }
    }

    /// Check if accessing memory at the given offset from a potentially
    /// null base can rely on the hardware trap.
    pub fn needs_explicit_null_check(&self, offset: i32) -> bool {
        offset < 0 || offset >= self.layout.vm_page_size
    }

    /// Provoke an exception if the content of the register is null and
    /// the later access would not trap by itself.
    pub fn null_check_offset(&mut self, reg: Register, offset: i32) {
        if self.needs_explicit_null_check(offset) {
            self.cmpl_ra(Register::Eax, Address::base(reg));
        }
    }

    /// Provoke an exception if the content of the register is null.
    pub fn null_check(&mut self, reg: Register) {
        self.null_check_offset(reg, -1);
    }

    /// Increment the register by the specified value, using the
    /// shortest form. No code is generated for zero.
    pub fn increment(&mut self, reg: Register, value: i32) {
        if value < 0 && value != i32::MIN {
            self.decrement(reg, -value);
        } else if value == 1 {
            self.incl_r(reg);
        } else if value != 0 {
            self.addl_ri(reg, value);
        }
    }

    /// Decrement the register by the specified value. No code is
    /// generated for zero.
    pub fn decrement(&mut self, reg: Register, value: i32) {
        if value < 0 && value != i32::MIN {
            self.increment(reg, -value);
        } else if value == 1 {
            self.decl_r(reg);
        } else if value != 0 {
            self.subl_ri(reg, value);
        }
    }

    /// Align the next instruction to the specified boundary.
    pub fn align(&mut self, modulus: i32) {
        while self.offset() % modulus != 0 {
            self.nop();
        }
    }

    /// Create a stack frame: push the old frame pointer and make EBP
    /// point at the new frame.
    pub fn enter(&mut self) {
        self.pushl_r(Register::Ebp);
        self.movl_rr(Register::Ebp, Register::Esp);
    }

    /// Release the stack frame and restore the caller's frame pointer.
    pub fn leave(&mut self) {
        self.movl_rr(Register::Esp, Register::Ebp);
        self.popl_r(Register::Ebp);
    }

    /// Call a leaf entry point in the runtime and pop its arguments.
    pub fn call_runtime_leaf(&mut self, entry: i32, num_args: i32) {
        self.call_e(entry, RelocType::RuntimeCall);
        self.increment(Register::Esp, num_args * BYTES_PER_WORD);
    }

    /// Set the register to 0 or 1 depending on its least significant
    /// byte being zero or not.
    pub fn c2bool(&mut self, x: Register) {
        self.andl_ri(x, 0xff);
        self.setb(Cond::NOT_ZERO, x);
    }

    /// Emit an integer division that yields the dividend for the
    /// min-int divided by -1 overflow case instead of trapping. Returns
    /// the offset of the idivl instruction for implicit exception
    /// handling.
    pub fn corrected_idivl(&mut self, reg: Register) -> i32 {
        assert!(
            reg != Register::Eax && reg != Register::Edx,
            "register cannot be eax or edx"
        );
        let mut normal = Label::new();
        let mut special = Label::new();
        self.cmpl_ri(Register::Eax, i32::MIN);
        self.jcc(Cond::NotEqual, &mut normal);
        self.xorl_rr(Register::Edx, Register::Edx);
        self.cmpl_ri(reg, -1);
        self.jcc(Cond::Equal, &mut special);
        self.bind(&mut normal);
        self.cdql();
        let offset = self.offset();
        self.idivl(reg);
        self.bind(&mut special);
        offset
    }

    /// Divide the register by a power of two with rounding toward zero.
    pub fn division_with_shift(&mut self, reg: Register, shift_value: i32) {
        assert!(shift_value > 0, "illegal shift value");
        let mut positive = Label::new();
        self.testl_rr(reg, reg);
        self.jcc(Cond::Positive, &mut positive);
        let offset = (1 << shift_value) - 1;
        if offset == 1 {
            self.incl_r(reg);
        } else {
            self.addl_ri(reg, offset);
        }
        self.bind(&mut positive);
        self.sarl(reg, shift_value);
    }

    /// Sign extend the half-word in the register to 32 bits.
    pub fn sign_extend_short(&mut self, reg: Register) {
        self.movsxw_rr(reg, reg);
    }

    /// Sign extend the byte in the register to 32 bits.
    pub fn sign_extend_byte(&mut self, reg: Register) {
        if reg.has_byte_register() {
            self.movsxb_rr(reg, reg);
        } else {
            self.shll(reg, 24);
            self.sarl(reg, 24);
        }
    }

    // ==================== Long arithmetic ====================

    /// Compute the two's complement negation of a double-word value.
    pub fn lneg(&mut self, hi: Register, lo: Register) {
        self.negl(lo);
        self.adcl_ri(hi, 0);
        self.negl(hi);
    }

    /// Multiply two long integers stored on the stack at the given ESP
    /// offsets, leaving the product in EDX:EAX.
    pub fn lmul(&mut self, offset_x: i32, offset_y: i32) {
        let x_hi = Address::base_disp(Register::Esp, offset_x + BYTES_PER_WORD);
        let x_lo = Address::base_disp(Register::Esp, offset_x);
        let y_hi = Address::base_disp(Register::Esp, offset_y + BYTES_PER_WORD);
        let y_lo = Address::base_disp(Register::Esp, offset_y);
        let mut quick = Label::new();
        self.movl_ra(Register::Ebx, x_hi);
        self.movl_ra(Register::Ecx, y_hi);
        self.movl_rr(Register::Eax, Register::Ebx);
        self.orl_rr(Register::Ebx, Register::Ecx);
        self.jcc(Cond::ZERO, &mut quick);
        self.mull_a(y_lo);
        self.movl_rr(Register::Ebx, Register::Eax);
        self.movl_ra(Register::Eax, x_lo);
        self.mull_r(Register::Ecx);
        self.addl_rr(Register::Ebx, Register::Eax);
        self.bind(&mut quick);
        self.movl_ra(Register::Eax, x_lo);
        self.mull_a(y_lo);
        self.addl_rr(Register::Edx, Register::Ebx);
    }

    /// Shift the double-word operand left by the count in ECX.
    pub fn lshl(&mut self, hi: Register, lo: Register) {
        assert!(
            hi != Register::Ecx && lo != Register::Ecx,
            "must not use ecx"
        );
        let mut label = Label::new();
        self.andl_ri(Register::Ecx, 0x3f);
        self.cmpl_ri(Register::Ecx, BITS_PER_WORD);
        self.jcc(Cond::Less, &mut label);
        self.movl_rr(hi, lo);
        self.xorl_rr(lo, lo);
        self.bind(&mut label);
        self.shldl(hi, lo);
        self.shll_cl(lo);
    }

    /// Shift the double-word operand right by the count in ECX, with or
    /// without sign extension.
    pub fn lshr(&mut self, hi: Register, lo: Register, sign_extension: bool) {
        assert!(
            hi != Register::Ecx && lo != Register::Ecx,
            "must not use ecx"
        );
        let mut label = Label::new();
        self.andl_ri(Register::Ecx, 0x3f);
        self.cmpl_ri(Register::Ecx, BITS_PER_WORD);
        self.jcc(Cond::Less, &mut label);
        self.movl_rr(lo, hi);
        if sign_extension {
            self.sarl(hi, 31);
        } else {
            self.xorl_rr(hi, hi);
        }
        self.bind(&mut label);
        self.shrdl(lo, hi);
        if sign_extension {
            self.sarl_cl(hi);
        } else {
            self.shrl_cl(hi);
        }
    }

    /// Compare two long integer values for order. The first register
    /// pair ends up holding -1, 0 or 1.
    pub fn lcmp2int(&mut self, x_hi: Register, x_lo: Register, y_hi: Register, y_lo: Register) {
        let mut l1 = Label::new();
        let mut l2 = Label::new();
        self.subl_rr(x_lo, y_lo);
        self.sbbl_rr(x_hi, y_hi);
        self.jcc(Cond::NoOverflow, &mut l1);
        self.notl(x_hi);
        self.bind(&mut l1);
        self.orl_rr(x_lo, x_hi);
        self.jcc(Cond::ZERO, &mut l2);
        self.sarl(x_hi, 30);
        self.andl_ri(x_hi, -2);
        self.incl_r(x_hi);
        self.bind(&mut l2);
    }

    // ==================== FPU sequences ====================

    /// Save EAX into the given register, or onto the stack when no
    /// register is available.
    pub fn save_eax(&mut self, tmp: Option<Register>) {
        match tmp {
            None => self.pushl_r(Register::Eax),
            Some(Register::Eax) => {}
            Some(reg) => self.movl_rr(reg, Register::Eax),
        }
    }

    /// Restore EAX from the given register or from the stack.
    pub fn restore_eax(&mut self, tmp: Option<Register>) {
        match tmp {
            None => self.popl_r(Register::Eax),
            Some(Register::Eax) => {}
            Some(reg) => self.movl_rr(Register::Eax, reg),
        }
    }

    /// Clear and pop the topmost value on the FPU stack.
    pub fn fpop(&mut self) {
        self.ffree(0);
        self.fincstp();
    }

    /// Compute the floating-point remainder with truncating semantics.
    /// The partial remainder instruction is re-executed until the C2
    /// flag is cleared.
    pub fn fremr(&mut self, tmp: Option<Register>) {
        self.save_eax(tmp);
        let mut label = Label::new();
        self.bind(&mut label);
        self.fprem();
        self.fwait();
        self.fnstswax();
        self.sahf();
        self.jcc(Cond::Parity, &mut label);
        self.restore_eax(tmp);
        self.fxch(1);
        self.fpop();
    }

    /// Compare the two topmost FPU stack entries and set EFLAGS.
    pub fn fcmp(&mut self, tmp: Option<Register>) {
        self.fcompp();
        self.save_eax(tmp);
        self.fwait();
        self.fnstswax();
        self.sahf();
        self.restore_eax(tmp);
    }

    /// Compare the two topmost FPU stack entries and materialize -1, 0
    /// or 1 in the destination register.
    pub fn fcmp2int(&mut self, dst: Register, unordered_is_less: bool) {
        self.fcmp(Some(dst));
        let mut label = Label::new();
        if unordered_is_less {
            self.movl_ri(dst, -1);
            self.jcc(Cond::Parity, &mut label);
            self.jcc(Cond::Below, &mut label);
            self.movl_ri(dst, 0);
            self.jcc(Cond::Equal, &mut label);
            self.incl_r(dst);
        } else {
            self.movl_ri(dst, 1);
            self.jcc(Cond::Parity, &mut label);
            self.jcc(Cond::Above, &mut label);
            self.movl_ri(dst, 0);
            self.jcc(Cond::Equal, &mut label);
            self.decl_r(dst);
        }
        self.bind(&mut label);
    }

    /// Move the topmost FPU stack value onto the CPU stack.
    pub fn push_float(&mut self) {
        self.subl_ri(Register::Esp, 8);
        self.fstpd(Address::base(Register::Esp));
    }

    /// Move a double word from the CPU stack onto the FPU stack.
    pub fn pop_float(&mut self) {
        self.fldd(Address::base(Register::Esp));
        self.addl_ri(Register::Esp, 8);
    }

    /// Clear the stack of floating-point registers.
    pub fn clear_fpu_stack(&mut self) {
        for i in (0..8).rev() {
            self.ffree(i);
        }
    }

    /// Save the general-purpose registers and EFLAGS on the stack.
    pub fn push_iu_state(&mut self) {
        self.pushad();
        self.pushfd();
    }

    /// Restore EFLAGS and the general-purpose registers from the stack.
    pub fn pop_iu_state(&mut self) {
        self.popfd();
        self.popad();
    }

    /// Save the FPU operating environment and register stack on the
    /// stack.
    pub fn push_fpu_state(&mut self) {
        self.subl_ri(Register::Esp, FPU_STATE_SIZE_IN_WORDS * BYTES_PER_WORD);
        self.fnsave(Address::base(Register::Esp));
        self.fwait();
    }

    /// Restore the FPU operating environment and register stack.
    pub fn pop_fpu_state(&mut self) {
        self.frstor(Address::base(Register::Esp));
        self.addl_ri(Register::Esp, FPU_STATE_SIZE_IN_WORDS * BYTES_PER_WORD);
    }

    /// Save the complete CPU state on the stack.
    pub fn push_cpu_state(&mut self) {
        self.push_iu_state();
        self.push_fpu_state();
    }

    /// Restore the complete CPU state from the stack.
    pub fn pop_cpu_state(&mut self) {
        self.pop_fpu_state();
        self.pop_iu_state();
    }

    /// Emit a breakpoint trap at the current code position.
    pub fn breakpoint(&mut self) {
        self.int3();
    }

    /// Stop execution with the specified reason.
    pub fn stop(&mut self, msg: &str) {
        if self.config.trace_codegen {
            eprintln!("stop: {}", msg);
        }
        self.int3();
        self.hlt();
    }

    // ==================== Atomic fast paths ====================

    /// Lock an object for synchronization. Reads the object header,
    /// tags it as unlocked, and tries to swing the header to the
    /// displaced header location with an atomic compare-and-swap. On
    /// contention, recursive locking by the same thread is detected by
    /// a stack range check; everything else branches to the slow case.
    pub fn lock_object(
        &mut self,
        hdr: Register,
        obj: Register,
        disp_hdr: Register,
        slow_case: &mut Label,
    ) {
        assert!(hdr == Register::Eax, "register must be eax for cmpxchg");
        assert!(
            hdr != obj && obj != disp_hdr && disp_hdr != hdr,
            "registers must be different"
        );
        let alignment_mask = BYTES_PER_WORD - 1;
        let hdr_offset = self.layout.mark_offset;
        let unlocked = self.layout.mark_unlocked_value;
        let page_size = self.layout.vm_page_size;
        let mut done = Label::new();
        self.movl_ra(hdr, Address::base_disp(obj, hdr_offset));
        self.orl_ri(hdr, unlocked);
        self.movl_ar(Address::base(disp_hdr), hdr);
        if self.config.mp {
            self.lock();
        }
        self.cmpxchg(disp_hdr, Address::base_disp(obj, hdr_offset));
        self.jcc(Cond::Equal, &mut done);
        self.subl_rr(hdr, Register::Esp);
        self.andl_ri(hdr, alignment_mask - page_size);
        self.movl_ar(Address::base(disp_hdr), hdr);
        self.jcc(Cond::NOT_ZERO, slow_case);
        self.bind(&mut done);
    }

    /// Release a locked object by swapping the displaced header back
    /// into the object with an atomic compare-and-swap.
    pub fn unlock_object(
        &mut self,
        hdr: Register,
        obj: Register,
        disp_hdr: Register,
        slow_case: &mut Label,
    ) {
        assert!(disp_hdr == Register::Eax, "register must be eax for cmpxchg");
        assert!(
            hdr != obj && obj != disp_hdr && disp_hdr != hdr,
            "registers must be different"
        );
        let hdr_offset = self.layout.mark_offset;
        let mut done = Label::new();
        self.movl_ra(hdr, Address::base(disp_hdr));
        self.testl_rr(hdr, hdr);
        self.jcc(Cond::ZERO, &mut done);
        if self.config.mp {
            self.lock();
        }
        self.cmpxchg(hdr, Address::base_disp(obj, hdr_offset));
        self.jcc(Cond::NotEqual, slow_case);
        self.bind(&mut done);
    }

    fn heap_top(&self) -> Address {
        Address::absolute(self.layout.heap_top_addr, RelocType::None)
    }

    fn heap_end(&self) -> Address {
        Address::absolute(self.layout.heap_end_addr, RelocType::None)
    }

    /// Allocate space on the heap for a new object of statically known
    /// size with a lock-free bump of the shared heap top. A failed
    /// compare-and-swap restarts the whole sequence since another
    /// allocation may have changed the available space.
    pub fn allocate_object(
        &mut self,
        obj: Register,
        t1: Register,
        t2: Register,
        header_size: i32,
        object_size: i32,
        klass: Register,
        slow_case: &mut Label,
    ) {
        assert!(obj == Register::Eax, "object must be in eax for cmpxchg");
        assert!(
            obj != t1 && obj != t2 && t1 != t2,
            "registers must be different"
        );
        assert!(
            header_size >= 0 && object_size >= header_size,
            "illegal size information"
        );
        let hdr_offset = self.layout.mark_offset;
        let end = t1;
        let mut retry = Label::new();
        self.bind(&mut retry);
        let top = self.heap_top();
        let heap_end = self.heap_end();
        self.movl_ra(obj, top);
        self.leal(end, Address::base_disp(obj, object_size * BYTES_PER_WORD));
        self.cmpl_ra(end, heap_end);
        self.jcc(Cond::Above, slow_case);
        if self.config.mp {
            self.lock();
        }
        self.cmpxchg(end, top);
        self.jcc(Cond::NotEqual, &mut retry);
        let prototype = self.layout.mark_prototype;
        let klass_offset = self.layout.klass_offset;
        self.movl_ai(Address::base_disp(obj, hdr_offset), prototype);
        self.movl_ar(Address::base_disp(obj, klass_offset), klass);
        let zero = t1;
        let index = t2;
        if object_size <= 6 {
            // Clearing a handful of fields inline beats a loop.
            if object_size > header_size {
                self.xorl_rr(zero, zero);
                for i in header_size..object_size {
                    self.movl_ar(Address::base_disp(obj, i * BYTES_PER_WORD), zero);
                }
            }
        } else if object_size > header_size {
            self.xorl_rr(zero, zero);
            self.movl_ri(index, (object_size - header_size) >> 1);
            if (object_size - header_size) & 1 != 0 {
                self.movl_ar(
                    Address::base_disp(obj, (object_size - 1) * BYTES_PER_WORD),
                    zero,
                );
            }
            let mut loop_start = Label::new();
            self.bind(&mut loop_start);
            self.movl_ar(
                Address::base_index(
                    obj,
                    index,
                    ScaleFactor::Times8,
                    (header_size - 1) * BYTES_PER_WORD,
                ),
                zero,
            );
            self.movl_ar(
                Address::base_index(
                    obj,
                    index,
                    ScaleFactor::Times8,
                    (header_size - 2) * BYTES_PER_WORD,
                ),
                zero,
            );
            self.decl_r(index);
            self.jcc(Cond::NOT_ZERO, &mut loop_start);
        }
    }

    /// Allocate space on the heap for a new array. Oversize lengths are
    /// rejected up front; the bump of the shared heap top retries the
    /// whole sequence on compare-and-swap failure.
    pub fn allocate_array(
        &mut self,
        obj: Register,
        len: Register,
        temp: Register,
        header_size: i32,
        scale: ScaleFactor,
        klass: Register,
        slow_case: &mut Label,
    ) {
        assert!(obj == Register::Eax, "object must be in eax for cmpxchg");
        assert!(
            obj != len && obj != temp && len != temp,
            "registers must be different"
        );
        let hdr_offset = self.layout.mark_offset;
        let alignment_mask =
            (if self.layout.align_all_objects { 2 } else { 1 }) * BYTES_PER_WORD - 1;
        let max_length = 0x00ff_ffff;
        self.cmpl_ri(len, max_length);
        self.jcc(Cond::Above, slow_case);
        let end = temp;
        let mut retry = Label::new();
        self.bind(&mut retry);
        let top = self.heap_top();
        let heap_end = self.heap_end();
        self.movl_ra(obj, top);
        self.leal(end, Address::base_index(obj, len, scale, 0));
        self.addl_ri(end, header_size * BYTES_PER_WORD + alignment_mask);
        self.andl_ri(end, !alignment_mask);
        self.cmpl_rr(end, obj);
        self.jcc(Cond::Below, slow_case);
        self.cmpl_ra(end, heap_end);
        self.jcc(Cond::Above, slow_case);
        if self.config.mp {
            self.lock();
        }
        self.cmpxchg(end, top);
        self.jcc(Cond::NotEqual, &mut retry);
        let prototype = self.layout.mark_prototype;
        let klass_offset = self.layout.klass_offset;
        let length_offset = self.layout.array_length_offset;
        self.movl_ai(Address::base_disp(obj, hdr_offset), prototype);
        self.movl_ar(Address::base_disp(obj, klass_offset), klass);
        self.movl_ar(Address::base_disp(obj, length_offset), len);
        let mut done = Label::new();
        let zero = len;
        let index = temp;
        self.subl_rr(index, obj);
        self.subl_ri(index, header_size * BYTES_PER_WORD);
        self.jcc(Cond::ZERO, &mut done);
        self.xorl_rr(zero, zero);
        self.shrl(index, 3);
        let mut even = Label::new();
        self.jcc(Cond::CARRY_CLEAR, &mut even);
        self.movl_ar(
            Address::base_index(obj, index, ScaleFactor::Times8, header_size * BYTES_PER_WORD),
            zero,
        );
        self.jcc(Cond::ZERO, &mut done);
        self.bind(&mut even);
        let mut loop_start = Label::new();
        self.bind(&mut loop_start);
        self.movl_ar(
            Address::base_index(
                obj,
                index,
                ScaleFactor::Times8,
                (header_size - 1) * BYTES_PER_WORD,
            ),
            zero,
        );
        self.movl_ar(
            Address::base_index(
                obj,
                index,
                ScaleFactor::Times8,
                (header_size - 2) * BYTES_PER_WORD,
            ),
            zero,
        );
        self.decl_r(index);
        self.jcc(Cond::NOT_ZERO, &mut loop_start);
        self.bind(&mut done);
    }
}
