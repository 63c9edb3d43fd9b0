//! Code buffer with relocation and debug-info side tables.
//!
//! The buffer stores the generated instruction bytes together with the
//! metadata the runtime needs to move the code later: the object
//! pointers embedded in it, a compact relocation stream and a table of
//! debug information per call site.

use super::memory::{ExecutableMemory, MemoryError};
use super::reloc::{self, RelocInfo, RelocType};

/// An object-pointer handle embedded in generated code.
///
/// Two handles refer to the same object exactly when they are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Oop(pub u32);

/// Debug information recorded for one code position.
#[derive(Debug, Clone)]
pub struct DebugEntry {
    /// Offset of the instruction in the code
    pub offset: i32,
    /// Bytecode index of the source position
    pub bci: i32,
    /// Whether the entry describes a call site
    pub at_call: bool,
    /// Size of the stack frame in words
    pub frame_size: i32,
    /// Number of arguments passed on the stack
    pub arg_count: i32,
    /// Registers holding object pointers at this position
    pub oop_regs: Vec<u8>,
}

/// A buffer into which assembly code is generated.
pub struct CodeBuffer {
    /// The instruction bytes
    code: Vec<u8>,
    /// The address the first byte will execute at
    code_start: i32,
    /// Offset of the exception handler code
    exception_offset: i32,
    /// Address of the first byte of the call stubs
    stubs_start: i32,
    /// Address after the call stubs
    stubs_end: i32,
    /// Recorded object pointers, index 0 reserved for "no pointer"
    oops: Vec<Option<Oop>>,
    /// Relocation records in address order
    relocs: Vec<RelocInfo>,
    /// Offset of the last relocated address from the start of the code
    last_reloc_offset: i32,
    /// Debug information entries
    debug_info: Vec<DebugEntry>,
}

impl CodeBuffer {
    /// Create an empty code buffer with the specified start address and
    /// initial capacity.
    pub fn new(code_start: i32, code_size: usize) -> Self {
        assert!(code_start > 0, "illegal start address");
        Self {
            code: Vec::with_capacity(code_size),
            code_start,
            exception_offset: 0,
            stubs_start: 0,
            stubs_end: 0,
            oops: vec![None],
            relocs: Vec::new(),
            last_reloc_offset: 0,
            debug_info: Vec::new(),
        }
    }

    /// Get the address of the first byte of the code.
    pub fn code_begin(&self) -> i32 {
        self.code_start
    }

    /// Get the current code generation address.
    pub fn code_end(&self) -> i32 {
        self.code_start + self.code.len() as i32
    }

    /// Get the number of bytes in the buffer.
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Ensure that there is enough free space for a burst of emission
    /// whose worst-case size is not known ahead of time. Growth keeps
    /// all previously written bytes.
    pub fn check_codespace(&mut self) {
        if self.code.capacity() - self.code.len() < 1024 {
            self.code.reserve(self.code.len() + 1024);
        }
    }

    pub fn set_exception_offset(&mut self, offset: i32) {
        self.exception_offset = offset;
    }

    pub fn exception_offset(&self) -> i32 {
        self.exception_offset
    }

    pub fn set_stubs_begin(&mut self, address: i32) {
        self.stubs_start = address;
    }

    pub fn stubs_begin(&self) -> i32 {
        self.stubs_start
    }

    pub fn set_stubs_end(&mut self, address: i32) {
        self.stubs_end = address;
    }

    pub fn stubs_end(&self) -> i32 {
        self.stubs_end
    }

    /// Get the size of the call stubs in the buffer.
    pub fn stubs_size(&self) -> i32 {
        self.stubs_end - self.stubs_start
    }

    /// Get the generated bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    /// Get the recorded object pointers. Index 0 is the reserved "no
    /// pointer" slot.
    pub fn oops(&self) -> &[Option<Oop>] {
        &self.oops
    }

    /// Append a byte to the end of the buffer.
    pub fn append(&mut self, x: u8) {
        self.code.push(x);
    }

    /// Get the byte at the specified position. The position must be
    /// within the written part of the buffer.
    pub fn byte_at(&self, pos: usize) -> u8 {
        assert!(pos < self.code.len(), "index out of bounds");
        self.code[pos]
    }

    /// Replace the byte at the specified position.
    pub fn set_byte_at(&mut self, pos: usize, x: u8) {
        assert!(pos < self.code.len(), "index out of bounds");
        self.code[pos] = x;
    }

    /// Record an object pointer and return its index. Recording the
    /// same pointer twice yields the same index both times.
    pub fn record_oop(&mut self, oop: Oop) -> usize {
        for (index, slot) in self.oops.iter().enumerate() {
            if *slot == Some(oop) {
                return index;
            }
        }
        self.oops.push(Some(oop));
        self.oops.len() - 1
    }

    /// Record relocation information for the instruction at the given
    /// address. Records with type `None` and oop records for a null
    /// pointer are dropped. Addresses must not decrease between calls;
    /// filler records bridge gaps wider than one record can express.
    pub fn relocate_info(&mut self, at: i32, mut reloc: RelocInfo, format: u16) {
        let rtype = reloc.type_code();
        if rtype == RelocType::None.code() {
            return;
        } else if rtype == RelocType::Oop.code() && at == 0 {
            return;
        }
        assert!(
            at >= self.code_begin() && at <= self.code_end() + 1,
            "address outside code boundaries"
        );
        let len = at - self.code_start;
        let mut offset = len - self.last_reloc_offset;
        assert!(offset >= 0, "relocation addresses must not decrease");
        self.last_reloc_offset = len;
        while offset >= reloc::OFFSET_LIMIT {
            let filler = RelocInfo::filler();
            offset -= filler.addr_offset();
            self.relocs.push(filler);
        }
        reloc.set_addr_offset(offset);
        if format != 0 {
            reloc.set_format(format);
        }
        self.relocs.push(reloc);
    }

    /// Record relocation information of the given type and format.
    pub fn relocate(&mut self, at: i32, rtype: RelocType, format: u16) {
        self.relocate_info(at, RelocInfo::new(rtype), format);
    }

    /// Change the type of the relocation recorded for an address.
    pub fn change_reloc_info_for_address(&mut self, pos: i32, old: RelocType, new: RelocType) {
        let mut addr = self.code_begin();
        for reloc in self.relocs.iter_mut() {
            addr += reloc.addr_offset();
            if addr >= pos {
                assert!(addr == pos, "no relocation found for this address");
                assert!(reloc.type_code() == old.code(), "wrong relocation type found");
                reloc.set_type(new);
                return;
            }
        }
        panic!("no relocation found for this address");
    }

    /// Get the relocation records.
    pub fn relocs(&self) -> &[RelocInfo] {
        &self.relocs
    }

    /// Flatten the relocation records into a stream of 16-bit words,
    /// data prefixes first and value words last.
    pub fn reloc_stream(&self) -> Vec<u16> {
        let mut stream = Vec::new();
        for reloc in &self.relocs {
            reloc.write_to(&mut stream);
        }
        stream
    }

    /// Store debug information in the buffer.
    pub fn add_debug_info(&mut self, info: DebugEntry) {
        self.debug_info.push(info);
    }

    /// Get the recorded debug information.
    pub fn debug_info(&self) -> &[DebugEntry] {
        &self.debug_info
    }

    /// Copy the finished code into executable memory.
    pub fn finalize(&self) -> Result<ExecutableMemory, MemoryError> {
        let mut mem = ExecutableMemory::new(self.code.len())?;
        mem.write(0, &self.code)?;
        mem.make_executable()?;
        Ok(mem)
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new(1024, 4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let mut buf = CodeBuffer::default();
        buf.append(0x90);
        buf.append(0xC3);
        assert_eq!(buf.code_size(), 2);
        assert_eq!(buf.byte_at(0), 0x90);
        assert_eq!(buf.byte_at(1), 0xC3);
        assert_eq!(buf.code_end(), buf.code_begin() + 2);
    }

    #[test]
    fn test_growth_preserves_content() {
        let mut buf = CodeBuffer::new(1024, 16);
        for i in 0..4096u32 {
            buf.check_codespace();
            buf.append(i as u8);
        }
        for i in 0..4096usize {
            assert_eq!(buf.byte_at(i), i as u8);
        }
    }

    #[test]
    fn test_record_oop_dedup() {
        let mut buf = CodeBuffer::default();
        let a = buf.record_oop(Oop(0x1000));
        let b = buf.record_oop(Oop(0x2000));
        let c = buf.record_oop(Oop(0x1000));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(c, a);
        assert_eq!(buf.oops()[0], None);
    }

    #[test]
    fn test_relocate_drops_none_and_null_oop() {
        let mut buf = CodeBuffer::default();
        buf.append(0x90);
        buf.relocate(buf.code_begin(), RelocType::None, 0);
        buf.relocate_info(0, RelocInfo::new(RelocType::Oop), 0);
        assert!(buf.relocs().is_empty());
    }

    #[test]
    fn test_reloc_offsets_accumulate() {
        let mut buf = CodeBuffer::default();
        for _ in 0..16 {
            buf.append(0x90);
        }
        buf.relocate(buf.code_begin() + 4, RelocType::Return, 0);
        buf.relocate(buf.code_begin() + 10, RelocType::Safepoint, 0);
        let relocs = buf.relocs();
        assert_eq!(relocs.len(), 2);
        assert_eq!(relocs[0].addr_offset(), 4);
        assert_eq!(relocs[1].addr_offset(), 6);
    }

    #[test]
    fn test_filler_insertion() {
        let mut buf = CodeBuffer::new(1024, 8192);
        for _ in 0..5000 {
            buf.append(0x90);
        }
        buf.relocate(buf.code_begin() + 4000, RelocType::Return, 0);
        let relocs = buf.relocs();
        // 4000 = 2047 + 1953, so exactly one filler is needed.
        assert_eq!(relocs.len(), 2);
        assert_eq!(relocs[0].addr_offset(), 2047);
        assert!(relocs[0].data().is_empty());
        assert_eq!(relocs[1].addr_offset(), 1953);
        let sum: i32 = relocs.iter().map(|r| r.addr_offset()).sum();
        assert_eq!(sum, 4000);
    }

    #[test]
    fn test_reloc_stream_layout() {
        let mut buf = CodeBuffer::default();
        for _ in 0..8 {
            buf.append(0x90);
        }
        buf.relocate_info(
            buf.code_begin() + 2,
            RelocInfo::with_data(RelocType::InternalWord, 0x12345678),
            0,
        );
        let stream = buf.reloc_stream();
        // Two data words behind the prefix, then the value word.
        assert_eq!(stream.len(), 4);
        assert!(reloc::is_prefix_word(stream[0]));
        assert_eq!(reloc::prefix_length(stream[0]), 3);
        assert_eq!(reloc::word_type(stream[3]), RelocType::InternalWord.code());
        assert_eq!(reloc::word_offset(stream[3]), 2);
    }

    #[test]
    fn test_debug_info_entries() {
        let mut buf = CodeBuffer::default();
        buf.add_debug_info(DebugEntry {
            offset: 0,
            bci: 3,
            at_call: true,
            frame_size: 4,
            arg_count: 1,
            oop_regs: vec![0, 6],
        });
        assert_eq!(buf.debug_info().len(), 1);
        assert!(buf.debug_info()[0].at_call);
        assert_eq!(buf.debug_info()[0].oop_regs, &[0, 6]);
    }
}
