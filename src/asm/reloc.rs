//! Relocation record codec.
//!
//! Relocation records describe values in the instruction stream that the
//! runtime must patch when objects or code move. Each record is packed
//! into one 16-bit word with 4 bits of type, 1 format bit and 11 bits of
//! offset from the previous relocated address. Offsets accumulate along
//! the stream to reconstruct absolute addresses. Records whose payload
//! does not fit inline are preceded by a data prefix carrying up to four
//! extra 16-bit words or a small immediate.

/// Relocation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelocType {
    /// No relocation is generated
    None = 0,
    /// Embedded ordinary object pointer
    Oop = 1,
    /// Virtual call site with an inline cache
    VirtualCall = 2,
    /// Statically bound virtual call
    OptVirtualCall = 3,
    /// Static call
    StaticCall = 4,
    /// Extra stub for a static call
    StaticStub = 5,
    /// Fixed subroutine in the runtime system
    RuntimeCall = 6,
    /// Absolute reference to an external segment
    ExternalWord = 7,
    /// Address within the same code space
    InternalWord = 8,
    /// Internal backward branch
    Safepoint = 9,
    /// Return instruction
    Return = 10,
    /// Subroutine call
    Jsr = 11,
    /// Return from a subroutine
    JsrRet = 12,
    /// Initialization barrier or safepoint
    Breakpoint = 13,
}

impl RelocType {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Look up a relocation type by its code. `DATA_PREFIX_TAG` is not a
    /// constructible type and yields `None`.
    pub fn from_code(code: u16) -> Option<RelocType> {
        Some(match code {
            0 => RelocType::None,
            1 => RelocType::Oop,
            2 => RelocType::VirtualCall,
            3 => RelocType::OptVirtualCall,
            4 => RelocType::StaticCall,
            5 => RelocType::StaticStub,
            6 => RelocType::RuntimeCall,
            7 => RelocType::ExternalWord,
            8 => RelocType::InternalWord,
            9 => RelocType::Safepoint,
            10 => RelocType::Return,
            11 => RelocType::Jsr,
            12 => RelocType::JsrRet,
            13 => RelocType::Breakpoint,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            RelocType::None => "none",
            RelocType::Oop => "oop",
            RelocType::VirtualCall => "virtual_call",
            RelocType::OptVirtualCall => "opt_virtual_call",
            RelocType::StaticCall => "static_call",
            RelocType::StaticStub => "static_stub",
            RelocType::RuntimeCall => "runtime_call",
            RelocType::ExternalWord => "external_word",
            RelocType::InternalWord => "internal_word",
            RelocType::Safepoint => "safepoint",
            RelocType::Return => "return",
            RelocType::Jsr => "jsr",
            RelocType::JsrRet => "jsr_ret",
            RelocType::Breakpoint => "breakpoint",
        }
    }
}

/// The type tag that marks a relocation data prefix.
pub const DATA_PREFIX_TAG: u16 = 14;

/// The number of bits available for one relocation record.
pub const VALUE_WIDTH: u32 = 16;

/// The number of bits that indicate the relocation type.
const TYPE_WIDTH: u32 = 4;

/// The number of bits left for offset and format.
const NONTYPE_WIDTH: u32 = VALUE_WIDTH - TYPE_WIDTH;

/// The number of bits that specify which operand goes with a relocation.
const FORMAT_WIDTH: u32 = 1;

/// The number of bits encoding the offset from the previous address.
const OFFSET_WIDTH: u32 = NONTYPE_WIDTH - FORMAT_WIDTH;

/// The upper limit for offset values.
pub const OFFSET_LIMIT: i32 = 1 << OFFSET_WIDTH;

/// The number of bits encoding an immediate value.
const IMMEDIATE_WIDTH: u32 = NONTYPE_WIDTH - 1;

/// The tag for immediate values in a data prefix.
const IMMEDIATE_TAG: u16 = 1 << IMMEDIATE_WIDTH;

/// The upper limit for immediate values.
pub const IMMEDIATE_LIMIT: i32 = 1 << IMMEDIATE_WIDTH;

const TYPE_MASK: u16 = (1 << TYPE_WIDTH) - 1;
const FORMAT_MASK: u16 = (1 << FORMAT_WIDTH) - 1;
const OFFSET_MASK: u16 = (1 << OFFSET_WIDTH) - 1;
const IMMEDIATE_MASK: u16 = (1 << IMMEDIATE_WIDTH) - 1;

/// One relocation record together with its optional data prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocInfo {
    /// The value word encoding type, offset and format
    value: u16,
    /// The data prefix words, empty when the record has no payload
    data: Vec<u16>,
}

impl RelocInfo {
    /// Create a relocation record without payload.
    pub fn new(rtype: RelocType) -> Self {
        Self {
            value: rtype.code() << NONTYPE_WIDTH,
            data: Vec::new(),
        }
    }

    /// Create a relocation record with one word of payload. The most
    /// compact representation is chosen: nothing for zero, an inline
    /// immediate for small positive values, one extra word for 16-bit
    /// quantities and two words (high half first) otherwise.
    pub fn with_data(rtype: RelocType, x0: i32) -> Self {
        let mut reloc = Self::new(rtype);
        if x0 == 0 {
            // nothing to do
        } else if x0 > 0 && x0 < IMMEDIATE_LIMIT {
            reloc.set_immediate(x0);
        } else if is_short(x0) {
            reloc.set_prefix(&[x0]);
        } else {
            reloc.set_prefix(&[hi(x0), x0]);
        }
        reloc
    }

    /// Create a relocation record with two words of payload.
    pub fn with_data2(rtype: RelocType, x0: i32, x1: i32) -> Self {
        let mut reloc = Self::new(rtype);
        if x0 == 0 && x1 == 0 {
            // nothing to do
        } else if is_short(x0) && x1 == 0 {
            reloc.set_prefix(&[x0]);
        } else if is_short(x0) && is_short(x1) {
            reloc.set_prefix(&[x0, x1]);
        } else if is_short(x1) {
            reloc.set_prefix(&[hi(x0), x0, x1]);
        } else {
            reloc.set_prefix(&[hi(x0), x0, hi(x1), x1]);
        }
        reloc
    }

    /// Create the filler record that bridges offset gaps too wide for a
    /// single record. Its value is all offset bits short of the limit,
    /// so it never needs a data prefix itself.
    pub fn filler() -> Self {
        Self {
            value: (OFFSET_LIMIT - 1) as u16,
            data: Vec::new(),
        }
    }

    fn set_prefix(&mut self, words: &[i32]) {
        let datalen = words.len();
        self.data = Vec::with_capacity(datalen + 1);
        self.data
            .push((DATA_PREFIX_TAG << NONTYPE_WIDTH) | datalen as u16);
        for &x in words {
            self.data.push(x as u16);
        }
    }

    fn set_immediate(&mut self, x: i32) {
        assert!(x >= 0 && x < IMMEDIATE_LIMIT, "immediate out of range");
        self.data = vec![(DATA_PREFIX_TAG << NONTYPE_WIDTH) | IMMEDIATE_TAG | x as u16];
    }

    /// Get the relocation type code.
    pub fn type_code(&self) -> u16 {
        (self.value >> NONTYPE_WIDTH) & TYPE_MASK
    }

    /// Change the relocation type, keeping offset and format.
    pub fn set_type(&mut self, rtype: RelocType) {
        self.value = (self.value & !(TYPE_MASK << NONTYPE_WIDTH)) | (rtype.code() << NONTYPE_WIDTH);
    }

    /// Set the format that specifies which operand goes with the record.
    pub fn set_format(&mut self, format: u16) {
        assert!(format & !FORMAT_MASK == 0, "wrong format");
        self.value = (self.value & !(FORMAT_MASK << OFFSET_WIDTH)) | (format << OFFSET_WIDTH);
    }

    /// Get the format bit.
    pub fn format(&self) -> u16 {
        (self.value >> OFFSET_WIDTH) & FORMAT_MASK
    }

    /// Set the offset from the previous relocated address.
    pub fn set_addr_offset(&mut self, offset: i32) {
        assert!(offset >= 0 && offset < OFFSET_LIMIT, "offset out of bounds");
        self.value = (self.value & !OFFSET_MASK) | offset as u16;
    }

    /// Get the offset from the previous relocated address.
    pub fn addr_offset(&self) -> i32 {
        (self.value & OFFSET_MASK) as i32
    }

    /// Get the value word.
    pub fn value(&self) -> u16 {
        self.value
    }

    /// Get the data prefix words.
    pub fn data(&self) -> &[u16] {
        &self.data
    }

    /// Append this record to a flattened relocation stream, data prefix
    /// first and value word last.
    pub fn write_to(&self, stream: &mut Vec<u16>) {
        stream.extend_from_slice(&self.data);
        stream.push(self.value);
    }
}

/// Check if a stream word is a data prefix.
pub fn is_prefix_word(word: u16) -> bool {
    (word >> NONTYPE_WIDTH) & TYPE_MASK == DATA_PREFIX_TAG
}

/// Get the total number of stream words a data prefix occupies,
/// including the prefix word itself.
pub fn prefix_length(word: u16) -> usize {
    assert!(is_prefix_word(word), "must be data prefix");
    if word & IMMEDIATE_TAG != 0 {
        1
    } else {
        1 + (word & IMMEDIATE_MASK) as usize
    }
}

/// Get the type code of a stream value word.
pub fn word_type(word: u16) -> u16 {
    (word >> NONTYPE_WIDTH) & TYPE_MASK
}

/// Get the address offset of a stream value word.
pub fn word_offset(word: u16) -> i32 {
    (word & OFFSET_MASK) as i32
}

/// Get the format bit of a stream value word.
pub fn word_format(word: u16) -> u16 {
    (word >> OFFSET_WIDTH) & FORMAT_MASK
}

/// Get the small immediate carried by an immediate data prefix.
pub fn prefix_immediate(word: u16) -> i32 {
    assert!(is_prefix_word(word) && word & IMMEDIATE_TAG != 0);
    (word & IMMEDIATE_MASK) as i32
}

fn hi(x: i32) -> i32 {
    ((x as u32) >> VALUE_WIDTH) as i32
}

fn is_short(x: i32) -> bool {
    x == x as i16 as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_record() {
        let r = RelocInfo::new(RelocType::Return);
        assert_eq!(r.type_code(), 10);
        assert_eq!(r.addr_offset(), 0);
        assert!(r.data().is_empty());
    }

    #[test]
    fn test_offset_and_format() {
        let mut r = RelocInfo::new(RelocType::Oop);
        r.set_addr_offset(5);
        r.set_format(1);
        assert_eq!(r.addr_offset(), 5);
        assert_eq!(r.format(), 1);
        assert_eq!(r.type_code(), 1);
        assert_eq!(r.value(), (1 << 12) | (1 << 11) | 5);
    }

    #[test]
    fn test_zero_payload_has_no_prefix() {
        let r = RelocInfo::with_data(RelocType::Oop, 0);
        assert!(r.data().is_empty());
    }

    #[test]
    fn test_small_payload_is_immediate() {
        let r = RelocInfo::with_data(RelocType::Oop, 42);
        assert_eq!(r.data().len(), 1);
        assert!(is_prefix_word(r.data()[0]));
        assert_eq!(prefix_length(r.data()[0]), 1);
        assert_eq!(prefix_immediate(r.data()[0]), 42);
    }

    #[test]
    fn test_short_payload_is_one_word() {
        let r = RelocInfo::with_data(RelocType::InternalWord, -6);
        assert_eq!(r.data().len(), 2);
        assert_eq!(prefix_length(r.data()[0]), 2);
        assert_eq!(r.data()[1] as i16, -6);
    }

    #[test]
    fn test_wide_payload_is_two_words() {
        let r = RelocInfo::with_data(RelocType::ExternalWord, 0x12345678);
        assert_eq!(r.data().len(), 3);
        assert_eq!(prefix_length(r.data()[0]), 3);
        assert_eq!(r.data()[1], 0x1234);
        assert_eq!(r.data()[2], 0x5678);
    }

    #[test]
    fn test_two_value_packing() {
        let r = RelocInfo::with_data2(RelocType::VirtualCall, 100, 200);
        assert_eq!(r.data().len(), 3);
        assert_eq!(r.data()[1], 100);
        assert_eq!(r.data()[2], 200);

        let r = RelocInfo::with_data2(RelocType::VirtualCall, 0x7FFFFFFF, 0x10000);
        assert_eq!(r.data().len(), 5);
        assert_eq!(prefix_length(r.data()[0]), 5);
    }

    #[test]
    fn test_filler_is_inline() {
        // The filler must never require a data prefix of its own.
        let f = RelocInfo::filler();
        assert!(f.data().is_empty());
        assert_eq!(f.type_code(), RelocType::None.code());
        assert_eq!(f.addr_offset(), OFFSET_LIMIT - 1);
        assert!(!is_prefix_word(f.value()));
    }
}
