//! Forward-reference resolution for jumps and calls.
//!
//! A `Label` stands for a code position that may not be known yet. While
//! the position is unknown, every branch to the label writes a
//! `Displacement` word into its own operand slot; the words chain the
//! pending sites together through the instruction stream itself, so no
//! side list is needed. Binding the label walks the chain and replaces
//! each word with the real self-relative offset.

/// A known or yet unknown branch target.
///
/// The single field encodes both state and position: zero means unused,
/// a positive value is the chain head of an unbound label (position + 1)
/// and a negative value is a bound position (-position - 1).
#[derive(Debug, Default)]
pub struct Label {
    pos: i32,
}

impl Label {
    /// Create a new unused label.
    pub fn new() -> Self {
        Self { pos: 0 }
    }

    /// Get the target position of a bound label or the position of the
    /// last displacement in the chain of an unbound one.
    pub fn pos(&self) -> i32 {
        assert!(self.pos != 0, "label is unused");
        if self.pos < 0 { -self.pos - 1 } else { self.pos - 1 }
    }

    /// Bind this label to the specified code position.
    pub fn bind_to(&mut self, pos: i32) {
        assert!(pos >= 0, "illegal position");
        self.pos = -pos - 1;
    }

    /// Link this label to the specified displacement position, extending
    /// the chain of forward references.
    pub fn link_to(&mut self, pos: i32) {
        assert!(pos >= 0, "illegal position");
        self.pos = pos + 1;
    }

    /// Clear this label so that it is unused again.
    pub fn clear(&mut self) {
        self.pos = 0;
    }

    pub fn is_bound(&self) -> bool {
        self.pos < 0
    }

    pub fn is_unbound(&self) -> bool {
        self.pos > 0
    }

    pub fn is_unused(&self) -> bool {
        self.pos == 0
    }
}

/// The kind of instruction a displacement was emitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispKind {
    /// Procedure call
    Call = 0,
    /// Absolute jump
    AbsoluteJump = 1,
    /// Conditional jump
    ConditionalJump = 2,
}

impl DispKind {
    fn from_code(code: i32) -> DispKind {
        match code {
            0 => DispKind::Call,
            1 => DispKind::AbsoluteJump,
            2 => DispKind::ConditionalJump,
            _ => panic!("invalid displacement kind {}", code),
        }
    }
}

const INFO_SIZE: u32 = 8;
const TYPE_SIZE: u32 = 2;
const INFO_POS: u32 = 0;
const TYPE_POS: u32 = INFO_POS + INFO_SIZE;
const NEXT_POS: u32 = TYPE_POS + TYPE_SIZE;
const INFO_MASK: i32 = (1 << INFO_SIZE) - 1;
const TYPE_MASK: i32 = (1 << TYPE_SIZE) - 1;
const NEXT_MASK: i32 = (1 << (32 - TYPE_SIZE - INFO_SIZE)) - 1;

/// The placeholder word written into an unresolved branch operand.
///
/// Packs the position of the next pending site, the instruction kind and
/// kind-specific information (the condition code for conditional jumps)
/// into the 32 bits that will later hold the real displacement.
#[derive(Debug, Clone, Copy)]
pub struct Displacement {
    data: i32,
}

impl Displacement {
    /// Create a displacement that extends the chain of the given label.
    pub fn new(label: &Label, kind: DispKind, info: u8) -> Self {
        assert!(!label.is_bound(), "label is bound");
        let next = if label.is_unbound() { label.pos() } else { 0 };
        assert!(next & !NEXT_MASK == 0, "next field too small");
        Self {
            data: (next << NEXT_POS) | ((kind as i32) << TYPE_POS) | ((info as i32) << INFO_POS),
        }
    }

    /// Reconstruct a displacement from the raw word read out of the
    /// instruction stream.
    pub fn from_data(data: i32) -> Self {
        Self { data }
    }

    /// Get the raw word to write into the instruction stream.
    pub fn data(&self) -> i32 {
        self.data
    }

    /// Get the instruction-specific information.
    pub fn info(&self) -> u8 {
        ((self.data >> INFO_POS) & INFO_MASK) as u8
    }

    /// Get the instruction kind.
    pub fn kind(&self) -> DispKind {
        DispKind::from_code((self.data >> TYPE_POS) & TYPE_MASK)
    }

    /// Move the label on to the next pending site, or clear it when the
    /// end of the chain is reached.
    pub fn next(&self, label: &mut Label) {
        let pos = (self.data >> NEXT_POS) & NEXT_MASK;
        if pos > 0 {
            label.link_to(pos);
        } else {
            label.clear();
        }
    }
}
