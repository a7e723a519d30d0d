//! Bytecode encoding shared by the compiler and the interpreter.
//!
//! Each language carries one immutable blob of compiled decipherer
//! programs and a 256-entry dispatch table of start offsets into it.
//! Opcodes with bit 7 set are literal ASCII characters (`byte & 0x7f`);
//! everything else is a control opcode. The minitable, dispatch and
//! switch families reserve a run of opcode values each, which is what
//! bounds the number of minitables and referred languages per language.

/// End of program; the interpreter returns the accumulated size.
pub const OP_END: u8 = 0x00;
/// Clear the sequencer stack; the traversal ends at the next step.
pub const OP_TERMINATE: u8 = 0x01;
/// Pop the top sequencer frame; renders as a `^` marker.
pub const OP_SWITCH_BACK: u8 = 0x02;
/// Overwrite the top frame's countdown with 1, 2 or 3.
pub const OP_COUNTDOWN_BASE: u8 = 0x03; // 0x03..=0x05
pub const OP_DECIMAL: u8 = 0x06;
pub const OP_UNSIGNED_BYTE: u8 = 0x07;
pub const OP_UNSIGNED_WYDE: u8 = 0x08;
pub const OP_SIGNED_BYTE: u8 = 0x09;
pub const OP_SIGNED_WYDE: u8 = 0x0a;
/// Right-shift the value register by 3, 4, 5 or 6.
pub const OP_SHR_BASE: u8 = 0x0b; // 0x0b..=0x0e
/// Mask the value register with 0x03, 0x07 or 0x38.
pub const OP_AND_BASE: u8 = 0x0f; // 0x0f..=0x11
pub const AND_MASKS: [u32; 3] = [0x03, 0x07, 0x38];
/// Relative branch target: value as a signed byte added to the
/// instruction address plus a bias of 1 or 2.
pub const OP_REL_BASE: u8 = 0x12; // 0x12..=0x13
/// Subroutine entry-point reference; the driver consults the API
/// vector table for the referenced address.
pub const OP_ENTRY_API: u8 = 0x14;

/// Fetch families, parameterized by the suboffset within the instruction.
pub const OP_FETCH_BYTE_BASE: u8 = 0x20; // 0x20..=0x27
pub const OP_FETCH_WYDE_LE_BASE: u8 = 0x28; // 0x28..=0x2f
pub const OP_FETCH_WYDE_BE_BASE: u8 = 0x30; // 0x30..=0x37
pub const MAX_SUBOFFSET: usize = 8;

/// Linkage families, parameterized by a minitable or referred-language
/// index assigned at compile time.
pub const OP_MINITABLE_BASE: u8 = 0x40; // 0x40..=0x4f
pub const MAX_MINITABLES: usize = 16;
pub const OP_DISPATCH_BASE: u8 = 0x50; // 0x50..=0x57
pub const OP_TEMP_SWITCH_BASE: u8 = 0x58; // 0x58..=0x5f
pub const OP_PERM_SWITCH_BASE: u8 = 0x60; // 0x60..=0x67
pub const OP_ENTRY_LANG_BASE: u8 = 0x68; // 0x68..=0x6f
pub const MAX_REFERRED: usize = 8;

/// Bit 7 marks a literal printable ASCII character.
pub const LITERAL_BIT: u8 = 0x80;

/// Compiled decipherer programs of one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bytecode {
    /// All programs of the language, concatenated; each ends with [`OP_END`].
    pub blob: Vec<u8>,
    /// Opcode value to program start offset; `None` means the opcode has
    /// no decipherer.
    pub dispatch: Box<[Option<usize>; 256]>,
}

impl Bytecode {
    pub fn entry(&self, key: u8) -> Option<usize> {
        self.dispatch[key as usize]
    }
}
