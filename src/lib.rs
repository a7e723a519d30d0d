/// Opcode-routing predicates parsed from masked bit-pattern literals.
pub mod codeset;

/// Instruction-set descriptions: the language type, its bytecode, the
/// description compiler and the registry.
///
/// The steps from text to a usable language are:
/// 1. **Classification** - header, minitable and decipherer lines
/// 2. **Compilation** - decipherer programs into shared bytecode
/// 3. **Resolution** - referred languages through the registry
pub mod lang;

/// Runs one decipherer program in discovery or render mode.
pub mod decipher;

/// Which language decodes the next instruction, and for how long.
pub mod sequencer;

/// Known platform entry points and their sequencer effects.
pub mod apivec;

/// Breadth-first traversal of a memory image and its listing output.
pub mod disassembler;

/// Hexdump utility
pub mod hexdump;
