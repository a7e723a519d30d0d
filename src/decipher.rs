use std::sync::Arc;

use thiserror::Error;

use crate::lang::bytecode::*;
use crate::lang::{Language, LanguageBody};
use crate::sequencer::Sequencer;

/// The two recoverable per-instruction failures. Anything else that can
/// go wrong while running compiled bytecode is a corrupt language
/// definition and panics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("No decipherer for opcode {opcode:#04x} in language '{lang}'")]
    UnknownOpcode { lang: String, opcode: u8 },
    #[error("Instruction in language '{lang}' runs past the end of the image")]
    IncompleteInstruction { lang: String },
}

/// An absolute address discovered inside an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Relative branch target; decodes in the referencing language.
    Branch(u32),
    /// Subroutine call target; the API vector table is consulted.
    Call(u32),
    /// Entry point with an explicit target language.
    Entry(u32, Arc<Language>),
}

/// Observable effects of one decipherer run.
///
/// The interpreter itself is mode-agnostic; discovery and render differ
/// only in which of these effects they act on. Keeping a single
/// control-flow implementation keeps the two modes in lockstep per
/// opcode.
pub trait EffectSink {
    fn text(&mut self, _s: &str) {}
    fn switch_temporarily(&mut self, _lang: &Arc<Language>) {}
    fn switch_permanently(&mut self, _lang: &Arc<Language>) {}
    fn switch_back(&mut self) {}
    fn set_countdown(&mut self, _countdown: u32) {}
    fn terminate(&mut self) {}
    fn reference(&mut self, _reference: Reference) {}
}

/// Discovery mode: control effects mutate the sequencer, references are
/// collected for the driver, no text is produced.
pub struct DiscoverySink<'a> {
    pub sequencer: &'a mut Sequencer,
    pub references: Vec<Reference>,
}

impl<'a> DiscoverySink<'a> {
    pub fn new(sequencer: &'a mut Sequencer) -> Self {
        Self {
            sequencer,
            references: vec![],
        }
    }
}

impl EffectSink for DiscoverySink<'_> {
    fn switch_temporarily(&mut self, lang: &Arc<Language>) {
        self.sequencer.switch_temporarily(lang);
    }

    fn switch_permanently(&mut self, lang: &Arc<Language>) {
        self.sequencer.switch_permanently(lang);
    }

    fn switch_back(&mut self) {
        self.sequencer.switch_back();
    }

    fn set_countdown(&mut self, countdown: u32) {
        self.sequencer.set_countdown(countdown);
    }

    fn terminate(&mut self) {
        self.sequencer.terminate();
    }

    fn reference(&mut self, reference: Reference) {
        self.references.push(reference);
    }
}

/// Render mode: text accumulates, control effects and references are
/// ignored. The switch-back opcode leaves a `^` marker in the text.
#[derive(Default)]
pub struct RenderSink {
    pub out: String,
}

impl EffectSink for RenderSink {
    fn text(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn switch_back(&mut self) {
        self.out.push('^');
    }
}

/// Run one decipherer of `lang` against `image` at `offset`.
///
/// Returns the instruction size: the maximum of `suboffset + width` over
/// every fetch executed, seeded with the dispatch key position. The
/// maximum (rather than the last fetch) matters when a trailing fetch
/// sits at a smaller suboffset than an earlier one, and when a
/// sub-dispatch consumes fewer bytes than the outer program already did.
#[tracing::instrument(skip(lang, image, sink), fields(lang = %lang.name()))]
pub fn decipher(
    lang: &Arc<Language>,
    image: &[u8],
    offset: usize,
    origin: u32,
    sink: &mut dyn EffectSink,
) -> Result<usize, StepError> {
    match lang.body() {
        LanguageBody::Compiled(bytecode) => {
            let key_at = offset + lang.dispatch_suboffset();
            let key = *image
                .get(key_at)
                .ok_or_else(|| StepError::IncompleteInstruction {
                    lang: lang.name().to_string(),
                })?;
            let start = bytecode
                .entry(key)
                .ok_or_else(|| StepError::UnknownOpcode {
                    lang: lang.name().to_string(),
                    opcode: key,
                })?;
            let mut run = Run {
                image,
                offset,
                origin,
                size: lang.dispatch_suboffset() + 1,
            };
            run.program(lang, bytecode, start, key as u32, sink)?;
            Ok(run.size)
        }
        LanguageBody::Empty => {
            let key = *image
                .get(offset)
                .ok_or_else(|| StepError::IncompleteInstruction {
                    lang: lang.name().to_string(),
                })?;
            Err(StepError::UnknownOpcode {
                lang: lang.name().to_string(),
                opcode: key,
            })
        }
        LanguageBody::PackedFloat => packed_float(lang, image, offset, sink),
    }
}

struct Run<'a> {
    image: &'a [u8],
    offset: usize,
    origin: u32,
    size: usize,
}

impl Run<'_> {
    fn program(
        &mut self,
        lang: &Arc<Language>,
        bytecode: &Bytecode,
        start: usize,
        key: u32,
        sink: &mut dyn EffectSink,
    ) -> Result<(), StepError> {
        let mut value: u32 = key;
        let mut pc = start;
        loop {
            let op = bytecode.blob[pc];
            pc += 1;
            if op & LITERAL_BIT != 0 {
                let ch = (op & !LITERAL_BIT) as char;
                sink.text(ch.encode_utf8(&mut [0u8; 4]));
            } else if op == OP_END {
                return Ok(());
            } else if op == OP_TERMINATE {
                sink.terminate();
            } else if op == OP_SWITCH_BACK {
                sink.switch_back();
            } else if (OP_COUNTDOWN_BASE..OP_COUNTDOWN_BASE + 3).contains(&op) {
                sink.set_countdown((op - OP_COUNTDOWN_BASE) as u32 + 1);
            } else if op == OP_DECIMAL {
                sink.text(&value.to_string());
            } else if op == OP_UNSIGNED_BYTE {
                sink.text(&format!("0x{:02X}", value & 0xff));
            } else if op == OP_UNSIGNED_WYDE {
                sink.text(&format!("0x{:04X}", value & 0xffff));
            } else if op == OP_SIGNED_BYTE {
                let v = value as u8 as i8;
                if v < 0 {
                    sink.text(&format!("-0x{:02X}", v.unsigned_abs()));
                } else {
                    sink.text(&format!("0x{:02X}", v));
                }
            } else if op == OP_SIGNED_WYDE {
                let v = value as u16 as i16;
                if v < 0 {
                    sink.text(&format!("-0x{:04X}", v.unsigned_abs()));
                } else {
                    sink.text(&format!("0x{:04X}", v));
                }
            } else if (OP_SHR_BASE..OP_SHR_BASE + 4).contains(&op) {
                value >>= 3 + (op - OP_SHR_BASE) as u32;
            } else if (OP_AND_BASE..OP_AND_BASE + 3).contains(&op) {
                value &= AND_MASKS[(op - OP_AND_BASE) as usize];
            } else if (OP_REL_BASE..OP_REL_BASE + 2).contains(&op) {
                let bias = (op - OP_REL_BASE) as u32 + 1;
                let base = self.origin.wrapping_add(self.offset as u32).wrapping_add(bias);
                let target = base.wrapping_add((value as u8 as i8) as u32);
                sink.reference(Reference::Branch(target & 0xffff));
            } else if op == OP_ENTRY_API {
                sink.reference(Reference::Call(value & 0xffff));
            } else if (OP_FETCH_BYTE_BASE..OP_FETCH_BYTE_BASE + MAX_SUBOFFSET as u8).contains(&op)
            {
                let s = (op - OP_FETCH_BYTE_BASE) as usize;
                value = self.fetch(lang, s, 1)? as u32;
            } else if (OP_FETCH_WYDE_LE_BASE..OP_FETCH_WYDE_LE_BASE + MAX_SUBOFFSET as u8)
                .contains(&op)
            {
                let s = (op - OP_FETCH_WYDE_LE_BASE) as usize;
                value = self.fetch(lang, s, 2)?;
            } else if (OP_FETCH_WYDE_BE_BASE..OP_FETCH_WYDE_BE_BASE + MAX_SUBOFFSET as u8)
                .contains(&op)
            {
                let s = (op - OP_FETCH_WYDE_BE_BASE) as usize;
                let le = self.fetch(lang, s, 2)?;
                value = (le >> 8) | ((le & 0xff) << 8);
            } else if (OP_MINITABLE_BASE..OP_MINITABLE_BASE + MAX_MINITABLES as u8).contains(&op)
            {
                let table = lang.minitable((op - OP_MINITABLE_BASE) as usize);
                sink.text(&table[value as usize & (table.len() - 1)]);
            } else if (OP_DISPATCH_BASE..OP_DISPATCH_BASE + MAX_REFERRED as u8).contains(&op) {
                self.dispatch(lang.referred((op - OP_DISPATCH_BASE) as usize), value, sink)?;
            } else if (OP_TEMP_SWITCH_BASE..OP_TEMP_SWITCH_BASE + MAX_REFERRED as u8)
                .contains(&op)
            {
                sink.switch_temporarily(lang.referred((op - OP_TEMP_SWITCH_BASE) as usize));
            } else if (OP_PERM_SWITCH_BASE..OP_PERM_SWITCH_BASE + MAX_REFERRED as u8)
                .contains(&op)
            {
                sink.switch_permanently(lang.referred((op - OP_PERM_SWITCH_BASE) as usize));
            } else if (OP_ENTRY_LANG_BASE..OP_ENTRY_LANG_BASE + MAX_REFERRED as u8).contains(&op)
            {
                let target = lang.referred((op - OP_ENTRY_LANG_BASE) as usize).clone();
                sink.reference(Reference::Entry(value & 0xffff, target));
            } else {
                panic!("Corrupt bytecode in language '{}': {:#04x}", lang.name(), op);
            }
        }
    }

    /// Recursive dispatch: the referred language decodes the current
    /// value as its dispatch key. Its fetches are relative to the same
    /// instruction base and its size folds into the maximiser.
    fn dispatch(
        &mut self,
        sub: &Arc<Language>,
        key: u32,
        sink: &mut dyn EffectSink,
    ) -> Result<(), StepError> {
        match sub.body() {
            LanguageBody::Compiled(bytecode) => {
                let start =
                    bytecode
                        .entry((key & 0xff) as u8)
                        .ok_or_else(|| StepError::UnknownOpcode {
                            lang: sub.name().to_string(),
                            opcode: (key & 0xff) as u8,
                        })?;
                self.program(sub, bytecode, start, key, sink)
            }
            _ => Err(StepError::UnknownOpcode {
                lang: sub.name().to_string(),
                opcode: (key & 0xff) as u8,
            }),
        }
    }

    fn fetch(&mut self, lang: &Arc<Language>, suboffset: usize, width: usize) -> Result<u32, StepError> {
        let at = self.offset + suboffset;
        if at + width > self.image.len() {
            return Err(StepError::IncompleteInstruction {
                lang: lang.name().to_string(),
            });
        }
        self.size = self.size.max(suboffset + width);
        let mut value = self.image[at] as u32;
        if width == 2 {
            value |= (self.image[at + 1] as u32) << 8;
        }
        Ok(value)
    }
}

/// The packed floating literal pseudo-language: five bytes, CBM format.
/// Byte 0 is the exponent (0 means the value is exactly 0.0, bias
/// 0x80), bytes 1-4 the big-endian mantissa with an implied leading one,
/// sign in bit 7 of byte 1.
fn packed_float(
    lang: &Arc<Language>,
    image: &[u8],
    offset: usize,
    sink: &mut dyn EffectSink,
) -> Result<usize, StepError> {
    const SIZE: usize = 5;
    if offset + SIZE > image.len() {
        return Err(StepError::IncompleteInstruction {
            lang: lang.name().to_string(),
        });
    }
    let bytes = &image[offset..offset + SIZE];
    let value = if bytes[0] == 0 {
        0.0
    } else {
        let mantissa = u32::from_be_bytes([bytes[1] | 0x80, bytes[2], bytes[3], bytes[4]]);
        let magnitude =
            (mantissa as f64 / (1u64 << 32) as f64) * ((bytes[0] as i32 - 0x80) as f64).exp2();
        if bytes[1] & 0x80 != 0 {
            -magnitude
        } else {
            magnitude
        }
    };
    sink.text(&format!("!float {}", value));
    Ok(SIZE)
}
