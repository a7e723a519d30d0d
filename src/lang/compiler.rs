use std::sync::Arc;

use crate::codeset::CodeSet;
use crate::lang::bytecode::*;
use crate::lang::registry::Registry;
use crate::lang::{LangError, Language, LanguageBody};

/// Compiles a textual language description into a [`Language`].
///
/// The description is line-oriented: `#` comment lines and blank lines
/// are ignored, header declarations set language attributes, `name[]`
/// lines declare minitables and `[codeset] program` lines declare
/// decipherers. Referred languages are resolved through the registry
/// while compiling, which is where a cyclic language set is caught.
#[tracing::instrument(skip(source, registry))]
pub fn compile(name: &str, source: &str, registry: &Registry) -> Result<Language, LangError> {
    let mut header = Header::default();
    let mut minitables: Vec<(String, Vec<String>)> = vec![];
    let mut decipherers: Vec<(usize, CodeSet, String)> = vec![];

    // First pass: classify lines. Programs are compiled afterwards so
    // that headers and minitables may appear in any order.
    for (ix, raw) in source.lines().enumerate() {
        let line = ix + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        if let Some(value) = text.strip_prefix("Dispatch-suboffset:") {
            header.set_dispatch_suboffset(line, value)?;
        } else if let Some(value) = text.strip_prefix("Default-countdown:") {
            header.set_default_countdown(line, value)?;
        } else if text == "Trivial!" {
            header.trivial = true;
        } else if let Some(rest) = text.strip_prefix('[') {
            let (codeset_text, program) = rest.split_once(']').ok_or_else(|| {
                LangError::UnrecognizedLine {
                    line,
                    text: text.to_string(),
                }
            })?;
            let codeset = CodeSet::parse(codeset_text.trim())
                .map_err(|source| LangError::CodeSet { line, source })?;
            decipherers.push((line, codeset, program.trim_start().to_string()));
        } else if let Some((name, values)) = text.split_once("[]") {
            add_minitable(&mut minitables, line, name.trim(), values)?;
        } else {
            return Err(LangError::UnrecognizedLine {
                line,
                text: text.to_string(),
            });
        }
    }

    // Second pass: compile each program and populate the dispatch table.
    let mut assembler = Assembler::new(&header, &minitables);
    let mut blob = vec![];
    let mut dispatch: Box<[Option<usize>; 256]> = Box::new([None; 256]);
    for (line, codeset, program) in &decipherers {
        let start = blob.len();
        assembler.program(*line, program, &mut blob)?;
        blob.push(OP_END);
        for value in 0..=255u8 {
            if codeset.matches(value) {
                if dispatch[value as usize].is_some() {
                    return Err(LangError::DuplicateDecipherer {
                        line: *line,
                        opcode: value,
                    });
                }
                dispatch[value as usize] = Some(start);
            }
        }
    }

    let referred = assembler.resolve(registry)?;
    Ok(Language::new(
        name,
        header.default_countdown.unwrap_or(0),
        header.trivial,
        header.dispatch_suboffset.unwrap_or(0),
        minitables.into_iter().map(|(_, values)| values).collect(),
        referred,
        LanguageBody::Compiled(Bytecode { blob, dispatch }),
    ))
}

#[derive(Default)]
struct Header {
    dispatch_suboffset: Option<usize>,
    default_countdown: Option<u32>,
    trivial: bool,
}

impl Header {
    fn set_dispatch_suboffset(&mut self, line: usize, value: &str) -> Result<(), LangError> {
        if self.dispatch_suboffset.is_some() {
            return Err(LangError::DuplicateHeader {
                line,
                header: "Dispatch-suboffset".to_string(),
            });
        }
        let suboffset = parse_int(line, value)? as usize;
        if suboffset >= MAX_SUBOFFSET {
            return Err(LangError::SuboffsetOutOfRange {
                line,
                suboffset,
                max: MAX_SUBOFFSET - 1,
            });
        }
        self.dispatch_suboffset = Some(suboffset);
        Ok(())
    }

    fn set_default_countdown(&mut self, line: usize, value: &str) -> Result<(), LangError> {
        if self.default_countdown.is_some() {
            return Err(LangError::DuplicateHeader {
                line,
                header: "Default-countdown".to_string(),
            });
        }
        self.default_countdown = Some(parse_int(line, value)?);
        Ok(())
    }
}

fn parse_int(line: usize, value: &str) -> Result<u32, LangError> {
    value.trim().parse().map_err(|_| LangError::InvalidValue {
        line,
        text: value.trim().to_string(),
    })
}

fn add_minitable(
    minitables: &mut Vec<(String, Vec<String>)>,
    line: usize,
    name: &str,
    values: &str,
) -> Result<(), LangError> {
    if minitables.iter().any(|(n, _)| n == name) {
        return Err(LangError::DuplicateMinitable {
            line,
            name: name.to_string(),
        });
    }
    if minitables.len() == MAX_MINITABLES {
        return Err(LangError::TooManyMinitables {
            line,
            max: MAX_MINITABLES,
        });
    }
    let values: Vec<String> = values.split(',').map(|v| v.trim().to_string()).collect();
    if !values.len().is_power_of_two() {
        return Err(LangError::MinitableNotPowerOfTwo {
            line,
            name: name.to_string(),
            count: values.len(),
        });
    }
    minitables.push((name.to_string(), values));
    Ok(())
}

/// Compiles decipherer program text into bytecode, tracking the pending
/// value width and interning referred language names.
struct Assembler<'a> {
    dispatch_suboffset: usize,
    minitables: &'a [(String, Vec<String>)],
    referred_names: Vec<String>,
}

impl<'a> Assembler<'a> {
    fn new(header: &Header, minitables: &'a [(String, Vec<String>)]) -> Self {
        Self {
            dispatch_suboffset: header.dispatch_suboffset.unwrap_or(0),
            minitables,
            referred_names: vec![],
        }
    }

    /// Resolve the interned referred-language names, in first-seen order.
    fn resolve(&self, registry: &Registry) -> Result<Vec<Arc<Language>>, LangError> {
        self.referred_names
            .iter()
            .map(|name| registry.lookup(name))
            .collect()
    }

    fn intern(&mut self, line: usize, name: &str) -> Result<u8, LangError> {
        let key = name.to_lowercase();
        if let Some(ix) = self.referred_names.iter().position(|n| *n == key) {
            return Ok(ix as u8);
        }
        if self.referred_names.len() == MAX_REFERRED {
            return Err(LangError::TooManyReferred {
                line,
                max: MAX_REFERRED,
            });
        }
        self.referred_names.push(key);
        Ok((self.referred_names.len() - 1) as u8)
    }

    /// Compile one program: literal ASCII interleaved with `<step, …>`
    /// groups. Appends bytecode to `blob` without the final [`OP_END`].
    fn program(&mut self, line: usize, text: &str, blob: &mut Vec<u8>) -> Result<(), LangError> {
        let mut state = ProgramState {
            pending_width: 0,
            // Operand fetches default to the bytes following the
            // dispatch key, unless repositioned with `@.N`.
            suboffset: self.dispatch_suboffset + 1,
        };
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '<' {
                if !(' '..='~').contains(&ch) {
                    return Err(LangError::NonAsciiLiteral { line, ch });
                }
                blob.push(ch as u8 | LITERAL_BIT);
                continue;
            }
            // A bracketed step group, comma-separated. A lone `>` closes
            // the group; `>>` always starts a shift step.
            let mut step = String::new();
            let mut closed = false;
            while let Some(ch) = chars.next() {
                match ch {
                    ',' => {
                        self.step(line, step.trim(), &mut state, blob)?;
                        step.clear();
                    }
                    '>' if chars.peek() != Some(&'>') => {
                        self.step(line, step.trim(), &mut state, blob)?;
                        closed = true;
                        break;
                    }
                    '>' => {
                        step.push('>');
                        step.push(chars.next().unwrap());
                    }
                    _ => step.push(ch),
                }
            }
            if !closed {
                return Err(LangError::UnterminatedStepGroup { line });
            }
            if state.pending_width != 0 {
                return Err(LangError::FinalStepMissing { line });
            }
        }
        Ok(())
    }

    fn step(
        &mut self,
        line: usize,
        step: &str,
        state: &mut ProgramState,
        blob: &mut Vec<u8>,
    ) -> Result<(), LangError> {
        let unknown = || LangError::UnknownStep {
            line,
            step: step.to_string(),
        };
        let (keyword, arg) = match step.split_once(char::is_whitespace) {
            Some((keyword, arg)) => (keyword, Some(arg.trim())),
            None => (step, None),
        };
        if let Some(name) = arg {
            match keyword {
                "dispatch" => {
                    state.consume(line, step)?;
                    blob.push(OP_DISPATCH_BASE + self.intern(line, name)?);
                }
                "tempswitch" => blob.push(OP_TEMP_SWITCH_BASE + self.intern(line, name)?),
                "permswitch" => blob.push(OP_PERM_SWITCH_BASE + self.intern(line, name)?),
                "entry" => {
                    state.consume(line, step)?;
                    blob.push(OP_ENTRY_LANG_BASE + self.intern(line, name)?);
                }
                "countdown" => match name {
                    "1" | "2" | "3" => {
                        blob.push(OP_COUNTDOWN_BASE + (name.as_bytes()[0] - b'1'))
                    }
                    _ => return Err(unknown()),
                },
                _ => return Err(unknown()),
            }
            return Ok(());
        }
        match keyword {
            "1" => state.fetch(line, 1, OP_FETCH_BYTE_BASE, blob)?,
            "2" => state.fetch(line, 2, OP_FETCH_WYDE_LE_BASE, blob)?,
            "2be" => state.fetch(line, 2, OP_FETCH_WYDE_BE_BASE, blob)?,
            ">>3" | ">>4" | ">>5" | ">>6" => {
                state.require(line, step)?;
                blob.push(OP_SHR_BASE + (keyword.as_bytes()[2] - b'3'));
            }
            "&3" => {
                state.require(line, step)?;
                blob.push(OP_AND_BASE);
            }
            "&7" => {
                state.require(line, step)?;
                blob.push(OP_AND_BASE + 1);
            }
            "&0x38" => {
                state.require(line, step)?;
                blob.push(OP_AND_BASE + 2);
            }
            "unsigned" => {
                let wyde = state.consume(line, step)? == 2;
                blob.push(if wyde { OP_UNSIGNED_WYDE } else { OP_UNSIGNED_BYTE });
            }
            "signed" => {
                let wyde = state.consume(line, step)? == 2;
                blob.push(if wyde { OP_SIGNED_WYDE } else { OP_SIGNED_BYTE });
            }
            "decimal" => {
                state.consume(line, step)?;
                blob.push(OP_DECIMAL);
            }
            "rel1" | "rel2" => {
                state.consume(line, step)?;
                blob.push(OP_REL_BASE + (keyword.as_bytes()[3] - b'1'));
            }
            "entry" => {
                state.consume(line, step)?;
                blob.push(OP_ENTRY_API);
            }
            "switchback" => blob.push(OP_SWITCH_BACK),
            "terminate" => blob.push(OP_TERMINATE),
            _ => {
                if let Some(suboffset) = keyword.strip_prefix("@.") {
                    state.suboffset = suboffset
                        .parse()
                        .map_err(|_| unknown())?;
                } else if let Some(k) = self.minitables.iter().position(|(n, _)| n == keyword) {
                    state.consume(line, step)?;
                    blob.push(OP_MINITABLE_BASE + k as u8);
                } else {
                    return Err(unknown());
                }
            }
        }
        Ok(())
    }
}

struct ProgramState {
    pending_width: u8,
    suboffset: usize,
}

impl ProgramState {
    fn fetch(
        &mut self,
        line: usize,
        width: u8,
        base: u8,
        blob: &mut Vec<u8>,
    ) -> Result<(), LangError> {
        if self.suboffset + width as usize > MAX_SUBOFFSET {
            return Err(LangError::SuboffsetOutOfRange {
                line,
                suboffset: self.suboffset,
                max: MAX_SUBOFFSET - width as usize,
            });
        }
        blob.push(base + self.suboffset as u8);
        self.suboffset += width as usize;
        self.pending_width = width;
        Ok(())
    }

    fn require(&self, line: usize, step: &str) -> Result<(), LangError> {
        if self.pending_width == 0 {
            return Err(LangError::MissingValue {
                line,
                step: step.to_string(),
            });
        }
        Ok(())
    }

    /// Consume the pending value, returning its width in bytes.
    fn consume(&mut self, line: usize, step: &str) -> Result<u8, LangError> {
        self.require(line, step)?;
        Ok(std::mem::take(&mut self.pending_width))
    }
}
