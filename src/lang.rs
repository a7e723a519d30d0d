use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;

use self::bytecode::Bytecode;
use crate::codeset::CodeSetError;

/// Bytecode encoding: opcode constants and the compiled blob.
pub mod bytecode;

/// Compiles a textual language description into a [`Language`].
pub mod compiler;

/// Name-indexed, lazily compiled language collection.
pub mod registry;

/// Name of the null language; decodes nothing, ends a traversal.
pub const NULL_LANG: &str = "none";
/// Name of the packed floating literal pseudo-language.
pub const PFLOAT_LANG: &str = "pfloat";

#[derive(Error, Debug)]
pub enum LangError {
    #[error("Language not found: {0}")]
    NotFound(String),
    #[error("Failed to read language '{0}': {1}")]
    Load(String, std::io::Error),
    #[error("Referred-language cycle through '{0}'")]
    CircularReference(String),
    #[error("Line {line}: {source}")]
    CodeSet {
        line: usize,
        #[source]
        source: CodeSetError,
    },
    #[error("Line {line}: duplicate declaration '{header}'")]
    DuplicateHeader { line: usize, header: String },
    #[error("Line {line}: invalid value in '{text}'")]
    InvalidValue { line: usize, text: String },
    #[error("Line {line}: duplicate minitable '{name}'")]
    DuplicateMinitable { line: usize, name: String },
    #[error("Line {line}: too many minitables (max {max})")]
    TooManyMinitables { line: usize, max: usize },
    #[error("Line {line}: minitable '{name}' has {count} entries, not a power of two")]
    MinitableNotPowerOfTwo {
        line: usize,
        name: String,
        count: usize,
    },
    #[error("Line {line}: duplicate decipherer for opcode {opcode:#04x}")]
    DuplicateDecipherer { line: usize, opcode: u8 },
    #[error("Line {line}: unknown processing step '{step}'")]
    UnknownStep { line: usize, step: String },
    #[error("Line {line}: step '{step}' has no value to consume")]
    MissingValue { line: usize, step: String },
    #[error("Line {line}: final step missing, value left unconsumed")]
    FinalStepMissing { line: usize },
    #[error("Line {line}: suboffset {suboffset} out of range (max {max})")]
    SuboffsetOutOfRange {
        line: usize,
        suboffset: usize,
        max: usize,
    },
    #[error("Line {line}: too many referred languages (max {max})")]
    TooManyReferred { line: usize, max: usize },
    #[error("Line {line}: unterminated step group")]
    UnterminatedStepGroup { line: usize },
    #[error("Line {line}: literal character '{ch}' is not printable ASCII")]
    NonAsciiLiteral { line: usize, ch: char },
    #[error("Line {line}: unrecognized declaration '{text}'")]
    UnrecognizedLine { line: usize, text: String },
}

/// How the bytes of one instruction are decoded.
#[derive(Debug)]
pub enum LanguageBody {
    /// Programs compiled from a textual description.
    Compiled(Bytecode),
    /// No decipherers at all; every byte is an unknown opcode.
    Empty,
    /// Fixed 5-byte CBM-style packed floating point literal.
    PackedFloat,
}

/// One instruction-set description.
///
/// Identity is the (lowercase) name: languages compare, order and hash
/// by name alone, so a registry-cached instance and a hand-built one
/// with the same name are interchangeable. Instances are immutable once
/// built.
#[derive(Debug)]
pub struct Language {
    name: String,
    default_countdown: u32,
    trivial: bool,
    dispatch_suboffset: usize,
    minitables: Vec<Vec<String>>,
    referred: Vec<Arc<Language>>,
    body: LanguageBody,
}

impl Language {
    pub(crate) fn new(
        name: &str,
        default_countdown: u32,
        trivial: bool,
        dispatch_suboffset: usize,
        minitables: Vec<Vec<String>>,
        referred: Vec<Arc<Language>>,
        body: LanguageBody,
    ) -> Self {
        Self {
            name: name.to_lowercase(),
            default_countdown,
            trivial,
            dispatch_suboffset,
            minitables,
            referred,
            body,
        }
    }

    /// The null language: trivial, decodes nothing.
    pub fn null() -> Self {
        Self::new(NULL_LANG, 0, true, 0, vec![], vec![], LanguageBody::Empty)
    }

    /// The packed floating literal pseudo-language: trivial, decodes a
    /// fixed 5-byte float constant wherever it is active.
    pub fn packed_float() -> Self {
        Self::new(
            PFLOAT_LANG,
            0,
            true,
            0,
            vec![],
            vec![],
            LanguageBody::PackedFloat,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instructions decoded before a temporary switch into this language
    /// reverts; 0 means indefinitely.
    pub fn default_countdown(&self) -> u32 {
        self.default_countdown
    }

    /// Trivial languages do not announce their activation in the listing.
    pub fn is_trivial(&self) -> bool {
        self.trivial
    }

    pub fn is_null(&self) -> bool {
        matches!(self.body, LanguageBody::Empty)
    }

    /// Position of the dispatch key byte within an instruction.
    pub fn dispatch_suboffset(&self) -> usize {
        self.dispatch_suboffset
    }

    pub fn body(&self) -> &LanguageBody {
        &self.body
    }

    pub(crate) fn minitable(&self, index: usize) -> &[String] {
        &self.minitables[index]
    }

    pub(crate) fn referred(&self, index: usize) -> &Arc<Language> {
        &self.referred[index]
    }
}

impl PartialEq for Language {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Language {}

impl PartialOrd for Language {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Language {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for Language {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_by_name() {
        let a = Language::new("M6502", 0, false, 0, vec![], vec![], LanguageBody::Empty);
        let b = Language::null();
        assert_eq!(a.name(), "m6502");
        assert_ne!(a, b);
        assert!(a.cmp(&b) == Ordering::Less);
        assert_eq!(
            a,
            Language::new("m6502", 3, true, 1, vec![], vec![], LanguageBody::Empty)
        );
    }

    #[test]
    fn test_singletons() {
        assert!(Language::null().is_null());
        assert!(Language::null().is_trivial());
        assert!(!Language::packed_float().is_null());
    }
}
