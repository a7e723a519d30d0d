use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodeSetError {
    #[error("Missing radix prefix in code set: '{0}'")]
    MissingRadixPrefix(String),
    #[error("Empty digit group in code set: '{0}'")]
    EmptyDigitGroup(String),
    #[error("Invalid character '{0}' in code set: '{1}'")]
    InvalidCharacter(char, String),
    #[error("Pattern wider than a byte: '{0}'")]
    PatternTooWide(String),
}

/// A predicate over opcode byte values.
///
/// Built from masked bit-pattern literals such as `0b01??` or `0x2?`,
/// optionally narrowed by set differences: `0x0? - 0x05` matches every
/// value in 0x00..=0x0F except 0x05. Used at language-compile time to
/// route opcode values to their decipherer programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeSet {
    /// Matches when `value & mask == pattern`.
    Masked { pattern: u8, mask: u8 },
    /// Matches the left set minus the right set.
    Difference(Box<CodeSet>, Box<CodeSet>),
}

impl CodeSet {
    pub fn matches(&self, value: u8) -> bool {
        match self {
            CodeSet::Masked { pattern, mask } => value & mask == *pattern,
            CodeSet::Difference(left, right) => left.matches(value) && !right.matches(value),
        }
    }

    /// Parse a full code set: a masked literal followed by zero or more
    /// `- <masked literal>` difference clauses, left-associative.
    pub fn parse(input: &str) -> Result<Self, CodeSetError> {
        let mut parts = input.split('-');
        let first = parts
            .next()
            .ok_or_else(|| CodeSetError::EmptyDigitGroup(input.to_string()))?;
        let mut set = Self::parse_masked(first.trim())?;
        for part in parts {
            let right = Self::parse_masked(part.trim())?;
            set = CodeSet::Difference(Box::new(set), Box::new(right));
        }
        Ok(set)
    }

    /// Parse one masked literal: radix prefix, then digits, `?` wildcard
    /// groups and `_` separators.
    ///
    /// Each digit contributes `radix bits` of pattern and mask; `?`
    /// contributes don't-care bits. The accumulated bits are left-padded
    /// to 8 with required-zero bits, so `0b01??` matches 0b0100..=0b0111
    /// and nothing else.
    fn parse_masked(input: &str) -> Result<Self, CodeSetError> {
        let (digit_bits, rest) = match input.get(..2) {
            Some("0x") => (4u32, &input[2..]),
            Some("0o") => (3u32, &input[2..]),
            Some("0b") => (1u32, &input[2..]),
            _ => return Err(CodeSetError::MissingRadixPrefix(input.to_string())),
        };

        let mut pattern: u32 = 0;
        let mut mask: u32 = 0;
        let mut bits: u32 = 0;
        for ch in rest.chars() {
            match ch {
                '_' => continue,
                '?' => {
                    pattern <<= digit_bits;
                    mask <<= digit_bits;
                    bits += digit_bits;
                }
                _ => {
                    let digit = ch
                        .to_digit(1 << digit_bits)
                        .ok_or_else(|| CodeSetError::InvalidCharacter(ch, input.to_string()))?;
                    pattern = (pattern << digit_bits) | digit;
                    mask = (mask << digit_bits) | ((1 << digit_bits) - 1);
                    bits += digit_bits;
                }
            }
            if bits > 8 {
                return Err(CodeSetError::PatternTooWide(input.to_string()));
            }
        }
        if bits == 0 {
            return Err(CodeSetError::EmptyDigitGroup(input.to_string()));
        }

        // Unwritten high bits are required to be zero, not don't-care.
        let high = 8 - bits;
        Ok(CodeSet::Masked {
            pattern: pattern as u8,
            mask: (mask | (((1 << high) - 1) << bits)) as u8,
        })
    }
}

impl fmt::Display for CodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeSet::Masked { pattern, mask } => write!(f, "{:#04x}/{:#04x}", pattern, mask),
            CodeSet::Difference(left, right) => write!(f, "{} - {}", left, right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn matching_values(set: &CodeSet) -> Vec<u8> {
        (0..=255u8).filter(|v| set.matches(*v)).collect()
    }

    #[test]
    fn test_binary_wildcard() {
        let set = CodeSet::parse("0b01??").unwrap();
        assert_eq!(matching_values(&set), vec![0b0100, 0b0101, 0b0110, 0b0111]);
    }

    #[test]
    fn test_hex_wildcard() {
        let set = CodeSet::parse("0x2?").unwrap();
        assert_eq!(matching_values(&set), (0x20..=0x2f).collect::<Vec<u8>>());
    }

    #[test]
    fn test_full_byte_wildcard() {
        let set = CodeSet::parse("0x??").unwrap();
        assert_eq!(matching_values(&set).len(), 256);
    }

    #[test]
    fn test_difference() {
        let set = CodeSet::parse("0x0? - 0x05").unwrap();
        let expected: Vec<u8> = (0x00..=0x0f).filter(|v| *v != 0x05).collect();
        assert_eq!(matching_values(&set), expected);
    }

    #[test]
    fn test_chained_difference() {
        let set = CodeSet::parse("0x?? - 0x0? - 0x1?").unwrap();
        assert_eq!(matching_values(&set), (0x20..=0xff).collect::<Vec<u8>>());
    }

    #[test]
    fn test_separator() {
        let set = CodeSet::parse("0b0100_11??").unwrap();
        assert_eq!(matching_values(&set), vec![0x4c, 0x4d, 0x4e, 0x4f]);
    }

    #[test]
    fn test_octal() {
        let set = CodeSet::parse("0o1?").unwrap();
        // One octal digit of pattern, one wildcard: 0o10..=0o17
        assert_eq!(matching_values(&set), (0o10..=0o17).collect::<Vec<u8>>());
    }

    #[test]
    fn test_errors() {
        let tests = vec![
            ("12", CodeSetError::MissingRadixPrefix("12".to_string())),
            ("0x", CodeSetError::EmptyDigitGroup("0x".to_string())),
            ("0b2", CodeSetError::InvalidCharacter('2', "0b2".to_string())),
            ("0x1g", CodeSetError::InvalidCharacter('g', "0x1g".to_string())),
            ("0x123", CodeSetError::PatternTooWide("0x123".to_string())),
            ("0x?? - zz", CodeSetError::MissingRadixPrefix("zz".to_string())),
        ];
        for (input, expected) in tests {
            assert_eq!(CodeSet::parse(input), Err(expected));
        }
    }
}
