use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::lang::registry::Registry;
use crate::lang::{LangError, Language};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Line {line}: invalid address '{text}'")]
    InvalidAddress { line: usize, text: String },
    #[error("Line {line}: unknown effect '{text}'")]
    UnknownEffect { line: usize, text: String },
    #[error("Line {line}: effect '{effect}' requires a language name")]
    MissingLanguage { line: usize, effect: String },
    #[error("Line {line}: duplicate vector for address {address:#06x}")]
    DuplicateVector { line: usize, address: u32 },
    #[error(transparent)]
    Lang(#[from] LangError),
}

/// Sequencer effect applied when code references a known platform entry
/// point.
#[derive(Debug, Clone)]
pub enum ApiEffect {
    Terminate,
    SwitchPermanently(Arc<Language>),
    SwitchTemporarily(Arc<Language>),
}

#[derive(Debug, Clone, Copy, strum_macros::EnumString)]
#[strum(serialize_all = "kebab-case")]
enum EffectKind {
    Terminate,
    SwitchPermanently,
    SwitchTemporarily,
}

/// Known platform entry points and their sequencer effects.
///
/// Loaded from a simple text table, one vector per line:
///
/// ```text
/// # hex address, effect, optional language name
/// ffd2 terminate
/// a871 switch-temporarily petscii
/// a7ed switch-permanently basic
/// ```
#[derive(Debug, Clone, Default)]
pub struct ApiTable {
    vectors: BTreeMap<u32, ApiEffect>,
}

impl ApiTable {
    pub fn empty() -> Self {
        Self::default()
    }

    #[tracing::instrument(skip_all)]
    pub fn parse(source: &str, registry: &Registry) -> Result<Self, ApiError> {
        let mut vectors = BTreeMap::new();
        for (ix, raw) in source.lines().enumerate() {
            let line = ix + 1;
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let mut fields = text.split_whitespace();
            let address_text = fields.next().unwrap_or_default();
            let address = u32::from_str_radix(address_text, 16).map_err(|_| {
                ApiError::InvalidAddress {
                    line,
                    text: address_text.to_string(),
                }
            })?;
            let effect_text = fields.next().unwrap_or_default();
            let kind =
                EffectKind::from_str(effect_text).map_err(|_| ApiError::UnknownEffect {
                    line,
                    text: effect_text.to_string(),
                })?;
            let effect = match kind {
                EffectKind::Terminate => ApiEffect::Terminate,
                EffectKind::SwitchPermanently | EffectKind::SwitchTemporarily => {
                    let name = fields.next().ok_or_else(|| ApiError::MissingLanguage {
                        line,
                        effect: effect_text.to_string(),
                    })?;
                    let lang = registry.lookup(name)?;
                    match kind {
                        EffectKind::SwitchPermanently => ApiEffect::SwitchPermanently(lang),
                        _ => ApiEffect::SwitchTemporarily(lang),
                    }
                }
            };
            if vectors.insert(address, effect).is_some() {
                return Err(ApiError::DuplicateVector { line, address });
            }
        }
        Ok(Self { vectors })
    }

    pub fn lookup(&self, address: u32) -> Option<&ApiEffect> {
        self.vectors.get(&address)
    }
}
