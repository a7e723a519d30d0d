use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::lang::{compiler, LangError, Language, NULL_LANG, PFLOAT_LANG};

lazy_static! {
    /// The null language singleton.
    pub static ref NULL_LANGUAGE: Arc<Language> = Arc::new(Language::null());
    /// The packed floating literal singleton.
    pub static ref PFLOAT_LANGUAGE: Arc<Language> = Arc::new(Language::packed_float());
}

/// Provides the textual description of a language, by name.
pub trait LanguageSource {
    fn load(&self, name: &str) -> Result<String, LangError>;
}

/// Loads `<root>/<name>.lang` files.
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LanguageSource for DirSource {
    fn load(&self, name: &str) -> Result<String, LangError> {
        let path = self.root.join(format!("{}.lang", name));
        std::fs::read_to_string(path).map_err(|e| LangError::Load(name.to_string(), e))
    }
}

/// In-memory source, for tests and embedded language sets.
pub struct MapSource {
    descriptions: HashMap<String, String>,
}

impl MapSource {
    pub fn new(descriptions: &[(&str, &str)]) -> Self {
        Self {
            descriptions: descriptions
                .iter()
                .map(|(name, text)| (name.to_lowercase(), text.to_string()))
                .collect(),
        }
    }
}

impl LanguageSource for MapSource {
    fn load(&self, name: &str) -> Result<String, LangError> {
        self.descriptions
            .get(name)
            .cloned()
            .ok_or_else(|| LangError::NotFound(name.to_string()))
    }
}

/// Name-indexed collection of languages.
///
/// Lookup is case-insensitive and memoized: the first lookup of a name
/// compiles its description, later lookups return the same immutable
/// instance. The two hand-built singletons are pre-seeded. A lookup of
/// a name whose compilation is still in progress means the referred-
/// language graph has a cycle, which is a fatal load error.
pub struct Registry {
    source: Box<dyn LanguageSource>,
    cache: RefCell<HashMap<String, Arc<Language>>>,
    loading: RefCell<HashSet<String>>,
}

impl Registry {
    pub fn new(source: Box<dyn LanguageSource>) -> Self {
        let mut cache = HashMap::new();
        cache.insert(NULL_LANG.to_string(), NULL_LANGUAGE.clone());
        cache.insert(PFLOAT_LANG.to_string(), PFLOAT_LANGUAGE.clone());
        Self {
            source,
            cache: RefCell::new(cache),
            loading: RefCell::new(HashSet::new()),
        }
    }

    /// Registry over an in-memory set of language descriptions.
    pub fn in_memory(descriptions: &[(&str, &str)]) -> Self {
        Self::new(Box::new(MapSource::new(descriptions)))
    }

    #[tracing::instrument(skip(self))]
    pub fn lookup(&self, name: &str) -> Result<Arc<Language>, LangError> {
        let key = name.to_lowercase();
        if let Some(lang) = self.cache.borrow().get(&key) {
            return Ok(lang.clone());
        }
        if !self.loading.borrow_mut().insert(key.clone()) {
            return Err(LangError::CircularReference(key));
        }
        let result = self
            .source
            .load(&key)
            .and_then(|text| compiler::compile(&key, &text, self));
        self.loading.borrow_mut().remove(&key);

        let lang = Arc::new(result?);
        tracing::debug!(name = %key, "compiled language");
        self.cache.borrow_mut().insert(key, lang.clone());
        Ok(lang)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup_is_memoized() {
        let registry = Registry::in_memory(&[("simple", "[0x??] NOP")]);
        let first = registry.lookup("simple").unwrap();
        let second = registry.lookup("SIMPLE").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_singletons_preseeded() {
        let registry = Registry::in_memory(&[]);
        assert!(registry.lookup("none").unwrap().is_null());
        assert_eq!(registry.lookup("pfloat").unwrap().name(), "pfloat");
    }

    #[test]
    fn test_unknown_language() {
        let registry = Registry::in_memory(&[]);
        assert!(matches!(
            registry.lookup("nope"),
            Err(LangError::NotFound(_))
        ));
    }

    #[test]
    fn test_referred_language_resolved() {
        let registry = Registry::in_memory(&[
            ("outer", "[0x??] <1,dispatch inner>"),
            ("inner", "[0x??] INNER"),
        ]);
        let outer = registry.lookup("outer").unwrap();
        assert_eq!(outer.referred(0).name(), "inner");
        // The recursive compile populated the cache for both.
        assert!(Arc::ptr_eq(outer.referred(0), &registry.lookup("inner").unwrap()));
    }

    #[test]
    fn test_cycle_is_fatal() {
        let registry = Registry::in_memory(&[
            ("a", "[0x??] <tempswitch b>"),
            ("b", "[0x??] <tempswitch a>"),
        ]);
        assert!(matches!(
            registry.lookup("a"),
            Err(LangError::CircularReference(_))
        ));
    }

    #[test]
    fn test_self_reference_is_fatal() {
        let registry = Registry::in_memory(&[("a", "[0x??] <1,dispatch a>")]);
        assert!(matches!(
            registry.lookup("a"),
            Err(LangError::CircularReference(_))
        ));
    }
}
