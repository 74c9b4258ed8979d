//! Local dictionary fallback
//!
//! Deterministic, dependency-free corrections for common Spanish
//! misspellings. Used in local-only mode and whenever the remote path is
//! unavailable.

use once_cell::sync::Lazy;
use quill_core::Correction;
use std::collections::{BTreeMap, HashMap};

static BUILTIN_CORRECTIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("qe", "que"),
        ("qeu", "que"),
        ("pq", "porque"),
        ("xq", "porque"),
        ("porqe", "porque"),
        ("kiero", "quiero"),
        ("aser", "hacer"),
        ("ablar", "hablar"),
        ("aver", "haber"),
        ("ai", "hay"),
        ("ahi", "ahí"),
        ("ahy", "ahí"),
        ("voi", "voy"),
        ("soi", "soy"),
        ("mui", "muy"),
        ("oi", "hoy"),
        ("ves", "vez"),
        ("veses", "veces"),
        ("enpesar", "empezar"),
        ("entonses", "entonces"),
        ("inportante", "importante"),
        ("tanbien", "también"),
        ("tanvien", "también"),
        ("desir", "decir"),
        ("dise", "dice"),
        ("nesesito", "necesito"),
        ("nesecito", "necesito"),
    ])
});

/// Misspelling table keyed by lowercase word.
#[derive(Debug, Clone)]
pub struct LocalDictionary {
    table: HashMap<String, String>,
}

impl LocalDictionary {
    /// Built-in table with `extra` entries merged over it.
    pub fn new(extra: &BTreeMap<String, String>) -> Self {
        let mut table: HashMap<String, String> = BUILTIN_CORRECTIONS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for (word, correction) in extra {
            table.insert(word.to_lowercase(), correction.clone());
        }
        Self { table }
    }

    pub fn builtin() -> Self {
        Self::new(&BTreeMap::new())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Correct `word`, keeping an initial capital. Unknown words come back
    /// unchanged.
    pub fn correct(&self, word: &str) -> Correction {
        match self.table.get(&word.to_lowercase()) {
            Some(correction) if starts_uppercase(word) => {
                Correction::from_suggestion(word, capitalize(correction))
            }
            Some(correction) => Correction::from_suggestion(word, correction.clone()),
            None => Correction::unchanged(word),
        }
    }
}

impl Default for LocalDictionary {
    fn default() -> Self {
        Self::builtin()
    }
}

fn starts_uppercase(word: &str) -> bool {
    word.chars().next().map(char::is_uppercase).unwrap_or(false)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_misspellings() {
        let dict = LocalDictionary::builtin();
        assert_eq!(dict.correct("qe"), Correction::new("que", true));
        assert_eq!(dict.correct("kiero"), Correction::new("quiero", true));
        assert_eq!(dict.correct("tanbien"), Correction::new("también", true));
    }

    #[test]
    fn test_case_preserved_on_first_letter() {
        let dict = LocalDictionary::builtin();
        assert_eq!(dict.correct("Kiero"), Correction::new("Quiero", true));
        assert_eq!(dict.correct("QE"), Correction::new("Que", true));
        assert_eq!(dict.correct("Ahi"), Correction::new("Ahí", true));
    }

    #[test]
    fn test_unknown_word_unchanged() {
        let dict = LocalDictionary::builtin();
        assert_eq!(dict.correct("casa"), Correction::unchanged("casa"));
        assert_eq!(dict.correct(""), Correction::unchanged(""));
    }

    #[test]
    fn test_extra_corrections_override_builtin() {
        let mut extra = BTreeMap::new();
        extra.insert("Ke".to_string(), "que".to_string());
        extra.insert("qe".to_string(), "qué".to_string());
        let dict = LocalDictionary::new(&extra);

        assert_eq!(dict.correct("ke"), Correction::new("que", true));
        assert_eq!(dict.correct("qe"), Correction::new("qué", true));
        assert_eq!(dict.len(), LocalDictionary::builtin().len() + 1);
    }
}
