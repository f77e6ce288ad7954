//! Area name normalization.
//!
//! Municipality names arrive from the feed and from configuration as free
//! text: "Proença-a-Nova", "proenca a nova" and "PROENÇA A NOVA" all name the
//! same place. Everything that keys state by area goes through [`normalize`]
//! so those spellings collapse onto one canonical key (`"proencaanova"`).
//!
//! The pipeline is applied symmetrically to configuration, feed records and
//! keys read back from the state file:
//!
//! 1. Trim and lowercase
//! 2. Strip diacritics (NFD, drop combining marks, NFC)
//! 3. Hyphens and underscores become spaces
//! 4. Collapse whitespace, then remove it entirely

use std::collections::{BTreeMap, BTreeSet, HashMap};

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Alternate spellings per canonical key.
///
/// Entries are raw text; they are normalized on use so the table can be
/// written the way the names appear upstream.
const SYNONYMS: &[(&str, &[&str])] = &[
    (
        "proencaanova",
        &["proenca a nova", "proenca-anova", "proenca nova"],
    ),
    (
        "vilavelhaderodao",
        &["vila velha de rodao", "v v rodao", "vv rodao"],
    ),
    (
        "castanheiradepera",
        &["castanheira de pera", "castanheira pera"],
    ),
    ("pedrogaogrande", &["pedrogao grande", "pedrogao-grande"]),
];

/// Keys written by older releases whose accent folding dropped characters.
const LEGACY_KEYS: &[(&str, &str)] = &[
    ("sert", "serta"),
    ("figueirdosvinhos", "figueirodosvinhos"),
    ("proenaanova", "proencaanova"),
    ("vilavelhaderdo", "vilavelhaderodao"),
];

/// Removes diacritics, keeping base characters.
pub fn strip_accents(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
}

/// Case- and accent-insensitive form used for attribute comparisons.
///
/// Unlike [`normalize`], whitespace is preserved (only trimmed), so
/// "Em Curso" folds to "em curso".
pub fn fold(s: &str) -> String {
    strip_accents(&s.trim().to_lowercase())
}

/// Canonical area key for a raw municipality name.
///
/// Pure and idempotent. Empty input yields an empty key; callers decide
/// whether that is acceptable.
pub fn normalize(raw: &str) -> String {
    let folded = fold(raw).replace(['-', '_'], " ");
    folded.split_whitespace().collect()
}

/// Raw alternate spellings declared for a canonical key.
pub fn declared_synonyms(key: &str) -> &'static [&'static str] {
    SYNONYMS
        .iter()
        .find(|(canon, _)| *canon == key)
        .map(|(_, alts)| *alts)
        .unwrap_or(&[])
}

/// All keys an area name may appear under: its own key plus normalized synonyms.
pub fn expand(area_name: &str) -> BTreeSet<String> {
    let key = normalize(area_name);
    let mut keys: BTreeSet<String> = declared_synonyms(&key)
        .iter()
        .map(|alt| normalize(alt))
        .collect();
    keys.insert(key);
    keys
}

/// Maps a known historical misspelling onto its corrected key.
pub fn correct_legacy_key(key: &str) -> &str {
    LEGACY_KEYS
        .iter()
        .find(|(typo, _)| *typo == key)
        .map(|(_, fixed)| *fixed)
        .unwrap_or(key)
}

/// One configured area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantedArea {
    /// Canonical key
    pub key: String,
    /// Name as configured, used in messages
    pub display: String,
    /// Every key that resolves to this area, canonical key included
    pub aliases: BTreeSet<String>,
}

/// The set of areas being monitored, with the alias map derived from it.
///
/// Built once from configuration. Used by the filter to test membership,
/// by the change detector to resolve a record's area, and by the state
/// store to fold drifted keys onto their canonical form.
#[derive(Debug, Clone, Default)]
pub struct AreaSet {
    areas: BTreeMap<String, WantedArea>,
    alias_to_key: HashMap<String, String>,
}

impl AreaSet {
    /// Build from configured area names. Names normalizing to an empty key are ignored.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = AreaSet::default();
        for name in names {
            let name = name.as_ref().trim();
            let key = normalize(name);
            if key.is_empty() || set.areas.contains_key(&key) {
                continue;
            }
            let aliases = expand(name);
            for alias in &aliases {
                set.alias_to_key.insert(alias.clone(), key.clone());
            }
            set.areas.insert(
                key.clone(),
                WantedArea {
                    key,
                    display: name.to_string(),
                    aliases,
                },
            );
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    /// Whether a normalized key is a canonical key or alias of a wanted area.
    pub fn contains(&self, normalized: &str) -> bool {
        self.alias_to_key.contains_key(normalized)
    }

    /// Canonical key for a normalized key, if it belongs to a wanted area.
    pub fn resolve(&self, normalized: &str) -> Option<&str> {
        self.alias_to_key.get(normalized).map(String::as_str)
    }

    /// Folds a key read from an older state file onto its canonical form.
    ///
    /// Legacy typos are corrected first, then aliases are mapped. Keys that
    /// match neither are returned unchanged so unrelated history survives.
    pub fn canonicalize_key(&self, key: &str) -> String {
        let corrected = correct_legacy_key(key);
        self.resolve(corrected).unwrap_or(corrected).to_string()
    }

    /// Configured display name for a canonical key.
    pub fn display_name(&self, key: &str) -> Option<&str> {
        self.areas.get(key).map(|a| a.display.as_str())
    }

    /// Canonical keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.areas.keys().map(String::as_str)
    }

    /// Configured areas in canonical key order.
    pub fn areas(&self) -> impl Iterator<Item = &WantedArea> {
        self.areas.values()
    }

    /// Every key (canonical and alias) accepted by the area filter.
    pub fn all_keys(&self) -> impl Iterator<Item = &str> {
        self.alias_to_key.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_accents_case_and_spacing() {
        assert_eq!(normalize("Sertã"), "serta");
        assert_eq!(normalize("  Proença-a-Nova "), "proencaanova");
        assert_eq!(normalize("Vila   Velha de Ródão"), "vilavelhaderodao");
        assert_eq!(normalize("figueiró_dos_vinhos"), "figueirodosvinhos");
        assert_eq!(normalize("COVILHÃ"), "covilha");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("  - _ "), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "Sertã",
            "Idanha-a-Nova",
            "Pedrógão Grande",
            "  Ferreira do Zêzere  ",
            "İSTANBUL",
            "São João da Pesqueira",
            "a_b-c  d",
            "",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn test_fold_keeps_inner_spaces() {
        assert_eq!(fold(" Em Resolução "), "em resolucao");
        assert_eq!(fold("Conclusão"), "conclusao");
    }

    #[test]
    fn test_expand_includes_synonyms() {
        let keys = expand("Vila Velha de Ródão");
        assert!(keys.contains("vilavelhaderodao"));
        assert!(keys.contains("vvrodao"));
        assert_eq!(keys.len(), 2);

        let plain = expand("Oleiros");
        assert_eq!(plain.len(), 1);
        assert!(plain.contains("oleiros"));
    }

    #[test]
    fn test_synonyms_resolve_to_same_canonical_key() {
        for (canon, alts) in SYNONYMS {
            let set = AreaSet::new([*canon]);
            for alt in *alts {
                assert_eq!(
                    set.resolve(&normalize(alt)),
                    Some(*canon),
                    "{alt:?} should resolve to {canon:?}"
                );
            }
        }
    }

    #[test]
    fn test_area_set_resolves_aliases() {
        let set = AreaSet::new(["Sertã", "Proença-a-Nova", "Castanheira de Pera"]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.resolve("serta"), Some("serta"));
        assert_eq!(set.resolve("proencanova"), Some("proencaanova"));
        assert_eq!(set.resolve("castanheirapera"), Some("castanheiradepera"));
        assert_eq!(set.resolve("oleiros"), None);
        assert_eq!(set.display_name("proencaanova"), Some("Proença-a-Nova"));
    }

    #[test]
    fn test_area_set_ignores_blank_and_duplicate_names() {
        let set = AreaSet::new(["Sertã", "", "  ", "SERTA"]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.display_name("serta"), Some("Sertã"));
    }

    #[test]
    fn test_canonicalize_key_corrects_legacy_typos() {
        let set = AreaSet::new(["Sertã", "Vila Velha de Ródão"]);
        assert_eq!(set.canonicalize_key("sert"), "serta");
        assert_eq!(set.canonicalize_key("vilavelhaderdo"), "vilavelhaderodao");
        assert_eq!(set.canonicalize_key("vvrodao"), "vilavelhaderodao");
        assert_eq!(set.canonicalize_key("lisboa"), "lisboa");
    }
}
