//! Keyword vocabulary for layer-1 classification and intent detection.
//!
//! Two disjoint keyword sets drive the local route decision: the
//! structured set holds numeric/metric vocabulary ("how much", "grams",
//! "cuánto") and the semantic set holds descriptive/condition vocabulary
//! ("benefits", "why", "síntomas"). Three smaller pattern lists mark the
//! query intent (comparison, temporal, derived calculation).
//!
//! The vocabulary is loaded once at startup: built-in defaults, optionally
//! replaced section by section from a TOML file. It is immutable afterward.

use std::collections::HashSet;
use std::path::Path;

use aho_corasick::AhoCorasick;
use serde::Deserialize;

use crate::classify::QueryIntent;
use crate::error::ConfigError;
use crate::extract::is_word_bounded;
use crate::query::normalize;

const STRUCTURED_DEFAULTS: &[&str] = &[
    "how much",
    "how many",
    "amount",
    "grams",
    "gram",
    "milligrams",
    "calories",
    "kcal",
    "content",
    "contains",
    "per 100",
    "per serving",
    "quantity",
    "nutritional value",
    "cuánto",
    "cuanto",
    "cuánta",
    "cuanta",
    "cuántos",
    "cuantos",
    "cuántas",
    "cuantas",
    "gramos",
    "miligramos",
    "calorías",
    "calorias",
    "contenido",
    "contiene",
    "por 100",
    "por porción",
    "por porcion",
    "cantidad",
    "valor nutricional",
];

const SEMANTIC_DEFAULTS: &[&str] = &[
    "why",
    "benefit",
    "benefits",
    "good for",
    "bad for",
    "healthy",
    "recommended",
    "recommendation",
    "advice",
    "should i",
    "symptoms",
    "deficiency",
    "important",
    "risk",
    "risks",
    "effect",
    "effects",
    "pregnancy",
    "diet",
    "por qué",
    "por que",
    "beneficio",
    "beneficios",
    "bueno para",
    "malo para",
    "saludable",
    "recomendado",
    "recomendación",
    "recomendacion",
    "consejo",
    "síntomas",
    "sintomas",
    "deficiencia",
    "importante",
    "riesgo",
    "riesgos",
    "efecto",
    "efectos",
    "embarazo",
    "dieta",
];

const COMPARISON_DEFAULTS: &[&str] = &[
    "vs",
    "versus",
    "compare",
    "compared to",
    "comparison",
    "difference between",
    "more than",
    "less than",
    "higher than",
    "lower than",
    "which has more",
    "which has less",
    "or",
    "frente a",
    "comparar",
    "comparado con",
    "comparada con",
    "diferencia entre",
    "más que",
    "mas que",
    "menos que",
    "cuál tiene más",
    "cual tiene mas",
    "o",
];

const TEMPORAL_DEFAULTS: &[&str] = &[
    "used to",
    "historically",
    "in the past",
    "previously",
    "nowadays",
    "these days",
    "antiguamente",
    "históricamente",
    "historicamente",
    "en el pasado",
    "hoy en día",
    "hoy en dia",
    "solía",
    "solia",
];

const DERIVED_DEFAULTS: &[&str] = &[
    "total",
    "in total",
    "combined",
    "sum",
    "altogether",
    "average",
    "daily average",
    "per day",
    "per week",
    "requirement",
    "requirements",
    "daily intake",
    "how much do i need",
    "en total",
    "combinado",
    "suma",
    "promedio",
    "al día",
    "al dia",
    "por semana",
    "requerimiento",
    "ingesta diaria",
    "cuánto necesito",
    "cuanto necesito",
];

/// On-disk vocabulary override. Empty or missing sections keep the
/// built-in defaults for that section.
#[derive(Debug, Deserialize)]
struct VocabularyFile {
    #[serde(default)]
    structured: Vec<String>,
    #[serde(default)]
    semantic: Vec<String>,
    #[serde(default)]
    comparison: Vec<String>,
    #[serde(default)]
    temporal: Vec<String>,
    #[serde(default)]
    derived: Vec<String>,
}

/// Keyword hit counts for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordScore {
    pub structured: usize,
    pub semantic: usize,
}

/// Immutable, compiled keyword vocabulary.
#[derive(Debug)]
pub struct KeywordSets {
    structured_ac: AhoCorasick,
    semantic_ac: AhoCorasick,
    comparison_ac: AhoCorasick,
    temporal_ac: AhoCorasick,
    derived_ac: AhoCorasick,
}

impl KeywordSets {
    /// The compiled-in EN/ES vocabulary.
    pub fn built_in() -> Self {
        Self::from_lists(
            to_owned(STRUCTURED_DEFAULTS),
            to_owned(SEMANTIC_DEFAULTS),
            to_owned(COMPARISON_DEFAULTS),
            to_owned(TEMPORAL_DEFAULTS),
            to_owned(DERIVED_DEFAULTS),
        )
        .expect("built-in vocabulary must be valid")
    }

    /// Load the vocabulary from a TOML file, falling back to the built-in
    /// defaults for any section the file leaves empty.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let file: VocabularyFile = toml::from_str(&raw).map_err(|e| {
            ConfigError::ParseError(format!("invalid vocabulary file {}: {e}", path.display()))
        })?;

        let or_default = |list: Vec<String>, defaults: &[&str]| {
            if list.is_empty() {
                to_owned(defaults)
            } else {
                list
            }
        };

        Self::from_lists(
            or_default(file.structured, STRUCTURED_DEFAULTS),
            or_default(file.semantic, SEMANTIC_DEFAULTS),
            or_default(file.comparison, COMPARISON_DEFAULTS),
            or_default(file.temporal, TEMPORAL_DEFAULTS),
            or_default(file.derived, DERIVED_DEFAULTS),
        )
    }

    /// Build the vocabulary from explicit lists.
    ///
    /// Entries are normalized (lowercased, whitespace collapsed) before
    /// compilation. The structured and semantic sets must be disjoint;
    /// a shared entry would make every margin ambiguous.
    pub fn from_lists(
        structured: Vec<String>,
        semantic: Vec<String>,
        comparison: Vec<String>,
        temporal: Vec<String>,
        derived: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let structured = clean(structured);
        let semantic = clean(semantic);
        let comparison = clean(comparison);
        let temporal = clean(temporal);
        let derived = clean(derived);

        let structured_set: HashSet<&str> = structured.iter().map(String::as_str).collect();
        let overlap: Vec<&str> = semantic
            .iter()
            .map(String::as_str)
            .filter(|k| structured_set.contains(k))
            .collect();
        if !overlap.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "keywords".to_string(),
                message: format!(
                    "structured and semantic sets must be disjoint, shared: {}",
                    overlap.join(", ")
                ),
            });
        }

        Ok(Self {
            structured_ac: compile(&structured)?,
            semantic_ac: compile(&semantic)?,
            comparison_ac: compile(&comparison)?,
            temporal_ac: compile(&temporal)?,
            derived_ac: compile(&derived)?,
        })
    }

    /// Count structured and semantic keyword occurrences in the query.
    pub fn score(&self, text: &str) -> KeywordScore {
        let text = normalize(text);
        KeywordScore {
            structured: self.structured_ac.find_iter(&text).count(),
            semantic: self.semantic_ac.find_iter(&text).count(),
        }
    }

    /// Derive the query intent from its pattern hits.
    ///
    /// Checked in precedence order: comparison, temporal, derived. Short
    /// connectors ("or", "o", "vs") only count as whole words.
    pub fn intent_of(&self, text: &str) -> QueryIntent {
        let text = normalize(text);
        if has_bounded_match(&self.comparison_ac, &text) {
            QueryIntent::Comparison
        } else if has_bounded_match(&self.temporal_ac, &text) {
            QueryIntent::Temporal
        } else if has_bounded_match(&self.derived_ac, &text) {
            QueryIntent::Derived
        } else {
            QueryIntent::Direct
        }
    }
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self::built_in()
    }
}

fn to_owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn clean(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|s| normalize(&s))
        .filter(|s| !s.is_empty())
        .collect()
}

fn compile(patterns: &[String]) -> Result<AhoCorasick, ConfigError> {
    AhoCorasick::new(patterns).map_err(|e| ConfigError::InvalidValue {
        key: "keywords".to_string(),
        message: format!("failed to compile keyword patterns: {e}"),
    })
}

fn has_bounded_match(ac: &AhoCorasick, text: &str) -> bool {
    ac.find_iter(text)
        .any(|m| is_word_bounded(text, m.start(), m.end()))
}
