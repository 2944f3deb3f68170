//! Complexity assessment for answer generation.
//!
//! A coarse three-way grade of how much reasoning the generator needs:
//! single fact, ordinary answer, or synthesis across several facts. The
//! grade drives model tier selection, so the rules err toward `Medium`
//! when in doubt and reserve `Simple` for queries a small model answers
//! reliably.

use serde::{Deserialize, Serialize};

use crate::classify::{QueryIntent, RouteDecision, RouteType};
use crate::extract::ResolvedEntities;
use crate::query::normalize;

/// Question words that open a direct factual question.
const INTERROGATIVES: &[&str] = &[
    "what", "how", "which", "when", "where", "who", "is", "are", "does", "do", "qué", "que",
    "cuánto", "cuanto", "cuánta", "cuanta", "cuántos", "cuantos", "cuántas", "cuantas", "cuál",
    "cual", "cuáles", "cuales", "es", "son", "tiene", "tienen",
];

/// Token count at or below which a direct question can grade `Simple`.
const MAX_SIMPLE_TOKENS: usize = 10;

/// How much reasoning the generated answer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Grade a query given its route decision and extracted entities.
pub fn assess(text: &str, decision: &RouteDecision, entities: &ResolvedEntities) -> Complexity {
    // Synthesis signals outrank everything else.
    if matches!(
        decision.intent,
        QueryIntent::Comparison | QueryIntent::Derived
    ) || entities.has_multiple_values()
    {
        return Complexity::Complex;
    }

    if decision.intent != QueryIntent::Direct {
        return Complexity::Medium;
    }

    // A structured lookup with the nutrient and portion pinned down is a
    // single table cell.
    if decision.route == RouteType::Structured
        && entities.nutrient.is_some()
        && entities.portion.is_some()
    {
        return Complexity::Simple;
    }

    // Short direct questions ("how much iron in lentils?").
    let normalized = normalize(text);
    let mut tokens = normalized.split_whitespace();
    let first = tokens.next().unwrap_or("").trim_start_matches(['¿', '¡']);
    let count = 1 + tokens.count();
    if count <= MAX_SIMPLE_TOKENS && INTERROGATIVES.contains(&first) {
        return Complexity::Simple;
    }

    Complexity::Medium
}
