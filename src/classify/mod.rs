//! Query classification: which answer path serves a query.
//!
//! Three layers, cheapest first:
//!
//! 1. **Context**: a detected follow-up reuses the previous turn's route.
//! 2. **Keywords**: disjoint structured/semantic keyword sets are counted
//!    and the margin between them decides locally when it is wide enough.
//! 3. **Remote**: inconclusive queries go to an external labeling service
//!    with a hard timeout; any failure falls open to the hybrid route.
//!
//! Classification never returns an error. The worst outcome for a query is
//! the hybrid route at low confidence.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::ContextSnapshot;
use crate::error::ConfigError;
use crate::query::{has_alphabetic, normalize};

pub mod keywords;
pub mod remote;

pub use keywords::{KeywordScore, KeywordSets};
pub use remote::{HttpRemoteClassifier, RemoteClassifier};

/// Confidence for a keyword decision at the minimum margin.
const KEYWORD_CONFIDENCE_BASE: f32 = 0.6;
/// Added per keyword of net margin.
const KEYWORD_CONFIDENCE_STEP: f32 = 0.1;
/// Keyword confidence never exceeds this.
const KEYWORD_CONFIDENCE_CAP: f32 = 0.95;
/// Confidence when an unclassifiable query defaults to hybrid.
const EMPTY_QUERY_CONFIDENCE: f32 = 0.5;
/// Confidence when layer 2 is unavailable or fails.
const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Which answer path serves a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    /// Numeric lookup against the food-composition table.
    Structured,
    /// Retrieval over dietary guidance documents.
    Semantic,
    /// Both sources, merged by the generator.
    Hybrid,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::Structured => "structured",
            RouteType::Semantic => "semantic",
            RouteType::Hybrid => "hybrid",
        }
    }
}

impl std::str::FromStr for RouteType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "structured" => Ok(RouteType::Structured),
            "semantic" => Ok(RouteType::Semantic),
            "hybrid" => Ok(RouteType::Hybrid),
            other => Err(ConfigError::InvalidValue {
                key: "route".to_string(),
                message: format!("unknown route type: {other}"),
            }),
        }
    }
}

impl std::fmt::Display for RouteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What shape of answer the query asks for, beyond its route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    /// A single fact or explanation.
    Direct,
    /// Two or more things set against each other.
    Comparison,
    /// Asks about change over time.
    Temporal,
    /// Needs arithmetic over several facts (totals, averages, intakes).
    Derived,
}

impl QueryIntent {
    /// Intents that require synthesis rather than a single lookup.
    pub fn is_analytical(&self) -> bool {
        !matches!(self, QueryIntent::Direct)
    }
}

/// Which layer produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionLayer {
    Context,
    Keywords,
    Remote,
    Fallback,
}

impl DecisionLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionLayer::Context => "context",
            DecisionLayer::Keywords => "keywords",
            DecisionLayer::Remote => "remote",
            DecisionLayer::Fallback => "fallback",
        }
    }
}

/// The classifier's verdict for one query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: RouteType,
    /// How sure the deciding layer was, in `[0, 1]`.
    pub confidence: f32,
    pub layer: DecisionLayer,
    pub intent: QueryIntent,
}

/// Knobs for the layered classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Minimum net keyword margin for a local decision.
    pub margin_threshold: usize,
    /// Confidence assigned to remote labels.
    pub remote_confidence: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            margin_threshold: 2,
            remote_confidence: 0.75,
        }
    }
}

/// Three-layer query classifier.
pub struct QueryClassifier {
    keywords: KeywordSets,
    remote: Option<Arc<dyn RemoteClassifier>>,
    config: ClassifierConfig,
}

impl QueryClassifier {
    pub fn new(keywords: KeywordSets, config: ClassifierConfig) -> Self {
        Self {
            keywords,
            remote: None,
            config,
        }
    }

    /// Attach the layer-2 remote classifier.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteClassifier>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Classify an (already expanded) query.
    ///
    /// `is_followup` says whether the raw text read as a continuation of
    /// the previous turn; together with a snapshot that recorded a prior
    /// decision it short-circuits to that decision.
    pub async fn classify(
        &self,
        text: &str,
        snapshot: Option<&ContextSnapshot>,
        is_followup: bool,
    ) -> RouteDecision {
        let normalized = normalize(text);

        // Unclassifiable input defaults to hybrid rather than erroring.
        if normalized.is_empty() || !has_alphabetic(&normalized) {
            tracing::debug!(query = %normalized, "query has no classifiable text, using hybrid");
            return RouteDecision {
                route: RouteType::Hybrid,
                confidence: EMPTY_QUERY_CONFIDENCE,
                layer: DecisionLayer::Fallback,
                intent: QueryIntent::Direct,
            };
        }

        let intent = self.keywords.intent_of(&normalized);

        // Layer 0: a follow-up stays on the previous turn's route.
        if is_followup
            && let Some(prev) = snapshot.and_then(|s| s.last_decision)
        {
            tracing::debug!(
                route = %prev.route,
                "follow-up query, reusing previous route"
            );
            return RouteDecision {
                route: prev.route,
                confidence: prev.confidence,
                layer: DecisionLayer::Context,
                intent,
            };
        }

        // Layer 1: keyword margin.
        let score = self.keywords.score(&normalized);
        let net = score.structured as i64 - score.semantic as i64;
        if net.unsigned_abs() as usize >= self.config.margin_threshold {
            let route = if net > 0 {
                RouteType::Structured
            } else {
                RouteType::Semantic
            };
            let confidence = (KEYWORD_CONFIDENCE_BASE
                + KEYWORD_CONFIDENCE_STEP * net.unsigned_abs() as f32)
                .min(KEYWORD_CONFIDENCE_CAP);
            tracing::debug!(
                structured_hits = score.structured,
                semantic_hits = score.semantic,
                route = %route,
                confidence,
                "keyword margin decided the route"
            );
            return RouteDecision {
                route,
                confidence,
                layer: DecisionLayer::Keywords,
                intent,
            };
        }

        // Ties and narrow margins are inconclusive, including exact
        // nonzero ties. Fall through to layer 2.
        tracing::debug!(
            structured_hits = score.structured,
            semantic_hits = score.semantic,
            threshold = self.config.margin_threshold,
            "keyword scan inconclusive"
        );

        match &self.remote {
            Some(remote) => match remote.classify(&normalized).await {
                Ok(route) => {
                    tracing::debug!(route = %route, "remote classifier labeled the query");
                    RouteDecision {
                        route,
                        confidence: self.config.remote_confidence,
                        layer: DecisionLayer::Remote,
                        intent,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "remote classifier failed, using hybrid");
                    RouteDecision {
                        route: RouteType::Hybrid,
                        confidence: FALLBACK_CONFIDENCE,
                        layer: DecisionLayer::Fallback,
                        intent,
                    }
                }
            },
            None => {
                tracing::debug!("no remote classifier configured, using hybrid");
                RouteDecision {
                    route: RouteType::Hybrid,
                    confidence: FALLBACK_CONFIDENCE,
                    layer: DecisionLayer::Fallback,
                    intent,
                }
            }
        }
    }
}
