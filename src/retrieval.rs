//! Retrieval collaborator interfaces.
//!
//! The decision core does not own a database or a vector index; it
//! consumes them through these traits. Both sources degrade to an empty
//! result on error so a collaborator outage never kills a request, it
//! only removes evidence from the prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;
use crate::extract::ResolvedEntities;

/// Where a retrieved document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Structured,
    Semantic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Structured => "structured",
            SourceKind::Semantic => "semantic",
        }
    }
}

/// A fact row from the structured store.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    /// Human-readable statement of the fact.
    pub text: String,
    /// The figure itself, e.g. "3.3 mg".
    pub value: String,
    /// Match confidence reported by the store, in `[0, 1]`.
    pub confidence: f32,
}

/// A scored document from the semantic index.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub text: String,
    /// Similarity score reported by the index, in `[0, 1]`.
    pub score: f32,
    /// Origin label, e.g. a source document name.
    pub provenance: Option<String>,
}

/// A document normalized for prompting, whatever its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub text: String,
    pub score: f32,
    pub source: SourceKind,
}

impl RetrievedDoc {
    pub fn from_fact(row: FactRow) -> Self {
        Self {
            text: row.text,
            score: row.confidence,
            source: SourceKind::Structured,
        }
    }

    pub fn from_scored(doc: ScoredDoc) -> Self {
        Self {
            text: doc.text,
            score: doc.score,
            source: SourceKind::Semantic,
        }
    }
}

/// Structured nutrition facts store.
#[async_trait]
pub trait StructuredSource: Send + Sync {
    /// Look up fact rows matching the resolved entities.
    async fn lookup(&self, entities: &ResolvedEntities) -> Result<Vec<FactRow>, RetrievalError>;
}

/// Semantic document index.
#[async_trait]
pub trait SemanticSource: Send + Sync {
    /// Search for the `top_k` documents closest to the query text.
    async fn search(&self, text: &str, top_k: usize) -> Result<Vec<ScoredDoc>, RetrievalError>;
}

/// Look up facts, degrading an error to no results.
pub async fn lookup_degraded(
    source: &dyn StructuredSource,
    entities: &ResolvedEntities,
) -> Vec<RetrievedDoc> {
    match source.lookup(entities).await {
        Ok(rows) => rows.into_iter().map(RetrievedDoc::from_fact).collect(),
        Err(err) => {
            tracing::warn!(error = %err, "structured lookup failed, continuing without facts");
            Vec::new()
        }
    }
}

/// Search documents, degrading an error to no results.
pub async fn search_degraded(
    source: &dyn SemanticSource,
    text: &str,
    top_k: usize,
) -> Vec<RetrievedDoc> {
    match source.search(text, top_k).await {
        Ok(docs) => docs.into_iter().map(RetrievedDoc::from_scored).collect(),
        Err(err) => {
            tracing::warn!(error = %err, "semantic search failed, continuing without documents");
            Vec::new()
        }
    }
}

/// Order documents best-first. Ties keep their given order.
pub fn rank_by_score(docs: &mut [RetrievedDoc]) {
    docs.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedFacts(Vec<FactRow>);

    #[async_trait]
    impl StructuredSource for FixedFacts {
        async fn lookup(
            &self,
            _entities: &ResolvedEntities,
        ) -> Result<Vec<FactRow>, RetrievalError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenFacts;

    #[async_trait]
    impl StructuredSource for BrokenFacts {
        async fn lookup(
            &self,
            _entities: &ResolvedEntities,
        ) -> Result<Vec<FactRow>, RetrievalError> {
            Err(RetrievalError::Lookup {
                reason: "connection refused".to_string(),
            })
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl SemanticSource for BrokenIndex {
        async fn search(
            &self,
            _text: &str,
            _top_k: usize,
        ) -> Result<Vec<ScoredDoc>, RetrievalError> {
            Err(RetrievalError::Search {
                reason: "index rebuilding".to_string(),
            })
        }
    }

    fn fact(text: &str, confidence: f32) -> FactRow {
        FactRow {
            text: text.to_string(),
            value: "3.3 mg".to_string(),
            confidence,
        }
    }

    #[tokio::test]
    async fn facts_map_to_structured_docs() {
        let source = FixedFacts(vec![fact("Lentils: 3.3 mg iron per 100 g", 0.95)]);
        let docs = lookup_degraded(&source, &ResolvedEntities::default()).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, SourceKind::Structured);
        assert_eq!(docs[0].score, 0.95);
    }

    #[tokio::test]
    async fn broken_structured_source_degrades_to_empty() {
        let docs = lookup_degraded(&BrokenFacts, &ResolvedEntities::default()).await;
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn broken_semantic_source_degrades_to_empty() {
        let docs = search_degraded(&BrokenIndex, "iron in lentils", 4).await;
        assert!(docs.is_empty());
    }

    #[test]
    fn ranking_puts_best_first() {
        let mut docs = vec![
            RetrievedDoc::from_scored(ScoredDoc {
                text: "low".to_string(),
                score: 0.2,
                provenance: None,
            }),
            RetrievedDoc::from_fact(fact("high", 0.95)),
            RetrievedDoc::from_scored(ScoredDoc {
                text: "mid".to_string(),
                score: 0.6,
                provenance: None,
            }),
        ];
        rank_by_score(&mut docs);
        assert_eq!(docs[0].text, "high");
        assert_eq!(docs[2].text, "low");
    }
}
