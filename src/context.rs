//! Session context: remembered entities and follow-up resolution.
//!
//! Each conversation keeps one [`ContextSnapshot`] with the entities
//! mentioned so far, the last raw query, and the last route decision.
//! Follow-ups like "what about iron?" or "¿y en lentejas?" are detected
//! by a fixed phrase list and expanded with the remembered entities
//! before classification, so downstream stages see a self-contained
//! question.
//!
//! The store is shared state behind a `std::sync::RwLock` and is safe to
//! call from any task; turns of the *same* session are expected to arrive
//! sequentially (the conversational surface serializes them).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::classify::RouteDecision;
use crate::extract::{EntityExtractor, ResolvedEntities};
use crate::query::{SessionId, normalize};

/// Phrases that mark a query as a continuation of the previous turn.
/// All entries are in normalized (lowercase, single-space) form.
const COREFERENCE_PHRASES: &[&str] = &[
    "what about",
    "how about",
    "and for",
    "and in",
    "and the",
    "same for",
    "what of",
    "y en",
    "y para",
    "y de",
    "y las",
    "y los",
    "qué tal",
    "que tal",
    "también en",
    "tambien en",
    "igual para",
];

/// Tuning knobs for the context store.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Idle time after which a session's snapshot is treated as absent.
    pub session_ttl: Duration,
    /// Maximum whitespace tokens for a query to count as a follow-up.
    pub coreference_max_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(1800),
            coreference_max_tokens: 6,
        }
    }
}

/// Accumulated state of one conversation.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub entities: ResolvedEntities,
    pub last_query: String,
    pub last_decision: Option<RouteDecision>,
    pub updated_at: DateTime<Utc>,
}

/// Session-keyed store of context snapshots.
pub struct SessionContextStore {
    extractor: EntityExtractor,
    sessions: RwLock<HashMap<SessionId, ContextSnapshot>>,
    config: ContextConfig,
}

impl SessionContextStore {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            extractor: EntityExtractor::new(),
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether `text` reads as a continuation of the previous turn.
    ///
    /// Purely textual: a phrase hit plus a token cap. Does not consult
    /// the stored snapshot, so callers can use it before deciding whether
    /// context exists at all.
    pub fn is_coreference(&self, text: &str) -> bool {
        let text = normalize(text);
        if text.is_empty() {
            return false;
        }
        if text.split_whitespace().count() > self.config.coreference_max_tokens {
            return false;
        }
        COREFERENCE_PHRASES.iter().any(|p| text.contains(p))
    }

    /// Current snapshot for a session, if one exists and is not expired.
    pub fn snapshot(&self, session: SessionId) -> Option<ContextSnapshot> {
        {
            let guard = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            match guard.get(&session) {
                Some(snap) if self.is_fresh(snap) => return Some(snap.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: evict under the write lock and report absent.
        let mut guard = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(snap) = guard.get(&session)
            && !self.is_fresh(snap)
        {
            guard.remove(&session);
        }
        None
    }

    /// Rewrite a follow-up query so it stands on its own.
    ///
    /// If `text` is a coreference and the session has remembered entities
    /// the text does not already mention, those canonical values are
    /// appended. Anything else passes through unchanged.
    pub fn expand(&self, session: SessionId, text: &str) -> String {
        if !self.is_coreference(text) {
            return text.to_string();
        }
        let Some(snap) = self.snapshot(session) else {
            return text.to_string();
        };

        let mentioned = self.extractor.extract(text);
        let mut missing: Vec<&str> = Vec::new();
        for ((_, have), (_, remembered)) in mentioned
            .field_pairs()
            .iter()
            .zip(snap.entities.field_pairs().iter())
        {
            if have.is_none()
                && let Some(value) = *remembered
            {
                missing.push(value);
            }
        }
        if missing.is_empty() {
            return text.to_string();
        }

        let expanded = format!("{} {}", text.trim(), missing.join(" "));
        tracing::debug!(
            session = %session,
            added = ?missing,
            "expanded follow-up with remembered entities"
        );
        expanded
    }

    /// Record a completed turn: merge newly mentioned entities over the
    /// remembered ones and store the query and its route decision.
    pub fn update(&self, session: SessionId, text: &str, decision: &RouteDecision) {
        let mentioned = self.extractor.extract(text);
        let now = Utc::now();

        let mut guard = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        // Drop expired snapshots while we hold the lock anyway.
        guard.retain(|_, snap| self.is_fresh(snap));

        let snap = guard.entry(session).or_insert_with(|| ContextSnapshot {
            entities: ResolvedEntities::default(),
            last_query: String::new(),
            last_decision: None,
            updated_at: now,
        });
        snap.entities.merge_from(&mentioned);
        snap.last_query = text.to_string();
        snap.last_decision = Some(*decision);
        snap.updated_at = now;
    }

    /// Forget a session entirely.
    pub fn reset(&self, session: SessionId) {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session);
    }

    /// Number of live (possibly expired, not yet evicted) sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, snap: &ContextSnapshot) -> bool {
        let age = Utc::now().signed_duration_since(snap.updated_at);
        // A negative age means clock skew; treat it as fresh.
        age.to_std()
            .map(|d| d < self.config.session_ttl)
            .unwrap_or(true)
    }
}

impl Default for SessionContextStore {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{DecisionLayer, QueryIntent, RouteDecision, RouteType};

    fn decision(route: RouteType) -> RouteDecision {
        RouteDecision {
            route,
            confidence: 0.9,
            layer: DecisionLayer::Keywords,
            intent: QueryIntent::Direct,
        }
    }

    #[test]
    fn detects_coreference_phrases_in_both_languages() {
        let store = SessionContextStore::default();
        assert!(store.is_coreference("what about iron?"));
        assert!(store.is_coreference("¿y en las lentejas?"));
        assert!(store.is_coreference("qué tal el queso"));
        assert!(!store.is_coreference("how much protein is in lentils"));
        assert!(!store.is_coreference(""));
    }

    #[test]
    fn long_queries_are_not_coreferences() {
        let store = SessionContextStore::default();
        // Carries "what about" but reads as a full question.
        assert!(!store.is_coreference(
            "what about the difference in protein between raw and cooked lentils per serving"
        ));
    }

    #[test]
    fn expand_appends_remembered_entities() {
        let store = SessionContextStore::default();
        let session = SessionId::new();
        store.update(
            session,
            "how much protein in 100 g of lentils",
            &decision(RouteType::Structured),
        );

        let expanded = store.expand(session, "what about iron?");
        assert!(expanded.contains("what about iron?"));
        assert!(expanded.contains("legumes"));
        assert!(expanded.contains("100 g"));
        // The new query names a nutrient, so the remembered one stays out.
        assert!(!expanded.contains("protein"));
    }

    #[test]
    fn expand_passes_through_without_context() {
        let store = SessionContextStore::default();
        let session = SessionId::new();
        assert_eq!(store.expand(session, "what about iron?"), "what about iron?");
        assert_eq!(
            store.expand(session, "protein in lentils"),
            "protein in lentils"
        );
    }

    #[test]
    fn update_merges_entities_across_turns() {
        let store = SessionContextStore::default();
        let session = SessionId::new();
        store.update(
            session,
            "protein in lentils",
            &decision(RouteType::Structured),
        );
        store.update(session, "and in 100 g of cheese", &decision(RouteType::Structured));

        let snap = store.snapshot(session).expect("snapshot should exist");
        assert_eq!(snap.entities.nutrient.as_deref(), Some("protein"));
        assert_eq!(snap.entities.food_group.as_deref(), Some("dairy"));
        assert_eq!(snap.entities.portion.as_deref(), Some("100 g"));
        assert_eq!(snap.last_query, "and in 100 g of cheese");
    }

    #[test]
    fn reset_forgets_the_session() {
        let store = SessionContextStore::default();
        let session = SessionId::new();
        store.update(session, "protein in lentils", &decision(RouteType::Structured));
        assert!(store.snapshot(session).is_some());

        store.reset(session);
        assert!(store.snapshot(session).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn expired_sessions_read_as_absent() {
        let store = SessionContextStore::new(ContextConfig {
            session_ttl: Duration::from_millis(1),
            ..ContextConfig::default()
        });
        let session = SessionId::new();
        store.update(session, "protein in lentils", &decision(RouteType::Structured));

        std::thread::sleep(Duration::from_millis(10));
        assert!(store.snapshot(session).is_none());
        // Expansion behaves as if the session never existed.
        assert_eq!(store.expand(session, "what about iron?"), "what about iron?");
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionContextStore::default();
        let a = SessionId::new();
        let b = SessionId::new();
        store.update(a, "protein in lentils", &decision(RouteType::Structured));

        assert!(store.snapshot(a).is_some());
        assert!(store.snapshot(b).is_none());
        assert_eq!(store.expand(b, "what about iron?"), "what about iron?");
    }
}
