//! Core query types shared across the pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

/// Languages the service answers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
}

impl Language {
    /// Short tag used in cache keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "es" | "spanish" | "español" | "espanol" => Ok(Language::Es),
            other => Err(ConfigError::InvalidValue {
                key: "language".to_string(),
                message: format!("unknown language: {other}"),
            }),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifier for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One incoming user question.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub language: Language,
    pub session: SessionId,
    /// Zero-based turn index within the conversation.
    pub turn: u32,
}

impl Query {
    /// Create a query for the first turn of a session.
    pub fn new(text: impl Into<String>, language: Language, session: SessionId) -> Self {
        Self {
            text: text.into(),
            language,
            session,
            turn: 0,
        }
    }

    /// Set the turn index.
    pub fn with_turn(mut self, turn: u32) -> Self {
        self.turn = turn;
        self
    }
}

/// Lowercase and collapse runs of whitespace to single spaces.
///
/// Cache keys and keyword scans both run over this form so that
/// "How much  PROTEIN" and "how much protein" are the same query.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether the text contains at least one alphabetic character.
///
/// Queries without any are not classifiable by keyword scan ("100" or
/// "???" alone) and fall straight to the hybrid route.
pub fn has_alphabetic(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic())
}
