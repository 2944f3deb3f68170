//! Answer generation providers.
//!
//! A closed set of HTTP provider clients behind the [`GenerationProvider`]
//! trait, a cost-ordered [`ProviderCatalog`] built from configuration, and
//! a [`ProviderRouter`] that picks an entry per request and falls back to
//! the default on failure.

pub mod anthropic;
pub mod catalog;
pub mod openai_compatible;
pub mod provider;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use catalog::{ProviderCatalog, ProviderEntry, ProviderKind};
pub use openai_compatible::OpenAiCompatibleProvider;
pub use provider::{
    ChatMessage, FinishReason, GenerationProvider, GenerationRequest, GenerationResponse,
    ProviderSettings, Role, TokenUsage,
};
pub use router::{
    ProviderRouter, ProviderRouterConfig, ProviderSelection, ProviderUsage, SelectionReason,
    UsageSnapshot,
};
