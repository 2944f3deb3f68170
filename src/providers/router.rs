//! Cost-aware provider selection with bounded fallback.
//!
//! Selection prefers cheaper providers whenever the retrieved evidence
//! says the generation task is easy: a high-confidence structured fact is
//! a phrasing exercise, multi-document synthesis needs a mid-cost model,
//! and anything uncertain goes to the configured default. A failing
//! non-default provider gets exactly one retry against the default; a
//! failing default propagates so errors never turn into retry storms.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::classify::RouteDecision;
use crate::error::{Error, Result};
use crate::providers::catalog::ProviderCatalog;
use crate::providers::provider::{
    GenerationProvider, GenerationRequest, GenerationResponse, TokenUsage,
};
use crate::retrieval::{RetrievedDoc, SourceKind};

/// Why a provider was selected, kept for provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// Top document is a high-confidence structured fact.
    HighConfidenceFact,
    /// Several documents retrieved, at least one semantic.
    MultiDocSynthesis,
    /// The query intent needs comparison or derivation.
    AnalyticalIntent,
    /// No cheaper rule matched.
    DefaultRoute,
    /// Routing is disabled, the default provider was used.
    RoutingDisabled,
}

impl SelectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionReason::HighConfidenceFact => "high_confidence_fact",
            SelectionReason::MultiDocSynthesis => "multi_doc_synthesis",
            SelectionReason::AnalyticalIntent => "analytical_intent",
            SelectionReason::DefaultRoute => "default_route",
            SelectionReason::RoutingDisabled => "routing_disabled",
        }
    }
}

/// The outcome of provider selection.
#[derive(Clone)]
pub struct ProviderSelection {
    pub provider: Arc<dyn GenerationProvider>,
    pub reason: SelectionReason,
}

/// Configuration for provider selection.
#[derive(Debug, Clone)]
pub struct ProviderRouterConfig {
    /// When false, every request uses the default provider.
    pub enabled: bool,
    /// Structured-fact confidence above which the cheapest provider is
    /// trusted with the answer.
    pub high_confidence_threshold: f32,
    /// Document count at which an answer counts as synthesis.
    pub min_synthesis_docs: usize,
}

impl Default for ProviderRouterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            high_confidence_threshold: 0.9,
            min_synthesis_docs: 2,
        }
    }
}

#[derive(Default)]
struct UsageCounters {
    calls: u64,
    input_tokens: u64,
    output_tokens: u64,
    cost: Decimal,
    saved: Decimal,
}

/// Per-provider usage totals.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderUsage {
    pub id: String,
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
    /// Cost avoided versus sending the same tokens to the default
    /// provider. Zero for the default itself.
    pub saved: Decimal,
}

/// Snapshot of usage accounting across the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    /// Sorted by provider id.
    pub providers: Vec<ProviderUsage>,
    pub total_cost: Decimal,
    pub total_saved: Decimal,
}

/// Routes generation requests across the provider catalog.
pub struct ProviderRouter {
    catalog: ProviderCatalog,
    config: ProviderRouterConfig,
    usage: Mutex<HashMap<String, UsageCounters>>,
}

impl ProviderRouter {
    pub fn new(catalog: ProviderCatalog, config: ProviderRouterConfig) -> Self {
        Self {
            catalog,
            config,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Pick a provider for ranked documents and a route decision.
    /// First match wins.
    pub fn route(&self, docs: &[RetrievedDoc], decision: &RouteDecision) -> ProviderSelection {
        let (provider, reason) = if !self.config.enabled {
            (
                self.catalog.default_provider(),
                SelectionReason::RoutingDisabled,
            )
        } else if let Some(top) = docs.first()
            && top.source == SourceKind::Structured
            && top.score > self.config.high_confidence_threshold
        {
            (self.catalog.cheapest(), SelectionReason::HighConfidenceFact)
        } else if docs.len() >= self.config.min_synthesis_docs
            && docs.iter().any(|d| d.source == SourceKind::Semantic)
        {
            (self.catalog.mid(), SelectionReason::MultiDocSynthesis)
        } else if decision.intent.is_analytical() {
            (self.catalog.mid(), SelectionReason::AnalyticalIntent)
        } else {
            (self.catalog.default_provider(), SelectionReason::DefaultRoute)
        };

        tracing::debug!(
            provider = provider.id(),
            reason = reason.as_str(),
            docs = docs.len(),
            "selected generation provider"
        );
        ProviderSelection {
            provider: Arc::clone(provider),
            reason,
        }
    }

    /// Generate with the selected provider, retrying once on the default
    /// when a non-default provider fails. Exhausted attempts surface as
    /// [`Error::GenerationUnavailable`].
    pub async fn generate(
        &self,
        selection: &ProviderSelection,
        request: GenerationRequest,
    ) -> Result<GenerationResponse> {
        let primary = &selection.provider;
        let default = Arc::clone(self.catalog.default_provider());

        if primary.id() == default.id() {
            return match primary.generate(request).await {
                Ok(response) => {
                    self.record(primary.as_ref(), &response.usage);
                    Ok(response)
                }
                Err(err) => {
                    tracing::error!(provider = primary.id(), error = %err, "default provider failed");
                    Err(Error::GenerationUnavailable {
                        reason: format!("default provider '{}' failed ({err})", primary.id()),
                    })
                }
            };
        }

        match primary.generate(request.clone()).await {
            Ok(response) => {
                self.record(primary.as_ref(), &response.usage);
                Ok(response)
            }
            Err(err) => {
                tracing::warn!(
                    provider = primary.id(),
                    fallback = default.id(),
                    error = %err,
                    "provider failed, retrying on default"
                );
                match default.generate(request).await {
                    Ok(response) => {
                        self.record(default.as_ref(), &response.usage);
                        Ok(response)
                    }
                    Err(second) => Err(Error::GenerationUnavailable {
                        reason: format!(
                            "provider '{}' failed ({err}), default '{}' failed ({second})",
                            primary.id(),
                            default.id()
                        ),
                    }),
                }
            }
        }
    }

    fn record(&self, provider: &dyn GenerationProvider, usage: &TokenUsage) {
        let cost = provider.calculate_cost(usage);
        let baseline = self.catalog.default_provider().calculate_cost(usage);
        let saved = (baseline - cost).max(Decimal::ZERO);

        let mut guard = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let counters = guard.entry(provider.id().to_string()).or_default();
        counters.calls += 1;
        counters.input_tokens += u64::from(usage.input_tokens);
        counters.output_tokens += u64::from(usage.output_tokens);
        counters.cost += cost;
        counters.saved += saved;
    }

    /// Get a snapshot of usage accounting.
    pub fn usage(&self) -> UsageSnapshot {
        let guard = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let mut providers: Vec<ProviderUsage> = guard
            .iter()
            .map(|(id, counters)| ProviderUsage {
                id: id.clone(),
                calls: counters.calls,
                input_tokens: counters.input_tokens,
                output_tokens: counters.output_tokens,
                cost: counters.cost,
                saved: counters.saved,
            })
            .collect();
        drop(guard);

        providers.sort_by(|a, b| a.id.cmp(&b.id));
        let total_cost = providers.iter().map(|p| p.cost).sum();
        let total_saved = providers.iter().map(|p| p.saved).sum();
        UsageSnapshot {
            providers,
            total_cost,
            total_saved,
        }
    }
}
