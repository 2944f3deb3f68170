//! The answer pipeline, wiring every stage into one request path.
//!
//! Per query: resolve session context, classify, derive entities, consult
//! the cache, retrieve facts for the chosen route, score complexity, pick
//! a model tier and a provider, generate, then store the answer and update
//! the session. Every stage except generation degrades on failure; the
//! only error a caller sees is
//! [`Error::GenerationUnavailable`](crate::error::Error::GenerationUnavailable),
//! raised once the default provider has failed.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::cache::{CacheStats, CachedAnswer, ResponseCache};
use crate::classify::{QueryClassifier, RouteDecision, RouteType};
use crate::complexity::{self, Complexity};
use crate::context::SessionContextStore;
use crate::error::Result;
use crate::extract::{EntityExtractor, ResolvedEntities};
use crate::model_router::{ModelRouter, ModelRouterConfig, ModelRouterSnapshot, ModelSelection};
use crate::providers::{
    ChatMessage, GenerationRequest, ProviderRouter, SelectionReason, TokenUsage, UsageSnapshot,
};
use crate::query::{Language, Query, SessionId};
use crate::retrieval::{
    RetrievedDoc, SemanticSource, StructuredSource, lookup_degraded, rank_by_score, search_degraded,
};

/// Ceiling for generated answers. Nutrition answers are short; anything
/// longer is the model wandering.
const MAX_ANSWER_TOKENS: u32 = 512;

/// Pipeline-level knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Documents kept after ranking, and the semantic search depth.
    pub top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

/// Wall-clock cost of the pipeline stages, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageTimings {
    pub classify_ms: u64,
    pub retrieve_ms: u64,
    pub generate_ms: u64,
}

/// The provider the router picked for a request.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderChoice {
    pub id: String,
    pub reason: SelectionReason,
}

/// How an answer came to be. Attached to every [`Answer`].
///
/// `model` and `provider` are absent when the answer came out of the
/// cache; `usage` then reports what the answer cost when it was first
/// generated.
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub decision: RouteDecision,
    pub complexity: Option<Complexity>,
    pub model: Option<ModelSelection>,
    pub provider: Option<ProviderChoice>,
    pub cache_hit: bool,
    pub usage: TokenUsage,
    pub timings: StageTimings,
}

/// A finished answer plus the decisions behind it.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub provenance: Provenance,
}

/// End-to-end answer pipeline.
///
/// Built with a classifier and a provider router; the cache, the retrieval
/// sources, and a tuned model router attach through the `with_*` methods.
/// Without sources the pipeline still answers, the model just gets no
/// facts to ground on.
pub struct AnswerPipeline {
    classifier: QueryClassifier,
    providers: ProviderRouter,
    models: ModelRouter,
    context: SessionContextStore,
    extractor: EntityExtractor,
    cache: ResponseCache,
    structured: Option<Arc<dyn StructuredSource>>,
    semantic: Option<Arc<dyn SemanticSource>>,
    config: PipelineConfig,
}

impl AnswerPipeline {
    pub fn new(classifier: QueryClassifier, providers: ProviderRouter) -> Self {
        Self {
            classifier,
            providers,
            models: ModelRouter::new(ModelRouterConfig::default()),
            context: SessionContextStore::default(),
            extractor: EntityExtractor::new(),
            cache: ResponseCache::disabled(),
            structured: None,
            semantic: None,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_model_router(mut self, models: ModelRouter) -> Self {
        self.models = models;
        self
    }

    pub fn with_context(mut self, context: SessionContextStore) -> Self {
        self.context = context;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_structured_source(mut self, source: Arc<dyn StructuredSource>) -> Self {
        self.structured = Some(source);
        self
    }

    pub fn with_semantic_source(mut self, source: Arc<dyn SemanticSource>) -> Self {
        self.semantic = Some(source);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Answer one query.
    pub async fn answer(&self, query: &Query) -> Result<Answer> {
        let session = query.session;

        // Follow-up detection reads the raw text; expansion rewrites it so
        // every later stage sees a self-contained question.
        let is_followup = self.context.is_coreference(&query.text);
        let snapshot = self.context.snapshot(session);
        let expanded = self.context.expand(session, &query.text);

        let classify_start = Instant::now();
        let decision = self
            .classifier
            .classify(&expanded, snapshot.as_ref(), is_followup)
            .await;
        let classify_ms = classify_start.elapsed().as_millis() as u64;

        let mut entities = snapshot
            .map(|snap| snap.entities)
            .unwrap_or_default();
        entities.merge_from(&self.extractor.extract(&expanded));

        if let Some(cached) = self.cache.get(&expanded, &entities, query.language).await {
            // The turn still happened; remember it so follow-ups resolve.
            self.context.update(session, &expanded, &decision);
            tracing::info!(
                session = %session,
                route = decision.route.as_str(),
                cache_hit = true,
                "answered query from cache"
            );
            return Ok(Answer {
                text: cached.text,
                provenance: Provenance {
                    decision,
                    complexity: None,
                    model: None,
                    provider: None,
                    cache_hit: true,
                    usage: cached.usage,
                    timings: StageTimings {
                        classify_ms,
                        ..StageTimings::default()
                    },
                },
            });
        }

        let retrieve_start = Instant::now();
        let docs = self.retrieve(decision.route, &entities, &expanded).await;
        let retrieve_ms = retrieve_start.elapsed().as_millis() as u64;

        let complexity = complexity::assess(&expanded, &decision, &entities);
        let selection = self.models.select(complexity, &expanded);
        let choice = self.providers.route(&docs, &decision);

        let request = build_request(query.language, &expanded, &docs);
        let generate_start = Instant::now();
        let response = self.providers.generate(&choice, request).await?;
        let generate_elapsed = generate_start.elapsed();
        self.models.record(selection.tier, generate_elapsed);

        let cached = CachedAnswer {
            text: response.content.clone(),
            entities: entities.clone(),
            language: query.language,
            route: decision.route,
            created_at: Utc::now(),
            usage: response.usage,
        };
        self.cache.set(&expanded, &cached).await;
        self.context.update(session, &expanded, &decision);

        let provider_id = choice.provider.id().to_string();
        tracing::info!(
            session = %session,
            route = decision.route.as_str(),
            intent = ?decision.intent,
            complexity = complexity.as_str(),
            tier = selection.tier.as_str(),
            provider = %provider_id,
            docs = docs.len(),
            cache_hit = false,
            generate_ms = generate_elapsed.as_millis() as u64,
            "answered query"
        );

        Ok(Answer {
            text: response.content,
            provenance: Provenance {
                decision,
                complexity: Some(complexity),
                model: Some(selection),
                provider: Some(ProviderChoice {
                    id: provider_id,
                    reason: choice.reason,
                }),
                cache_hit: false,
                usage: response.usage,
                timings: StageTimings {
                    classify_ms,
                    retrieve_ms,
                    generate_ms: generate_elapsed.as_millis() as u64,
                },
            },
        })
    }

    /// Pull documents for the decided route, merging both sources on the
    /// hybrid route. Ranked best-first and truncated to `top_k`.
    async fn retrieve(
        &self,
        route: RouteType,
        entities: &ResolvedEntities,
        text: &str,
    ) -> Vec<RetrievedDoc> {
        let mut docs = Vec::new();

        if matches!(route, RouteType::Structured | RouteType::Hybrid)
            && let Some(source) = self.structured.as_ref()
        {
            docs.extend(lookup_degraded(source.as_ref(), entities).await);
        }
        if matches!(route, RouteType::Semantic | RouteType::Hybrid)
            && let Some(source) = self.semantic.as_ref()
        {
            docs.extend(search_degraded(source.as_ref(), text, self.config.top_k).await);
        }

        rank_by_score(&mut docs);
        docs.truncate(self.config.top_k);
        docs
    }

    /// Forget a session's remembered context.
    pub fn reset_session(&self, session: SessionId) {
        self.context.reset(session);
    }

    /// Drop cached answers, optionally narrowed to a domain or language.
    pub async fn clear_cache(&self, domain: Option<&str>, language: Option<Language>) -> u64 {
        self.cache.clear(domain, language).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn model_stats(&self) -> ModelRouterSnapshot {
        self.models.stats()
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.providers.usage()
    }
}

fn system_prompt(language: Language) -> &'static str {
    match language {
        Language::En => {
            "You are a nutrition assistant. Answer using the provided facts \
             when they cover the question, say clearly when they do not, and \
             keep answers short with amounts and units."
        }
        Language::Es => {
            "Eres un asistente de nutrición. Responde usando los datos \
             proporcionados cuando cubran la pregunta, indica claramente \
             cuando no lo hagan y sé breve citando cantidades con unidades."
        }
    }
}

fn context_block(docs: &[RetrievedDoc]) -> String {
    let lines: Vec<String> = docs
        .iter()
        .map(|doc| format!("- [{}] {}", doc.source.as_str(), doc.text))
        .collect();
    format!("Relevant facts:\n{}", lines.join("\n"))
}

/// Assemble the generation request: system prompt, retrieved facts when
/// there are any, then the user's (expanded) question.
fn build_request(language: Language, question: &str, docs: &[RetrievedDoc]) -> GenerationRequest {
    let mut messages = vec![ChatMessage::system(system_prompt(language))];
    if !docs.is_empty() {
        messages.push(ChatMessage::system(context_block(docs)));
    }
    messages.push(ChatMessage::user(question));
    GenerationRequest::new(messages).with_max_tokens(MAX_ANSWER_TOKENS)
}
