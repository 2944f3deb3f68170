//! Provider catalog loaded from configuration.
//!
//! The catalog holds every configured generation provider sorted by cost
//! and exposes the three roles the router selects between: the cheapest
//! entry, the mid-cost entry, and the configured default. With fewer than
//! three entries the roles collapse onto what exists, so a single-provider
//! catalog still routes everything somewhere sensible.

use std::path::Path;
use std::sync::Arc;

use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::providers::provider::{GenerationProvider, ProviderSettings};

/// Wire dialect a catalog entry speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiCompatible,
    Anthropic,
}

/// One provider entry as written in the catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    /// Unique id, referenced in logs and usage accounting.
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key. Optional for
    /// OpenAI-compatible endpoints, required for Anthropic.
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub input_cost_per_token: Decimal,
    pub output_cost_per_token: Decimal,
    /// Marks the entry the router falls back to. At most one.
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    providers: Vec<ProviderEntry>,
}

/// Cost-ordered set of generation providers.
pub struct ProviderCatalog {
    /// Sorted by combined per-token cost, ascending.
    providers: Vec<Arc<dyn GenerationProvider>>,
    default_index: usize,
}

impl ProviderCatalog {
    /// Load a catalog from a TOML file with `[[providers]]` tables.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let file: CatalogFile = toml::from_str(&raw).map_err(|e| {
            ConfigError::ParseError(format!("provider catalog {}: {e}", path.display()))
        })?;
        Self::from_entries(file.providers)
    }

    /// Catalog for local development and tests: three models behind one
    /// OpenAI-compatible endpoint, no API keys. Local inference is free,
    /// so the costs are synthetic and only encode the preference order.
    pub fn dev_defaults() -> Result<Self> {
        Self::from_entries(vec![
            ProviderEntry {
                id: "local-small".to_string(),
                kind: ProviderKind::OpenAiCompatible,
                base_url: "http://localhost:11434".to_string(),
                model: "llama3.2:1b".to_string(),
                api_key_env: None,
                input_cost_per_token: Decimal::new(1, 9),
                output_cost_per_token: Decimal::new(1, 9),
                default: false,
            },
            ProviderEntry {
                id: "local-medium".to_string(),
                kind: ProviderKind::OpenAiCompatible,
                base_url: "http://localhost:11434".to_string(),
                model: "llama3.2:3b".to_string(),
                api_key_env: None,
                input_cost_per_token: Decimal::new(2, 9),
                output_cost_per_token: Decimal::new(2, 9),
                default: false,
            },
            ProviderEntry {
                id: "local-large".to_string(),
                kind: ProviderKind::OpenAiCompatible,
                base_url: "http://localhost:11434".to_string(),
                model: "llama3.1:8b".to_string(),
                api_key_env: None,
                input_cost_per_token: Decimal::new(4, 9),
                output_cost_per_token: Decimal::new(4, 9),
                default: true,
            },
        ])
    }

    /// Build every entry and assemble the catalog.
    pub fn from_entries(entries: Vec<ProviderEntry>) -> Result<Self> {
        let mut providers: Vec<(Arc<dyn GenerationProvider>, bool)> =
            Vec::with_capacity(entries.len());
        for entry in entries {
            let api_key = resolve_api_key(&entry)?;
            let settings = ProviderSettings {
                id: entry.id.clone(),
                base_url: entry.base_url.clone(),
                model: entry.model.clone(),
                api_key,
                input_cost_per_token: entry.input_cost_per_token,
                output_cost_per_token: entry.output_cost_per_token,
            };
            let provider: Arc<dyn GenerationProvider> = match entry.kind {
                ProviderKind::OpenAiCompatible => Arc::new(OpenAiCompatibleProvider::new(settings)?),
                ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(settings)?),
            };
            providers.push((provider, entry.default));
        }
        Ok(Self::from_providers(providers)?)
    }

    /// Assemble a catalog from already-built providers.
    ///
    /// The sort is stable, so entries with equal cost keep their given
    /// order. Without an explicit default the most expensive entry takes
    /// the role.
    pub fn from_providers(
        mut providers: Vec<(Arc<dyn GenerationProvider>, bool)>,
    ) -> std::result::Result<Self, ConfigError> {
        if providers.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "providers".to_string(),
                message: "provider catalog has no entries".to_string(),
            });
        }

        for (index, (provider, _)) in providers.iter().enumerate() {
            let id = provider.id();
            if providers[..index].iter().any(|(p, _)| p.id() == id) {
                return Err(ConfigError::InvalidValue {
                    key: format!("providers.{id}"),
                    message: "duplicate provider id".to_string(),
                });
            }
        }

        if providers.iter().filter(|(_, default)| *default).count() > 1 {
            return Err(ConfigError::InvalidValue {
                key: "providers.default".to_string(),
                message: "more than one entry marked default".to_string(),
            });
        }

        providers.sort_by_key(|(provider, _)| combined_cost(provider.as_ref()));

        let default_index = providers
            .iter()
            .position(|(_, default)| *default)
            .unwrap_or(providers.len() - 1);

        Ok(Self {
            providers: providers.into_iter().map(|(p, _)| p).collect(),
            default_index,
        })
    }

    /// Lowest-cost provider.
    pub fn cheapest(&self) -> &Arc<dyn GenerationProvider> {
        &self.providers[0]
    }

    /// Median-cost provider.
    pub fn mid(&self) -> &Arc<dyn GenerationProvider> {
        &self.providers[self.providers.len() / 2]
    }

    /// The provider the router falls back to.
    pub fn default_provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.providers[self.default_index]
    }

    pub fn by_id(&self, id: &str) -> Option<&Arc<dyn GenerationProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Catalog ids in cost order, for logs.
    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }
}

impl std::fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCatalog")
            .field("providers", &self.ids())
            .field("default_index", &self.default_index)
            .finish()
    }
}

fn combined_cost(provider: &dyn GenerationProvider) -> Decimal {
    let (input, output) = provider.cost_per_token();
    input + output
}

fn resolve_api_key(entry: &ProviderEntry) -> std::result::Result<Option<SecretString>, ConfigError> {
    match &entry.api_key_env {
        Some(var) => match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(SecretString::from(value))),
            _ => Err(ConfigError::MissingRequired {
                key: var.clone(),
                hint: format!("Set the API key for provider '{}'", entry.id),
            }),
        },
        None if entry.kind == ProviderKind::Anthropic => Err(ConfigError::InvalidValue {
            key: format!("providers.{}.api_key_env", entry.id),
            message: "anthropic providers require an api_key_env".to_string(),
        }),
        None => Ok(None),
    }
}
