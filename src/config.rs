//! Environment-driven configuration.
//!
//! Every knob reads from a `FORAGE_*` variable with a working default, so
//! the crate starts with zero configuration against the compiled-in
//! development catalog. A `.env` file is honored when present.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::cache::{CacheConfig, MemoryStore, ResponseCache};
use crate::classify::{ClassifierConfig, HttpRemoteClassifier, KeywordSets, QueryClassifier};
use crate::context::{ContextConfig, SessionContextStore};
use crate::error::{ConfigError, Result};
use crate::model_router::{ModelRouter, ModelRouterConfig, ModelTier};
use crate::pipeline::{AnswerPipeline, PipelineConfig};
use crate::providers::{ProviderCatalog, ProviderRouter, ProviderRouterConfig};

/// Connection settings for the layer-2 remote classifier.
#[derive(Debug, Clone)]
pub struct RemoteClassifierConfig {
    /// Endpoint URL. Unset leaves the layer off.
    pub url: Option<String>,
    pub timeout: Duration,
}

impl RemoteClassifierConfig {
    fn from_env() -> std::result::Result<Self, ConfigError> {
        let url = optional_env("FORAGE_CLASSIFIER_URL")?;
        if let Some(raw) = &url {
            Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
                key: "FORAGE_CLASSIFIER_URL".to_string(),
                message: format!("not a valid URL: {e}"),
            })?;
        }
        let timeout_ms: u64 = parse_optional_env("FORAGE_CLASSIFIER_TIMEOUT_MS", 2_000)?;
        Ok(Self {
            url,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Main configuration, assembled from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace tag for cache keys and log fields.
    pub domain: String,
    pub classifier: ClassifierConfig,
    pub remote: RemoteClassifierConfig,
    pub context: ContextConfig,
    pub model_routing: ModelRouterConfig,
    pub provider_routing: ProviderRouterConfig,
    pub cache: CacheConfig,
    pub cache_max_entries: usize,
    pub pipeline: PipelineConfig,
    /// Keyword lists override. Unset uses the built-in bilingual lists.
    pub keywords_path: Option<PathBuf>,
    /// Provider catalog override. Unset uses the development catalog.
    pub providers_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let domain = optional_env("FORAGE_DOMAIN")?.unwrap_or_else(|| "nutrition".to_string());

        // One kill switch covers both routers; with it off every query
        // takes the default tier and the default provider.
        let routing_enabled = optional_env("FORAGE_ROUTING_ENABLED")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "FORAGE_ROUTING_ENABLED".to_string(),
                message: format!("must be 'true' or 'false': {e}"),
            })?
            .unwrap_or(true);

        let classifier = ClassifierConfig {
            margin_threshold: parse_optional_env("FORAGE_CONFIDENCE_THRESHOLD", 2)?,
            remote_confidence: parse_optional_env("FORAGE_REMOTE_CONFIDENCE", 0.75_f32)?,
        };

        let remote = RemoteClassifierConfig::from_env()?;

        let context = ContextConfig {
            session_ttl: Duration::from_secs(parse_optional_env(
                "FORAGE_SESSION_TTL_SECS",
                1_800,
            )?),
            ..ContextConfig::default()
        };

        let ab_test_ratio: f64 = parse_optional_env("FORAGE_AB_TEST_RATIO", 0.5)?;
        if !(0.0..=1.0).contains(&ab_test_ratio) {
            return Err(ConfigError::InvalidValue {
                key: "FORAGE_AB_TEST_RATIO".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }
        let model_routing = ModelRouterConfig {
            enabled: routing_enabled,
            ab_test_ratio,
            default_tier: parse_optional_env("FORAGE_DEFAULT_TIER", ModelTier::Accurate)?,
        };

        let high_confidence_threshold: f32 =
            parse_optional_env("FORAGE_HIGH_CONFIDENCE_THRESHOLD", 0.9)?;
        if !(0.0..=1.0).contains(&high_confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "FORAGE_HIGH_CONFIDENCE_THRESHOLD".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }
        let provider_routing = ProviderRouterConfig {
            enabled: routing_enabled,
            high_confidence_threshold,
            min_synthesis_docs: parse_optional_env("FORAGE_MIN_SYNTHESIS_DOCS", 2)?,
        };

        let cache_enabled = optional_env("FORAGE_CACHE_ENABLED")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "FORAGE_CACHE_ENABLED".to_string(),
                message: format!("must be 'true' or 'false': {e}"),
            })?
            .unwrap_or(true);
        let cache = CacheConfig {
            domain: domain.clone(),
            ttl: Duration::from_secs(parse_optional_env("FORAGE_CACHE_TTL_SECS", 3_600)?),
            enabled: cache_enabled,
        };
        let cache_max_entries = parse_optional_env("FORAGE_CACHE_MAX_ENTRIES", 4_096)?;

        let top_k: usize = parse_optional_env("FORAGE_TOP_K", 4)?;
        if top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FORAGE_TOP_K".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let pipeline = PipelineConfig { top_k };

        let keywords_path = optional_env("FORAGE_KEYWORDS_PATH")?.map(PathBuf::from);
        let providers_path = optional_env("FORAGE_PROVIDERS_PATH")?.map(PathBuf::from);

        Ok(Self {
            domain,
            classifier,
            remote,
            context,
            model_routing,
            provider_routing,
            cache,
            cache_max_entries,
            pipeline,
            keywords_path,
            providers_path,
        })
    }

    /// Keyword sets from the configured path, or the built-in lists.
    pub fn load_keywords(&self) -> std::result::Result<KeywordSets, ConfigError> {
        match &self.keywords_path {
            Some(path) => KeywordSets::from_toml_file(path),
            None => Ok(KeywordSets::built_in()),
        }
    }

    /// Provider catalog from the configured path, or the compiled-in
    /// development catalog.
    pub fn load_catalog(&self) -> Result<ProviderCatalog> {
        match &self.providers_path {
            Some(path) => ProviderCatalog::from_toml_file(path),
            None => ProviderCatalog::dev_defaults(),
        }
    }

    /// Wire a complete [`AnswerPipeline`] from this configuration.
    ///
    /// Retrieval sources are not part of the environment; attach them to
    /// the returned pipeline with its `with_*` methods.
    pub fn build_pipeline(&self) -> Result<AnswerPipeline> {
        let mut classifier = QueryClassifier::new(self.load_keywords()?, self.classifier.clone());
        if let Some(url) = &self.remote.url {
            let remote = HttpRemoteClassifier::new(url.clone(), self.remote.timeout).map_err(
                |e| ConfigError::InvalidValue {
                    key: "FORAGE_CLASSIFIER_URL".to_string(),
                    message: format!("failed to build remote classifier: {e}"),
                },
            )?;
            classifier = classifier.with_remote(Arc::new(remote));
        }

        let catalog = self.load_catalog()?;
        let providers = ProviderRouter::new(catalog, self.provider_routing.clone());

        let store = Arc::new(MemoryStore::new(self.cache_max_entries));
        let cache = ResponseCache::new(store, self.cache.clone());

        Ok(AnswerPipeline::new(classifier, providers)
            .with_model_router(ModelRouter::new(self.model_routing.clone()))
            .with_context(SessionContextStore::new(self.context.clone()))
            .with_cache(cache)
            .with_config(self.pipeline.clone()))
    }
}

// Helper functions

pub(crate) fn optional_env(key: &str) -> std::result::Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}

pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> std::result::Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global, so serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const FORAGE_KEYS: &[&str] = &[
        "FORAGE_DOMAIN",
        "FORAGE_ROUTING_ENABLED",
        "FORAGE_CONFIDENCE_THRESHOLD",
        "FORAGE_REMOTE_CONFIDENCE",
        "FORAGE_CLASSIFIER_URL",
        "FORAGE_CLASSIFIER_TIMEOUT_MS",
        "FORAGE_SESSION_TTL_SECS",
        "FORAGE_AB_TEST_RATIO",
        "FORAGE_DEFAULT_TIER",
        "FORAGE_HIGH_CONFIDENCE_THRESHOLD",
        "FORAGE_MIN_SYNTHESIS_DOCS",
        "FORAGE_CACHE_ENABLED",
        "FORAGE_CACHE_TTL_SECS",
        "FORAGE_CACHE_MAX_ENTRIES",
        "FORAGE_TOP_K",
        "FORAGE_KEYWORDS_PATH",
        "FORAGE_PROVIDERS_PATH",
    ];

    fn clear_forage_env() {
        for key in FORAGE_KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn defaults_cover_every_field() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_forage_env();

        let config = Config::from_env().unwrap();
        assert_eq!(config.domain, "nutrition");
        assert_eq!(config.classifier.margin_threshold, 2);
        assert_eq!(config.classifier.remote_confidence, 0.75);
        assert_eq!(config.remote.url, None);
        assert_eq!(config.remote.timeout, Duration::from_millis(2_000));
        assert_eq!(config.context.session_ttl, Duration::from_secs(1_800));
        assert!(config.model_routing.enabled);
        assert_eq!(config.model_routing.ab_test_ratio, 0.5);
        assert_eq!(config.model_routing.default_tier, ModelTier::Accurate);
        assert!(config.provider_routing.enabled);
        assert_eq!(config.provider_routing.high_confidence_threshold, 0.9);
        assert_eq!(config.provider_routing.min_synthesis_docs, 2);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.domain, "nutrition");
        assert_eq!(config.cache.ttl, Duration::from_secs(3_600));
        assert_eq!(config.cache_max_entries, 4_096);
        assert_eq!(config.pipeline.top_k, 4);
        assert_eq!(config.keywords_path, None);
        assert_eq!(config.providers_path, None);
    }

    #[test]
    fn env_overrides_apply() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_forage_env();
        unsafe {
            std::env::set_var("FORAGE_DOMAIN", "hydration");
            std::env::set_var("FORAGE_ROUTING_ENABLED", "false");
            std::env::set_var("FORAGE_AB_TEST_RATIO", "0.25");
            std::env::set_var("FORAGE_DEFAULT_TIER", "fast");
            std::env::set_var("FORAGE_CACHE_ENABLED", "false");
            std::env::set_var("FORAGE_CACHE_TTL_SECS", "60");
            std::env::set_var("FORAGE_TOP_K", "8");
            std::env::set_var("FORAGE_MIN_SYNTHESIS_DOCS", "3");
            std::env::set_var("FORAGE_CLASSIFIER_URL", "http://localhost:9009/classify");
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.domain, "hydration");
        assert_eq!(config.cache.domain, "hydration");
        assert!(!config.model_routing.enabled);
        assert!(!config.provider_routing.enabled);
        assert_eq!(config.model_routing.ab_test_ratio, 0.25);
        assert_eq!(config.model_routing.default_tier, ModelTier::Fast);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.pipeline.top_k, 8);
        assert_eq!(config.provider_routing.min_synthesis_docs, 3);
        assert_eq!(
            config.remote.url.as_deref(),
            Some("http://localhost:9009/classify")
        );

        clear_forage_env();
    }

    #[test]
    fn rejects_out_of_range_ratio() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_forage_env();
        unsafe { std::env::set_var("FORAGE_AB_TEST_RATIO", "1.5") };

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }), "{err}");
        assert!(err.to_string().contains("FORAGE_AB_TEST_RATIO"), "{err}");

        clear_forage_env();
    }

    #[test]
    fn rejects_malformed_boolean() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_forage_env();
        unsafe { std::env::set_var("FORAGE_CACHE_ENABLED", "yes") };

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("FORAGE_CACHE_ENABLED"), "{err}");

        clear_forage_env();
    }

    #[test]
    fn rejects_bad_classifier_url() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_forage_env();
        unsafe { std::env::set_var("FORAGE_CLASSIFIER_URL", "not a url") };

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("FORAGE_CLASSIFIER_URL"), "{err}");

        clear_forage_env();
    }

    #[test]
    fn rejects_unknown_tier() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_forage_env();
        unsafe { std::env::set_var("FORAGE_DEFAULT_TIER", "turbo") };

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }), "{err}");

        clear_forage_env();
    }

    #[test]
    fn rejects_zero_top_k() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_forage_env();
        unsafe { std::env::set_var("FORAGE_TOP_K", "0") };

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("FORAGE_TOP_K"), "{err}");

        clear_forage_env();
    }

    // --- helper tests ---

    #[test]
    fn optional_env_returns_none_for_missing_var() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { std::env::remove_var("_FORAGE_TEST_MISSING") };
        assert_eq!(optional_env("_FORAGE_TEST_MISSING").unwrap(), None);
    }

    #[test]
    fn optional_env_treats_empty_as_unset() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { std::env::set_var("_FORAGE_TEST_EMPTY", "") };
        assert_eq!(optional_env("_FORAGE_TEST_EMPTY").unwrap(), None);
        unsafe { std::env::remove_var("_FORAGE_TEST_EMPTY") };
    }

    #[test]
    fn parse_optional_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { std::env::remove_var("_FORAGE_TEST_PARSE_MISSING") };
        let value: u64 = parse_optional_env("_FORAGE_TEST_PARSE_MISSING", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn parse_optional_env_reports_bad_values() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { std::env::set_var("_FORAGE_TEST_PARSE_BAD", "not_a_number") };
        let result: std::result::Result<u64, _> = parse_optional_env("_FORAGE_TEST_PARSE_BAD", 0);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        unsafe { std::env::remove_var("_FORAGE_TEST_PARSE_BAD") };
    }
}
