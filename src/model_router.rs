//! Model tier selection with deterministic A/B bucketing.
//!
//! Simple queries go to the fast tier and complex queries to the accurate
//! tier outright. Medium queries are split by a stable hash bucket so an
//! experiment can compare tiers on real traffic without storing any
//! per-query state: the same text always lands in the same bucket.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::complexity::Complexity;
use crate::error::ConfigError;

/// Which class of model should generate the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Cheap, low-latency model for lookups and short answers.
    Fast,
    /// Premium model for synthesis and reasoning.
    Accurate,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Accurate => "accurate",
        }
    }
}

impl FromStr for ModelTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(ModelTier::Fast),
            "accurate" => Ok(ModelTier::Accurate),
            other => Err(ConfigError::InvalidValue {
                key: "tier".to_string(),
                message: format!("unknown model tier '{other}' (expected: fast, accurate)"),
            }),
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a tier was chosen, kept for provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// The complexity grade decided outright.
    ComplexityRule,
    /// A medium query fell into a hash bucket.
    AbBucket,
    /// Routing is disabled, the configured default tier was used.
    RoutingDisabled,
}

impl SelectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMethod::ComplexityRule => "complexity_rule",
            SelectionMethod::AbBucket => "ab_bucket",
            SelectionMethod::RoutingDisabled => "routing_disabled",
        }
    }
}

/// The outcome of tier selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub tier: ModelTier,
    pub method: SelectionMethod,
}

/// Configuration for tier selection.
#[derive(Debug, Clone)]
pub struct ModelRouterConfig {
    /// When false, every query uses `default_tier`.
    pub enabled: bool,
    /// Fraction of medium queries sent to the fast tier, in `[0, 1]`.
    pub ab_test_ratio: f64,
    /// Tier used when routing is disabled.
    pub default_tier: ModelTier,
}

impl Default for ModelRouterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ab_test_ratio: 0.5,
            default_tier: ModelTier::Accurate,
        }
    }
}

/// Atomic counters for tier observability.
struct TierStats {
    fast_calls: AtomicU64,
    accurate_calls: AtomicU64,
    fast_latency_ms: AtomicU64,
    accurate_latency_ms: AtomicU64,
}

impl TierStats {
    fn new() -> Self {
        Self {
            fast_calls: AtomicU64::new(0),
            accurate_calls: AtomicU64::new(0),
            fast_latency_ms: AtomicU64::new(0),
            accurate_latency_ms: AtomicU64::new(0),
        }
    }
}

/// Snapshot of tier statistics for external consumption.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRouterSnapshot {
    pub fast_calls: u64,
    pub accurate_calls: u64,
    pub fast_avg_latency_ms: f64,
    pub accurate_avg_latency_ms: f64,
    pub avg_latency_ms: f64,
    /// Estimated latency saved versus sending every query to the accurate
    /// tier, as a percentage. Negative when the fast tier is slower.
    pub improvement_pct: f64,
}

/// Deterministic A/B bucket for a query in `[0, 1)`.
///
/// SHA-256 of the trimmed, lowercased text; the first 8 digest bytes read
/// as a big-endian integer and scaled down to the unit interval. The same
/// text always lands in the same bucket, so repeated queries see a
/// consistent tier for the lifetime of an experiment.
pub fn ab_bucket(text: &str) -> f64 {
    let digest = Sha256::digest(text.trim().to_lowercase().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    // Keep the top 53 bits so the quotient is exact and strictly below 1.0.
    let value = u64::from_be_bytes(prefix) >> 11;
    value as f64 / (1u64 << 53) as f64
}

/// Picks a model tier per query and tracks how each tier performs.
pub struct ModelRouter {
    config: ModelRouterConfig,
    stats: TierStats,
}

impl ModelRouter {
    pub fn new(config: ModelRouterConfig) -> Self {
        Self {
            config,
            stats: TierStats::new(),
        }
    }

    /// Choose a tier for a query given its complexity grade.
    pub fn select(&self, complexity: Complexity, text: &str) -> ModelSelection {
        if !self.config.enabled {
            let selection = ModelSelection {
                tier: self.config.default_tier,
                method: SelectionMethod::RoutingDisabled,
            };
            tracing::debug!(tier = %selection.tier, "model routing disabled, using default tier");
            return selection;
        }

        let selection = match complexity {
            Complexity::Simple => ModelSelection {
                tier: ModelTier::Fast,
                method: SelectionMethod::ComplexityRule,
            },
            Complexity::Complex => ModelSelection {
                tier: ModelTier::Accurate,
                method: SelectionMethod::ComplexityRule,
            },
            Complexity::Medium => {
                let bucket = ab_bucket(text);
                let tier = if bucket < self.config.ab_test_ratio {
                    ModelTier::Fast
                } else {
                    ModelTier::Accurate
                };
                tracing::debug!(
                    bucket,
                    ratio = self.config.ab_test_ratio,
                    tier = %tier,
                    "medium query assigned by bucket"
                );
                ModelSelection {
                    tier,
                    method: SelectionMethod::AbBucket,
                }
            }
        };

        tracing::debug!(
            complexity = %complexity,
            tier = %selection.tier,
            method = selection.method.as_str(),
            "selected model tier"
        );
        selection
    }

    /// Record the observed generation latency for a tier.
    pub fn record(&self, tier: ModelTier, latency: Duration) {
        let millis = latency.as_millis() as u64;
        match tier {
            ModelTier::Fast => {
                self.stats.fast_calls.fetch_add(1, Ordering::Relaxed);
                self.stats.fast_latency_ms.fetch_add(millis, Ordering::Relaxed);
            }
            ModelTier::Accurate => {
                self.stats.accurate_calls.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .accurate_latency_ms
                    .fetch_add(millis, Ordering::Relaxed);
            }
        }
    }

    /// Get a snapshot of tier statistics.
    pub fn stats(&self) -> ModelRouterSnapshot {
        let fast_calls = self.stats.fast_calls.load(Ordering::Relaxed);
        let accurate_calls = self.stats.accurate_calls.load(Ordering::Relaxed);
        let fast_ms = self.stats.fast_latency_ms.load(Ordering::Relaxed);
        let accurate_ms = self.stats.accurate_latency_ms.load(Ordering::Relaxed);

        let total_calls = fast_calls + accurate_calls;
        let fast_avg = average(fast_ms, fast_calls);
        let accurate_avg = average(accurate_ms, accurate_calls);
        let avg = average(fast_ms + accurate_ms, total_calls);

        // Baseline: every call served at the accurate tier's average latency.
        let improvement_pct = if total_calls > 0 && accurate_avg > 0.0 {
            let baseline = accurate_avg * total_calls as f64;
            let actual = (fast_ms + accurate_ms) as f64;
            (baseline - actual) / baseline * 100.0
        } else {
            0.0
        };

        ModelRouterSnapshot {
            fast_calls,
            accurate_calls,
            fast_avg_latency_ms: fast_avg,
            accurate_avg_latency_ms: accurate_avg,
            avg_latency_ms: avg,
            improvement_pct,
        }
    }
}

fn average(total_ms: u64, calls: u64) -> f64 {
    if calls == 0 {
        0.0
    } else {
        total_ms as f64 / calls as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(config: ModelRouterConfig) -> ModelRouter {
        ModelRouter::new(config)
    }

    #[test]
    fn bucket_is_deterministic() {
        let a = ab_bucket("how much iron in lentils?");
        let b = ab_bucket("how much iron in lentils?");
        assert_eq!(a, b);
    }

    #[test]
    fn bucket_ignores_case_and_outer_whitespace() {
        let a = ab_bucket("  How Much Iron In Lentils?  ");
        let b = ab_bucket("how much iron in lentils?");
        assert_eq!(a, b);
    }

    #[test]
    fn bucket_stays_in_unit_interval() {
        for i in 0..200 {
            let bucket = ab_bucket(&format!("query number {i}"));
            assert!((0.0..1.0).contains(&bucket), "bucket {bucket} out of range");
        }
    }

    #[test]
    fn buckets_spread_across_queries() {
        let below: usize = (0..200)
            .filter(|i| ab_bucket(&format!("query number {i}")) < 0.5)
            .count();
        // A uniform hash puts roughly half below the midpoint.
        assert!((50..=150).contains(&below), "skewed bucket split: {below}/200");
    }

    #[test]
    fn simple_selects_fast_tier() {
        let selection = router(ModelRouterConfig::default()).select(Complexity::Simple, "hi");
        assert_eq!(selection.tier, ModelTier::Fast);
        assert_eq!(selection.method, SelectionMethod::ComplexityRule);
    }

    #[test]
    fn complex_selects_accurate_tier() {
        let selection =
            router(ModelRouterConfig::default()).select(Complexity::Complex, "lentils vs cheese");
        assert_eq!(selection.tier, ModelTier::Accurate);
        assert_eq!(selection.method, SelectionMethod::ComplexityRule);
    }

    #[test]
    fn medium_honors_ratio_extremes() {
        let text = "something about oats and breakfast habits";

        let all_fast = router(ModelRouterConfig {
            ab_test_ratio: 1.0,
            ..ModelRouterConfig::default()
        })
        .select(Complexity::Medium, text);
        assert_eq!(all_fast.tier, ModelTier::Fast);
        assert_eq!(all_fast.method, SelectionMethod::AbBucket);

        let all_accurate = router(ModelRouterConfig {
            ab_test_ratio: 0.0,
            ..ModelRouterConfig::default()
        })
        .select(Complexity::Medium, text);
        assert_eq!(all_accurate.tier, ModelTier::Accurate);
        assert_eq!(all_accurate.method, SelectionMethod::AbBucket);
    }

    #[test]
    fn medium_assignment_is_stable_across_calls() {
        let r = router(ModelRouterConfig::default());
        let first = r.select(Complexity::Medium, "something about oats");
        let second = r.select(Complexity::Medium, "something about oats");
        assert_eq!(first.tier, second.tier);
    }

    #[test]
    fn disabled_routing_uses_default_tier() {
        let r = router(ModelRouterConfig {
            enabled: false,
            default_tier: ModelTier::Fast,
            ..ModelRouterConfig::default()
        });
        let selection = r.select(Complexity::Complex, "lentils vs cheese");
        assert_eq!(selection.tier, ModelTier::Fast);
        assert_eq!(selection.method, SelectionMethod::RoutingDisabled);
    }

    #[test]
    fn fresh_snapshot_is_zeroed() {
        let stats = router(ModelRouterConfig::default()).stats();
        assert_eq!(stats.fast_calls, 0);
        assert_eq!(stats.accurate_calls, 0);
        assert_eq!(stats.avg_latency_ms, 0.0);
        assert_eq!(stats.improvement_pct, 0.0);
    }

    #[test]
    fn snapshot_reports_latency_improvement() {
        let r = router(ModelRouterConfig::default());
        r.record(ModelTier::Fast, Duration::from_millis(100));
        r.record(ModelTier::Accurate, Duration::from_millis(300));

        let stats = r.stats();
        assert_eq!(stats.fast_calls, 1);
        assert_eq!(stats.accurate_calls, 1);
        assert_eq!(stats.fast_avg_latency_ms, 100.0);
        assert_eq!(stats.accurate_avg_latency_ms, 300.0);
        assert_eq!(stats.avg_latency_ms, 200.0);
        // Baseline 600 ms for two accurate calls, actual 400 ms.
        assert!((stats.improvement_pct - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn tier_parses_from_config_strings() {
        assert_eq!(ModelTier::from_str("fast").unwrap(), ModelTier::Fast);
        assert_eq!(ModelTier::from_str(" Accurate ").unwrap(), ModelTier::Accurate);
        assert!(ModelTier::from_str("turbo").is_err());
    }
}
