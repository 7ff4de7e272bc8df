use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Weights, thresholds and windows of the risk heuristics.
/// Defaults reproduce the production rule set exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Global switch. When off, every analysis scores 0 with no reasons.
    pub enabled: bool,

    pub large_amount_threshold: f64,
    pub large_amount_weight: f64,
    pub very_large_amount_threshold: f64,
    pub very_large_amount_weight: f64,

    /// Local hours strictly below `unusual_hour_before` or strictly above
    /// `unusual_hour_after` are unusual.
    pub unusual_hour_before: u32,
    pub unusual_hour_after: u32,
    pub unusual_hour_weight: f64,

    pub velocity_window_minutes: i64,
    pub velocity_limit: i64,
    pub velocity_weight: f64,

    /// Matched case-insensitively as substrings, first match wins.
    pub suspicious_keywords: Vec<String>,
    pub keyword_weight: f64,

    pub average_window_days: i64,
    pub average_multiplier: f64,
    pub average_weight: f64,

    pub duplicate_window_hours: i64,
    pub duplicate_limit: i64,
    pub duplicate_weight: f64,

    /// Deadline for each historical query. A query past it is skipped.
    pub query_timeout_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            large_amount_threshold: 10_000.0,
            large_amount_weight: 0.3,
            very_large_amount_threshold: 50_000.0,
            very_large_amount_weight: 0.2,
            unusual_hour_before: 6,
            unusual_hour_after: 23,
            unusual_hour_weight: 0.2,
            velocity_window_minutes: 60,
            velocity_limit: 5,
            velocity_weight: 0.3,
            suspicious_keywords: default_keywords(),
            keyword_weight: 0.4,
            average_window_days: 30,
            average_multiplier: 3.0,
            average_weight: 0.3,
            duplicate_window_hours: 24,
            duplicate_limit: 2,
            duplicate_weight: 0.2,
            query_timeout_ms: 250,
        }
    }
}

fn default_keywords() -> Vec<String> {
    [
        "крипто", "биткоин", "эфир", "crypto", "bitcoin", "ethereum",
        "казино", "casino", "ставки", "bet", "gambling",
        "лотерея", "lottery", "приз", "prize",
        "инвестиции", "investment", "трейдинг", "trading",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl RiskConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    fn weights(&self) -> [(&'static str, f64); 7] {
        [
            ("large_amount_weight", self.large_amount_weight),
            ("very_large_amount_weight", self.very_large_amount_weight),
            ("unusual_hour_weight", self.unusual_hour_weight),
            ("velocity_weight", self.velocity_weight),
            ("keyword_weight", self.keyword_weight),
            ("average_weight", self.average_weight),
            ("duplicate_weight", self.duplicate_weight),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Preference assumed for users who never set one.
    pub default_enabled: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { default_enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite busy timeout for writers contending on a file database.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { busy_timeout_ms: 5_000 }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub risk: RiskConfig,
    pub alerts: AlertConfig,
    pub store: StoreConfig,
    /// Serialize insert→analyze→persist per user, so concurrent submissions
    /// from one user see each other in the velocity and duplicate counts.
    pub serialize_user_scoring: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            risk: RiskConfig::default(),
            alerts: AlertConfig::default(),
            store: StoreConfig::default(),
            serialize_user_scoring: true,
        }
    }
}

impl GuardConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        Self::from_json(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let config: GuardConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could push a score outside [0, 1]
    /// or make a window meaningless.
    pub fn validate(&self) -> anyhow::Result<()> {
        let risk = &self.risk;
        for (name, weight) in risk.weights() {
            if !weight.is_finite() || weight < 0.0 {
                anyhow::bail!("risk.{name} must be a non-negative number, got {weight}");
            }
        }
        if risk.very_large_amount_threshold < risk.large_amount_threshold {
            anyhow::bail!(
                "risk.very_large_amount_threshold ({}) is below risk.large_amount_threshold ({})",
                risk.very_large_amount_threshold,
                risk.large_amount_threshold
            );
        }
        if risk.velocity_window_minutes <= 0
            || risk.average_window_days <= 0
            || risk.duplicate_window_hours <= 0
        {
            anyhow::bail!("risk windows must be positive");
        }
        if risk.average_multiplier <= 0.0 {
            anyhow::bail!("risk.average_multiplier must be positive");
        }
        if risk.query_timeout_ms == 0 {
            anyhow::bail!("risk.query_timeout_ms must be positive");
        }
        Ok(())
    }
}
