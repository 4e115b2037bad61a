/// Service configuration.
///
/// Two layers:
/// - [`SurgeConfig`] holds the detection/scheduling tunables. It lives behind
///   a [`SharedConfig`] handle so operators can update it at runtime and
///   every component sees the change on its next read.
/// - [`ServiceConfig`] is the on-disk `surgemon.toml` (endpoints, timeouts,
///   logging) plus credentials pulled from the environment / `.env`.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;
use crate::model::SurgeError;

const WEIGHT_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Top-level risk score weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub ratio: f64,
    pub social: f64,
    pub trend: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self { ratio: 0.40, social: 0.35, trend: 0.25 }
    }
}

/// Weights for folding individual social sources into `composite_signal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialWeights {
    pub virality: f64,
    pub trend: f64,
    pub events: f64,
}

impl Default for SocialWeights {
    fn default() -> Self {
        Self { virality: 0.45, trend: 0.30, events: 0.25 }
    }
}

fn check_weights(name: &str, weights: &[f64]) -> Result<(), SurgeError> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(SurgeError::InvalidConfig(format!("{name} weights must be non-negative")));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(SurgeError::InvalidConfig(format!("{name} weights must sum to 1.0, got {sum}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Runtime tunables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurgeConfig {
    /// Minimum actual/predicted ratio every bucket in the window must reach.
    pub surge_threshold: f64,
    /// Number of hourly buckets in the analysis window.
    pub window_hours: u32,
    /// Minimum excess items per hour, summed over the window.
    pub min_excess_items: f64,
    pub cooldown_hours: f64,
    pub check_interval_seconds: u64,
    /// Risk score at or above which narrative enrichment is requested.
    pub llm_threshold: f64,
    pub enable_llm_enrichment: bool,
    pub risk_weights: RiskWeights,
    pub social_weights: SocialWeights,
    /// How long stored metrics stay readable.
    pub retention_days: u32,
    pub worker_pool_size: usize,
    /// Number of cycle records kept for `get_history`.
    pub history_limit: usize,
    /// Consecutive venue-list failures before the engine enters ERROR.
    pub max_venue_fetch_failures: u32,
    /// Analyse a simulated window when collection fails for a venue.
    pub demo_fallback: bool,
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            surge_threshold: 1.5,
            window_hours: 3,
            min_excess_items: 20.0,
            cooldown_hours: 2.0,
            check_interval_seconds: 300,
            llm_threshold: 0.7,
            enable_llm_enrichment: true,
            risk_weights: RiskWeights::default(),
            social_weights: SocialWeights::default(),
            retention_days: 7,
            worker_pool_size: 8,
            history_limit: 100,
            max_venue_fetch_failures: 3,
            demo_fallback: false,
        }
    }
}

impl SurgeConfig {
    pub fn validate(&self) -> Result<(), SurgeError> {
        let invalid =
            |msg: &str| -> Result<(), SurgeError> { Err(SurgeError::InvalidConfig(msg.to_string())) };

        if !self.surge_threshold.is_finite() || self.surge_threshold <= 0.0 {
            return invalid("surge_threshold must be positive");
        }
        if self.window_hours == 0 || self.window_hours > 24 {
            return invalid("window_hours must be between 1 and 24");
        }
        if !self.min_excess_items.is_finite() || self.min_excess_items < 0.0 {
            return invalid("min_excess_items must be non-negative");
        }
        if !self.cooldown_hours.is_finite() || self.cooldown_hours < 0.0 {
            return invalid("cooldown_hours must be non-negative");
        }
        if self.check_interval_seconds == 0 {
            return invalid("check_interval_seconds must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.llm_threshold) {
            return invalid("llm_threshold must be within [0, 1]");
        }
        if self.retention_days == 0 {
            return invalid("retention_days must be at least 1");
        }
        if self.worker_pool_size == 0 || self.worker_pool_size > 64 {
            return invalid("worker_pool_size must be between 1 and 64");
        }
        if self.history_limit == 0 {
            return invalid("history_limit must be at least 1");
        }
        if self.max_venue_fetch_failures == 0 {
            return invalid("max_venue_fetch_failures must be at least 1");
        }
        let r = self.risk_weights;
        check_weights("risk", &[r.ratio, r.social, r.trend])?;
        let s = self.social_weights;
        check_weights("social", &[s.virality, s.trend, s.events])?;
        Ok(())
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.cooldown_hours * 3_600_000.0) as i64)
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval_seconds)
    }

    /// Returns a copy with `update` merged in, validated.
    pub fn merged(&self, update: &ConfigUpdate) -> Result<SurgeConfig, SurgeError> {
        let mut next = self.clone();
        if let Some(v) = update.surge_threshold {
            next.surge_threshold = v;
        }
        if let Some(v) = update.window_hours {
            next.window_hours = v;
        }
        if let Some(v) = update.min_excess_items {
            next.min_excess_items = v;
        }
        if let Some(v) = update.cooldown_hours {
            next.cooldown_hours = v;
        }
        if let Some(v) = update.check_interval_seconds {
            next.check_interval_seconds = v;
        }
        if let Some(v) = update.llm_threshold {
            next.llm_threshold = v;
        }
        if let Some(v) = update.enable_llm_enrichment {
            next.enable_llm_enrichment = v;
        }
        if let Some(v) = update.risk_weights {
            next.risk_weights = v;
        }
        if let Some(v) = update.demo_fallback {
            next.demo_fallback = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial update submitted by an operator. Absent fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub surge_threshold: Option<f64>,
    pub window_hours: Option<u32>,
    pub min_excess_items: Option<f64>,
    pub cooldown_hours: Option<f64>,
    pub check_interval_seconds: Option<u64>,
    pub llm_threshold: Option<f64>,
    pub enable_llm_enrichment: Option<bool>,
    pub risk_weights: Option<RiskWeights>,
    pub demo_fallback: Option<bool>,
}

/// Runtime-updatable configuration shared by all pipeline components.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<SurgeConfig>>,
}

impl SharedConfig {
    pub fn new(config: SurgeConfig) -> Result<Self, SurgeError> {
        config.validate()?;
        Ok(Self { inner: Arc::new(RwLock::new(config)) })
    }

    pub fn snapshot(&self) -> SurgeConfig {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Applies `update` atomically; on rejection the current config stays.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<SurgeConfig, SurgeError> {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let next = guard.merged(update)?;
        *guard = next.clone();
        Ok(next)
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self { inner: Arc::new(RwLock::new(SurgeConfig::default())) }
    }
}

// ---------------------------------------------------------------------------
// surgemon.toml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Base URL of the venue/orders/predictions backend.
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self { base_url: "http://localhost:8000".to_string(), timeout_secs: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialSection {
    pub trend_url: Option<String>,
    pub mention_url: Option<String>,
    pub events_url: Option<String>,
    pub timeout_secs: u64,
    /// Attendance that maps to a full events component.
    pub attendance_norm: f64,
    pub cache_minutes: i64,
}

impl Default for SocialSection {
    fn default() -> Self {
        Self {
            trend_url: None,
            mention_url: None,
            events_url: None,
            timeout_secs: 5,
            attendance_norm: 5_000.0,
            cache_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningSection {
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ReasoningSection {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: LogLevel,
    pub file: Option<String>,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: LogLevel::Info, file: None, json: false }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub engine: SurgeConfig,
    pub api: ApiSection,
    pub social: SocialSection,
    pub reasoning: ReasoningSection,
    pub logging: LoggingSection,
}

impl ServiceConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, SurgeError> {
        let config: ServiceConfig =
            toml::from_str(text).map_err(|e| SurgeError::ConfigFile(e.to_string()))?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SurgeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SurgeError::ConfigFile(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Secrets read from the environment. Every one is optional.
#[derive(Clone, Default)]
pub struct Credentials {
    pub reasoning_api_key: Option<String>,
    pub trend_api_key: Option<String>,
    pub mention_api_key: Option<String>,
    pub events_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            reasoning_api_key: read("REASONING_API_KEY"),
            trend_api_key: read("SOCIAL_TREND_API_KEY"),
            mention_api_key: read("SOCIAL_MENTION_API_KEY"),
            events_api_key: read("SOCIAL_EVENTS_API_KEY"),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("reasoning_api_key", &mask(&self.reasoning_api_key))
            .field("trend_api_key", &mask(&self.trend_api_key))
            .field("mention_api_key", &mask(&self.mention_api_key))
            .field("events_api_key", &mask(&self.events_api_key))
            .finish()
    }
}
