//! Ambient configuration. TOML file + environment overrides, following the
//! teacher's `dotenv` + `init_logging()` bootstrap pattern extended with a
//! typed settings struct (spec §9: scorer weights, thresholds and timers
//! are operator-tunable, not hardcoded).

use serde::{Deserialize, Serialize};

use crate::scorer::ScoringWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RainbowConfig {
    pub server_port: u16,
    pub scorer_weights: WeightsConfig,
    pub min_confidence: f64,
    pub min_pattern_size: usize,
    pub pattern_boost: f64,
    pub lazy_load: LazyLoadTimers,
    pub pagination: PaginationTimers,
    pub oracle: OracleConfig,
}

impl Default for RainbowConfig {
    fn default() -> Self {
        Self {
            server_port: 3001,
            scorer_weights: WeightsConfig::default(),
            min_confidence: crate::detector::MIN_CONFIDENCE,
            min_pattern_size: crate::scorer::MIN_PATTERN_SIZE,
            pattern_boost: crate::scorer::PATTERN_BOOST,
            lazy_load: LazyLoadTimers::default(),
            pagination: PaginationTimers::default(),
            oracle: OracleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    pub structural: f64,
    pub visual: f64,
    pub content: f64,
    pub context: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        let w = ScoringWeights::default();
        Self { structural: w.structural, visual: w.visual, content: w.content, context: w.context }
    }
}

impl From<WeightsConfig> for ScoringWeights {
    fn from(w: WeightsConfig) -> Self {
        ScoringWeights { structural: w.structural, visual: w.visual, content: w.content, context: w.context }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LazyLoadTimers {
    pub scroll_delay_ms: u64,
    pub stability_timeout_ms: u64,
    pub rapid_scroll_step_px: u32,
}

impl Default for LazyLoadTimers {
    fn default() -> Self {
        Self { scroll_delay_ms: 300, stability_timeout_ms: 2_000, rapid_scroll_step_px: 800 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationTimers {
    pub click_trial_timeout_ms: u64,
    pub scroll_trial_steps: u32,
}

impl Default for PaginationTimers {
    fn default() -> Self {
        Self { click_trial_timeout_ms: 3_000, scroll_trial_steps: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self { enabled: false, endpoint: None, timeout_ms: 5_000 }
    }
}

/// Load configuration from `path` (TOML), falling back to defaults for any
/// field the file omits, then applying `RAINBOW_*` environment overrides.
/// Mirrors the teacher's `dotenv::dotenv().ok()` + env-driven bootstrap,
/// generalized to a full settings struct instead of ad hoc `env::var` calls
/// scattered through `main`.
pub fn load(path: Option<&str>) -> anyhow::Result<RainbowConfig> {
    dotenv::dotenv().ok();

    let mut config = match path {
        Some(p) if std::path::Path::new(p).exists() => {
            let raw = std::fs::read_to_string(p)?;
            toml::from_str(&raw)?
        }
        _ => RainbowConfig::default(),
    };

    if let Ok(port) = std::env::var("RAINBOW_SERVER_PORT") {
        config.server_port = port.parse()?;
    }
    if let Ok(min_conf) = std::env::var("RAINBOW_MIN_CONFIDENCE") {
        config.min_confidence = min_conf.parse()?;
    }
    if let Ok(endpoint) = std::env::var("RAINBOW_ORACLE_ENDPOINT") {
        config.oracle.enabled = true;
        config.oracle.endpoint = Some(endpoint);
    }

    Ok(config)
}

/// Mirrors the teacher's `init_logging()`: `tracing-subscriber` with an
/// `EnvFilter` defaulting to info level for this crate.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rainbow_scrape=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_detector_and_scorer_constants() {
        let config = RainbowConfig::default();
        assert_eq!(config.min_confidence, crate::detector::MIN_CONFIDENCE);
        assert_eq!(config.min_pattern_size, crate::scorer::MIN_PATTERN_SIZE);
    }

    #[test]
    fn load_without_file_returns_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.server_port, 3001);
    }
}
