//! A4 — AI Oracle port. A narrow, optional hint source the rule-based
//! pipeline may consult when confidence is low; never on the critical path
//! for correctness (spec §9: Oracle calls never gate correctness; a
//! disabled or failing Oracle must fall back to the deterministic path).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::OracleConfig;
use crate::error::{RainbowError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleHint {
    pub selector: Option<String>,
    pub confidence: f64,
    pub explanation: Option<String>,
}

/// The six operations a vision/LLM oracle can be asked to help with,
/// mirroring the rule-based components it can supplement.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn suggest_product_container(&self, html: &str, screenshot_b64: Option<&str>) -> Result<OracleHint>;
    async fn suggest_pagination_control(&self, html: &str) -> Result<OracleHint>;
    async fn suggest_field_selector(&self, html: &str, role: &str) -> Result<OracleHint>;
    async fn classify_element(&self, html_fragment: &str) -> Result<OracleHint>;
    async fn suggest_dismiss_action(&self, html: &str, screenshot_b64: Option<&str>) -> Result<OracleHint>;
    async fn explain_low_confidence(&self, context: &str) -> Result<String>;
}

/// No-op oracle used whenever `OracleConfig::enabled` is false (the
/// default). Every call fails immediately with `OracleUnavailable` so
/// callers degrade to the rule-based path without a timeout round-trip.
pub struct DisabledOracle;

#[async_trait]
impl Oracle for DisabledOracle {
    async fn suggest_product_container(&self, _html: &str, _screenshot_b64: Option<&str>) -> Result<OracleHint> {
        Err(RainbowError::OracleUnavailable("oracle disabled".to_string()))
    }
    async fn suggest_pagination_control(&self, _html: &str) -> Result<OracleHint> {
        Err(RainbowError::OracleUnavailable("oracle disabled".to_string()))
    }
    async fn suggest_field_selector(&self, _html: &str, _role: &str) -> Result<OracleHint> {
        Err(RainbowError::OracleUnavailable("oracle disabled".to_string()))
    }
    async fn classify_element(&self, _html_fragment: &str) -> Result<OracleHint> {
        Err(RainbowError::OracleUnavailable("oracle disabled".to_string()))
    }
    async fn suggest_dismiss_action(&self, _html: &str, _screenshot_b64: Option<&str>) -> Result<OracleHint> {
        Err(RainbowError::OracleUnavailable("oracle disabled".to_string()))
    }
    async fn explain_low_confidence(&self, _context: &str) -> Result<String> {
        Err(RainbowError::OracleUnavailable("oracle disabled".to_string()))
    }
}

/// HTTP-backed oracle calling a configured endpoint with a bounded
/// timeout. Any transport or timeout failure degrades to
/// `OracleUnavailable`; it never panics and never retries indefinitely.
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: String,
    timeout: std::time::Duration,
}

impl HttpOracle {
    pub fn new(config: &OracleConfig) -> Option<Self> {
        let endpoint = config.endpoint.clone()?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .ok()?;
        Some(Self { client, endpoint, timeout: std::time::Duration::from_millis(config.timeout_ms) })
    }

    async fn call(&self, op: &str, payload: serde_json::Value) -> Result<OracleHint> {
        let url = format!("{}/{op}", self.endpoint.trim_end_matches('/'));
        let response = tokio::time::timeout(self.timeout, self.client.post(&url).json(&payload).send())
            .await
            .map_err(|_| RainbowError::OracleUnavailable(format!("{op} timed out")))?
            .map_err(|e| RainbowError::OracleUnavailable(e.to_string()))?;

        response
            .json::<OracleHint>()
            .await
            .map_err(|e| RainbowError::OracleUnavailable(e.to_string()))
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn suggest_product_container(&self, html: &str, screenshot_b64: Option<&str>) -> Result<OracleHint> {
        self.call("product-container", serde_json::json!({"html": html, "screenshot": screenshot_b64})).await
    }
    async fn suggest_pagination_control(&self, html: &str) -> Result<OracleHint> {
        self.call("pagination-control", serde_json::json!({"html": html})).await
    }
    async fn suggest_field_selector(&self, html: &str, role: &str) -> Result<OracleHint> {
        self.call("field-selector", serde_json::json!({"html": html, "role": role})).await
    }
    async fn classify_element(&self, html_fragment: &str) -> Result<OracleHint> {
        self.call("classify", serde_json::json!({"html": html_fragment})).await
    }
    async fn suggest_dismiss_action(&self, html: &str, screenshot_b64: Option<&str>) -> Result<OracleHint> {
        self.call("dismiss-action", serde_json::json!({"html": html, "screenshot": screenshot_b64})).await
    }
    async fn explain_low_confidence(&self, context: &str) -> Result<String> {
        self.call("explain", serde_json::json!({"context": context})).await.map(|h| h.explanation.unwrap_or_default())
    }
}

pub fn from_config(config: &OracleConfig) -> Box<dyn Oracle> {
    if config.enabled {
        if let Some(oracle) = HttpOracle::new(config) {
            return Box::new(oracle);
        }
    }
    Box::new(DisabledOracle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_oracle_fails_immediately() {
        let oracle = DisabledOracle;
        let result = oracle.suggest_product_container("<html></html>", None).await;
        assert!(result.is_err());
    }

    #[test]
    fn from_config_falls_back_to_disabled_without_endpoint() {
        let config = OracleConfig { enabled: true, endpoint: None, timeout_ms: 1000 };
        let oracle = from_config(&config);
        let _ = oracle;
    }
}
