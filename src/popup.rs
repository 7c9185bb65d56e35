//! C10 — Popup / Pre-Action Handler. Runs a bounded scripted action
//! sequence (click/type/select/wait/scroll) before detection or
//! extraction, tolerating individual action failures (spec §4.10).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptedAction {
    Click { selector: String },
    Type { selector: String, text: String },
    Select { selector: String, value: String },
    Wait { milliseconds: u64 },
    Scroll { selector: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub skipped: bool,
    pub error: Option<String>,
}

impl ActionResult {
    fn ok() -> Self {
        Self { success: true, skipped: false, error: None }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self { success: false, skipped: true, error: Some(reason.into()) }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self { success: false, skipped: false, error: Some(reason.into()) }
    }
}

/// The subset of driver capability the popup handler needs, kept narrow so
/// it can be exercised against a fake in tests without pulling in the full
/// `Driver` trait.
#[async_trait]
pub trait ActionSurface: Send + Sync {
    async fn is_visible(&self, selector: &str) -> bool;
    async fn click(&self, selector: &str) -> Result<()>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;
    async fn select_option(&self, selector: &str, value: &str) -> Result<()>;
    async fn scroll_into_view(&self, selector: Option<&str>) -> Result<()>;
    async fn wait(&self, milliseconds: u64);
}

const VISIBILITY_WAIT_MS: u64 = 2_000;

/// Run each action in order, waiting up to `VISIBILITY_WAIT_MS` for its
/// target to become visible before skipping it. A single action's failure
/// never aborts the sequence (spec: never throws fatally).
pub async fn run_sequence(surface: &dyn ActionSurface, actions: &[ScriptedAction]) -> Vec<ActionResult> {
    let mut results = Vec::with_capacity(actions.len());
    for action in actions {
        results.push(run_one(surface, action).await);
    }
    results
}

async fn run_one(surface: &dyn ActionSurface, action: &ScriptedAction) -> ActionResult {
    match action {
        ScriptedAction::Wait { milliseconds } => {
            surface.wait(*milliseconds).await;
            ActionResult::ok()
        }
        ScriptedAction::Click { selector } => {
            if !await_visible(surface, selector).await {
                return ActionResult::skipped(format!("{selector} never became visible"));
            }
            match surface.click(selector).await {
                Ok(()) => ActionResult::ok(),
                Err(e) => ActionResult::failed(e.to_string()),
            }
        }
        ScriptedAction::Type { selector, text } => {
            if !await_visible(surface, selector).await {
                return ActionResult::skipped(format!("{selector} never became visible"));
            }
            match surface.type_text(selector, text).await {
                Ok(()) => ActionResult::ok(),
                Err(e) => ActionResult::failed(e.to_string()),
            }
        }
        ScriptedAction::Select { selector, value } => {
            if !await_visible(surface, selector).await {
                return ActionResult::skipped(format!("{selector} never became visible"));
            }
            match surface.select_option(selector, value).await {
                Ok(()) => ActionResult::ok(),
                Err(e) => ActionResult::failed(e.to_string()),
            }
        }
        ScriptedAction::Scroll { selector } => match surface.scroll_into_view(selector.as_deref()).await {
            Ok(()) => ActionResult::ok(),
            Err(e) => ActionResult::failed(e.to_string()),
        },
    }
}

async fn await_visible(surface: &dyn ActionSurface, selector: &str) -> bool {
    let step = 100u64;
    let mut waited = 0u64;
    while waited < VISIBILITY_WAIT_MS {
        if surface.is_visible(selector).await {
            return true;
        }
        surface.wait(step).await;
        waited += step;
    }
    surface.is_visible(selector).await
}
