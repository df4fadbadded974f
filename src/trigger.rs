//! Matches inbound events against enabled scenarios and starts executions.
//!
//! Matched scenarios run fire-and-forget and independently of each other;
//! the dispatcher neither waits for nor aggregates their results.

use std::sync::Arc;

use crate::dsl::{trigger_kind, ParamValue};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::format::scalar_to_string;
use crate::gateway::chat::decode_callback;
use crate::store::ScenarioStore;
use crate::types::VarMap;

pub struct TriggerDispatcher {
    store: Arc<dyn ScenarioStore>,
    engine: Arc<Engine>,
}

impl TriggerDispatcher {
    pub fn new(store: Arc<dyn ScenarioStore>, engine: Arc<Engine>) -> Self {
        Self { store, engine }
    }

    /// Finds matching enabled scenarios and starts one execution per match.
    /// Returns how many were started. `None` as the trigger value matches
    /// scenarios regardless of their declared value.
    pub async fn dispatch(
        &self,
        merchant_id: i64,
        kind: &str,
        value: Option<&str>,
        payload: ParamValue,
    ) -> Result<usize, EngineError> {
        let scenarios = self
            .store
            .scenarios_by_trigger(merchant_id, kind, value)
            .await?;

        for scenario in &scenarios {
            let engine = Arc::clone(&self.engine);
            let scenario = scenario.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.start(&scenario, payload).await {
                    tracing::error!(
                        scenario_id = %scenario.id,
                        merchant_id = scenario.merchant_id,
                        "scenario run failed to start: {e}"
                    );
                }
            });
        }

        Ok(scenarios.len())
    }

    /// Webhook events carry the event name and its data object. An empty
    /// event name dispatches as a wildcard.
    pub async fn webhook_event(
        &self,
        merchant_id: i64,
        event: &str,
        data: ParamValue,
    ) -> Result<usize, EngineError> {
        let mut payload = indexmap::IndexMap::new();
        payload.insert("event".to_string(), ParamValue::from(event));
        payload.insert("data".to_string(), data);

        let value = (!event.is_empty()).then_some(event);
        self.dispatch(merchant_id, trigger_kind::WEBHOOK_EVENT, value, ParamValue::Object(payload))
            .await
    }

    pub async fn bot_command(
        &self,
        merchant_id: i64,
        command: &str,
        chat_id: i64,
        username: &str,
    ) -> Result<usize, EngineError> {
        let payload = chat_payload("command", command, chat_id, username);
        self.dispatch(merchant_id, trigger_kind::BOT_COMMAND, Some(command), payload)
            .await
    }

    pub async fn button_click(
        &self,
        merchant_id: i64,
        action: &str,
        chat_id: i64,
        username: &str,
    ) -> Result<usize, EngineError> {
        let payload = chat_payload("action", action, chat_id, username);
        self.dispatch(merchant_id, trigger_kind::BUTTON_CLICK, Some(action), payload)
            .await
    }

    /// Routes an inline-button callback payload (`sc_{merchant}_{action}`)
    /// back into scenario dispatch. Payloads in any other shape start
    /// nothing.
    pub async fn button_callback(
        &self,
        data: &str,
        chat_id: i64,
        username: &str,
    ) -> Result<usize, EngineError> {
        match decode_callback(data) {
            Some((merchant_id, action)) => {
                self.button_click(merchant_id, action, chat_id, username).await
            }
            None => Ok(0),
        }
    }

    /// Runs one specific scenario immediately with a caller-supplied
    /// payload, bypassing trigger matching (author test runs). Waits for
    /// the run to finish or suspend and returns the execution id.
    pub async fn run_manual(
        &self,
        merchant_id: i64,
        scenario_id: &str,
        payload: ParamValue,
    ) -> Result<String, EngineError> {
        let scenario = self
            .store
            .get_scenario(merchant_id, scenario_id)
            .await?
            .ok_or_else(|| EngineError::ScenarioNotFound(scenario_id.to_string()))?;

        self.engine.start(&scenario, payload).await
    }
}

fn chat_payload(key: &str, value: &str, chat_id: i64, username: &str) -> ParamValue {
    let mut payload = indexmap::IndexMap::new();
    payload.insert(key.to_string(), ParamValue::from(value));
    payload.insert("chat_id".to_string(), ParamValue::from(chat_id));
    payload.insert("username".to_string(), ParamValue::from(username));
    ParamValue::Object(payload)
}

/// Flattens a trigger payload into the flat string map that seeds execution
/// variables: nested objects recurse with `_`-joined key prefixes, scalars
/// stringify, nulls and arrays are omitted.
pub fn flatten_payload(payload: &ParamValue) -> VarMap {
    let mut vars = VarMap::new();
    if let Some(map) = payload.as_object() {
        flatten_into("", map, &mut vars);
    }
    vars
}

fn flatten_into(
    prefix: &str,
    map: &indexmap::IndexMap<String, ParamValue>,
    out: &mut VarMap,
) {
    for (key, value) in map {
        let flat_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}_{key}")
        };
        match value {
            ParamValue::Object(inner) => flatten_into(&flat_key, inner, out),
            other => {
                if let Some(s) = scalar_to_string(other) {
                    out.insert(flat_key, s);
                }
            }
        }
    }
}
