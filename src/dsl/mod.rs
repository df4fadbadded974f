//! The declarative scenario document: a trigger, optional declared
//! variables, and an ordered list of steps.

mod params;
pub mod validate;

pub use params::{ParamValue, Params};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Trigger kinds a scenario can declare. The set is closed; anything else
/// fails validation.
pub mod trigger_kind {
    pub const WEBHOOK_EVENT: &str = "webhook_event";
    pub const BOT_COMMAND: &str = "bot_command";
    pub const BUTTON_CLICK: &str = "button_click";
    pub const SCHEDULE: &str = "schedule";
    pub const MANUAL: &str = "manual";

    pub const ALL: [&str; 5] = [WEBHOOK_EVENT, BOT_COMMAND, BUTTON_CLICK, SCHEDULE, MANUAL];
}

/// Step kinds. `condition`, `delay`, `set_variable` and `log` are handled
/// inline by the engine; the rest dispatch through the action registry.
pub mod step_kind {
    pub const SEND_TELEGRAM: &str = "send_telegram";
    pub const HTTP_REQUEST: &str = "http_request";
    pub const DELAY: &str = "delay";
    pub const CONDITION: &str = "condition";
    pub const SET_VARIABLE: &str = "set_variable";
    pub const UNIBEE_API: &str = "unibee_api";
    pub const SEND_EMAIL: &str = "send_email";
    pub const LOG: &str = "log";

    pub const ALL: [&str; 8] = [
        SEND_TELEGRAM,
        HTTP_REQUEST,
        DELAY,
        CONDITION,
        SET_VARIABLE,
        UNIBEE_API,
        SEND_EMAIL,
        LOG,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDsl {
    pub trigger: TriggerDsl,
    /// Declared variable names with initial templated expressions, rendered
    /// against the flattened trigger payload when an execution starts.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, String>,
    pub steps: Vec<StepDsl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDsl {
    #[serde(rename = "type")]
    pub kind: String,
    /// Event name, command, or button action; empty for wildcard/manual.
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDsl {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

impl ScenarioDsl {
    /// Deserializes the wire document. Fails on malformed structure only;
    /// semantic checks live in [`validate::validate`].
    pub fn parse(document: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(document)?)
    }

    /// Parse then validate, for author-time save and test-run operations.
    /// Rejected documents never touch persisted state.
    pub fn parse_validated(document: &str) -> Result<Self, EngineError> {
        let dsl = Self::parse(document)?;
        let errors = validate::validate(&dsl);
        if errors.is_empty() {
            Ok(dsl)
        } else {
            Err(EngineError::Validation(errors))
        }
    }

    pub fn to_document(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Index of the step with the given id, by full linear scan.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }
}
