//! Pluggable step implementations.
//!
//! The registry is built once at process start and passed by reference into
//! the engine; after construction it is read-only and safe for concurrent
//! lookup. One implementation per step-type tag.

mod billing;
mod chat;
mod email;
mod http;

pub use billing::BillingApiAction;
pub use chat::SendTelegramAction;
pub use email::SendEmailAction;
pub use http::HttpRequestAction;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;

use crate::config::HttpSettings;
use crate::dsl::{step_kind, ParamValue, Params, StepDsl};
use crate::engine::ExecutionContext;
use crate::error::ActionError;
use crate::gateway::{BillingGateway, ChatGateway, EmailGateway};
use crate::template;
use crate::types::VarMap;

/// String-keyed output of an action call. String-valued entries are merged
/// back into the execution's variables; everything is recorded in the step
/// log.
pub type ActionOutput = IndexMap<String, ParamValue>;

/// A step with its parameter bag already template-resolved against the
/// current variables.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    pub id: String,
    pub kind: String,
    pub params: Params,
}

impl ResolvedStep {
    pub fn resolve(step: &StepDsl, vars: &VarMap) -> Self {
        Self {
            id: step.id.clone(),
            kind: step.kind.clone(),
            params: template::render_params(&step.params, vars),
        }
    }

    /// Required non-empty string parameter; errors in the
    /// `"{kind}: {key} is required"` shape the step log records.
    pub fn require_str(&self, key: &str) -> Result<&str, ActionError> {
        match self.params.str_of(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ActionError::new(format!("{}: {key} is required", self.kind))),
        }
    }

    /// Parameter value, falling back to an execution variable of the same
    /// name. Empty strings count as absent.
    pub fn str_or_var<'a>(&'a self, key: &str, vars: &'a VarMap) -> Option<&'a str> {
        self.params
            .str_of(key)
            .filter(|s| !s.is_empty())
            .or_else(|| vars.get(key).map(String::as_str).filter(|s| !s.is_empty()))
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        step: &ResolvedStep,
    ) -> Result<ActionOutput, ActionError>;
}

#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation for a step-type tag, replacing any
    /// previous one.
    pub fn register(&mut self, kind: impl Into<String>, action: Arc<dyn Action>) {
        self.actions.insert(kind.into(), action);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(kind).cloned()
    }

    pub fn registered_kinds(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    /// The four built-in actions wired to their collaborators.
    pub fn with_builtins(
        chat: Arc<dyn ChatGateway>,
        email: Arc<dyn EmailGateway>,
        billing: Arc<dyn BillingGateway>,
        http: &HttpSettings,
    ) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(step_kind::SEND_TELEGRAM, Arc::new(SendTelegramAction::new(chat)));
        registry.register(step_kind::HTTP_REQUEST, Arc::new(HttpRequestAction::new(http)?));
        registry.register(step_kind::SEND_EMAIL, Arc::new(SendEmailAction::new(email)));
        registry.register(step_kind::UNIBEE_API, Arc::new(BillingApiAction::new(billing)));
        Ok(registry)
    }
}
