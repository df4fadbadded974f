//! `send_email`: deliver an email through the merchant's gateway.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dsl::ParamValue;
use crate::engine::ExecutionContext;
use crate::error::ActionError;
use crate::gateway::email::{EmailGateway, EmailRequest};

use super::{Action, ActionOutput, ResolvedStep};

const DEFAULT_SUBJECT: &str = "Notification";

pub struct SendEmailAction {
    email: Arc<dyn EmailGateway>,
}

impl SendEmailAction {
    pub fn new(email: Arc<dyn EmailGateway>) -> Self {
        Self { email }
    }
}

#[async_trait]
impl Action for SendEmailAction {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        step: &ResolvedStep,
    ) -> Result<ActionOutput, ActionError> {
        let to = step
            .str_or_var("to", &ctx.variables)
            .ok_or_else(|| ActionError::new("send_email: to is required"))?
            .to_string();
        let body = step
            .str_or_var("body", &ctx.variables)
            .ok_or_else(|| ActionError::new("send_email: body is required"))?
            .to_string();
        let subject = step
            .str_or_var("subject", &ctx.variables)
            .unwrap_or(DEFAULT_SUBJECT)
            .to_string();

        self.email
            .send(EmailRequest {
                merchant_id: ctx.merchant_id,
                to: to.clone(),
                subject: subject.clone(),
                body,
            })
            .await
            .map_err(|e| ActionError::new(format!("send_email failed: {e:#}")))?;

        tracing::info!(
            execution_id = %ctx.execution_id,
            to = %to,
            subject = %subject,
            "email sent"
        );

        let mut output = ActionOutput::new();
        output.insert("email_sent".to_string(), ParamValue::from("true"));
        output.insert("email_to".to_string(), ParamValue::from(to));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VarMap;
    use anyhow::Result;
    use maplit::btreemap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeEmail {
        sent: Mutex<Vec<EmailRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl EmailGateway for FakeEmail {
        async fn send(&self, request: EmailRequest) -> Result<()> {
            if self.fail {
                anyhow::bail!("smtp unavailable");
            }
            self.sent.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn context(vars: VarMap) -> ExecutionContext {
        ExecutionContext {
            execution_id: "e1".to_string(),
            merchant_id: 3,
            scenario_id: "s1".to_string(),
            variables: vars,
            trigger_payload: ParamValue::object(),
        }
    }

    fn resolved(params_json: &str) -> ResolvedStep {
        ResolvedStep {
            id: "m".to_string(),
            kind: "send_email".to_string(),
            params: serde_json::from_str(params_json).unwrap(),
        }
    }

    #[tokio::test]
    async fn subject_defaults_and_to_falls_back_to_variables() {
        let gateway = Arc::new(FakeEmail::default());
        let action = SendEmailAction::new(gateway.clone());
        let ctx = context(btreemap! { "to".to_string() => "user@example.com".to_string() });

        let output = action
            .execute(&ctx, &resolved(r#"{"body": "Your invoice is ready"}"#))
            .await
            .unwrap();

        assert_eq!(output["email_sent"].as_str(), Some("true"));
        let sent = gateway.sent.lock().unwrap();
        assert_eq!(sent[0].to, "user@example.com");
        assert_eq!(sent[0].subject, "Notification");
        assert_eq!(sent[0].merchant_id, 3);
    }

    #[tokio::test]
    async fn missing_to_or_body_fails() {
        let action = SendEmailAction::new(Arc::new(FakeEmail::default()));
        let ctx = context(VarMap::new());

        let err = action
            .execute(&ctx, &resolved(r#"{"body": "x"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.message, "send_email: to is required");

        let err = action
            .execute(&ctx, &resolved(r#"{"to": "a@b.c"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.message, "send_email: body is required");
    }

    #[tokio::test]
    async fn gateway_failure_surfaces_as_action_error() {
        let action = SendEmailAction::new(Arc::new(FakeEmail {
            fail: true,
            ..Default::default()
        }));
        let ctx = context(VarMap::new());

        let err = action
            .execute(&ctx, &resolved(r#"{"to": "a@b.c", "body": "x"}"#))
            .await
            .unwrap_err();
        assert!(err.message.contains("send_email failed"));
    }
}
