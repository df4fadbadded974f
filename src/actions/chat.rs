//! `send_telegram`: deliver a chat message, optionally with inline buttons.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::dsl::ParamValue;
use crate::engine::ExecutionContext;
use crate::error::ActionError;
use crate::gateway::chat::{encode_callback, ChatGateway, ChatTarget, InlineButton, OutboundMessage};

use super::{Action, ActionOutput, ResolvedStep};

pub struct SendTelegramAction {
    chat: Arc<dyn ChatGateway>,
}

impl SendTelegramAction {
    pub fn new(chat: Arc<dyn ChatGateway>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl Action for SendTelegramAction {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        step: &ResolvedStep,
    ) -> Result<ActionOutput, ActionError> {
        let message = step.require_str("message")?;

        // Chat id resolution order: step params, then trigger-derived
        // variables, then the merchant's default.
        let mut chat_id = step
            .params
            .str_of("chatId")
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| ctx.variables.get("chat_id").cloned())
            .unwrap_or_default();

        let settings = self.chat.settings(ctx.merchant_id).await?;
        if !settings.configured {
            return Err(ActionError::new(format!(
                "send_telegram: chat transport not configured for merchant {}",
                ctx.merchant_id
            )));
        }

        if chat_id.is_empty() {
            chat_id = settings.default_chat.clone();
        }
        if chat_id.is_empty() {
            return Err(ActionError::new("send_telegram: no chat ID available"));
        }

        let buttons = step
            .params
            .get("buttons")
            .map(|raw| parse_buttons(raw, ctx.merchant_id))
            .unwrap_or_default();

        let delivered = self
            .chat
            .send(
                ctx.merchant_id,
                OutboundMessage {
                    target: ChatTarget::parse(&chat_id),
                    text: message.to_string(),
                    buttons,
                },
            )
            .await
            .map_err(|e| ActionError::new(format!("send_telegram: {e:#}")))?;

        tracing::info!(
            execution_id = %ctx.execution_id,
            chat = %chat_id,
            "sent chat message"
        );

        let mut output = ActionOutput::new();
        output.insert("message_id".to_string(), ParamValue::from(delivered.message_id));
        output.insert("chat_id".to_string(), ParamValue::from(chat_id));
        Ok(output)
    }
}

#[derive(Debug, Deserialize)]
struct ButtonSpec {
    #[serde(default)]
    text: String,
    #[serde(default)]
    action: String,
}

/// Accepts either an array of `{text, action}` objects or a JSON string
/// encoding one. Buttons without text are dropped.
fn parse_buttons(raw: &ParamValue, merchant_id: i64) -> Vec<InlineButton> {
    let specs: Vec<ButtonSpec> = match raw {
        ParamValue::Array(_) => serde_json::from_value(raw.to_json()).unwrap_or_default(),
        ParamValue::String(s) => serde_json::from_str(s).unwrap_or_default(),
        _ => Vec::new(),
    };

    specs
        .into_iter()
        .filter(|spec| !spec.text.is_empty())
        .map(|spec| InlineButton {
            text: spec.text,
            callback_data: encode_callback(merchant_id, &spec.action),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::chat::{ChatSettings, DeliveredMessage};
    use crate::types::VarMap;
    use anyhow::Result;
    use maplit::btreemap;
    use std::sync::Mutex;

    struct FakeChat {
        settings: ChatSettings,
        sent: Mutex<Vec<(i64, OutboundMessage)>>,
    }

    impl FakeChat {
        fn new(settings: ChatSettings) -> Arc<Self> {
            Arc::new(Self {
                settings,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatGateway for FakeChat {
        async fn settings(&self, _merchant_id: i64) -> Result<ChatSettings> {
            Ok(self.settings.clone())
        }

        async fn send(
            &self,
            merchant_id: i64,
            message: OutboundMessage,
        ) -> Result<DeliveredMessage> {
            self.sent.lock().unwrap().push((merchant_id, message));
            Ok(DeliveredMessage { message_id: 99 })
        }
    }

    fn context(vars: VarMap) -> ExecutionContext {
        ExecutionContext {
            execution_id: "e1".to_string(),
            merchant_id: 7,
            scenario_id: "s1".to_string(),
            variables: vars,
            trigger_payload: ParamValue::object(),
        }
    }

    fn resolved(params_json: &str) -> ResolvedStep {
        ResolvedStep {
            id: "step".to_string(),
            kind: "send_telegram".to_string(),
            params: serde_json::from_str(params_json).unwrap(),
        }
    }

    fn configured() -> ChatSettings {
        ChatSettings {
            configured: true,
            enabled: true,
            default_chat: "555".to_string(),
        }
    }

    #[tokio::test]
    async fn resolves_chat_id_from_variables_then_default() {
        let chat = FakeChat::new(configured());
        let action = SendTelegramAction::new(chat.clone());

        // From trigger-derived variables.
        let ctx = context(btreemap! { "chat_id".to_string() => "123".to_string() });
        action
            .execute(&ctx, &resolved(r#"{"message": "hi"}"#))
            .await
            .unwrap();
        // From the merchant default when no variable is present.
        let ctx = context(VarMap::new());
        let output = action
            .execute(&ctx, &resolved(r#"{"message": "hi"}"#))
            .await
            .unwrap();
        assert_eq!(output["chat_id"].as_str(), Some("555"));
        assert_eq!(output["message_id"].as_i64(), Some(99));

        let sent = chat.sent.lock().unwrap();
        assert_eq!(sent[0].1.target, ChatTarget::Id(123));
        assert_eq!(sent[1].1.target, ChatTarget::Id(555));
    }

    #[tokio::test]
    async fn buttons_become_callback_payloads() {
        let chat = FakeChat::new(configured());
        let action = SendTelegramAction::new(chat.clone());
        let ctx = context(VarMap::new());

        action
            .execute(
                &ctx,
                &resolved(
                    r#"{"message": "pick", "buttons": [
                        {"text": "Renew", "action": "renew"},
                        {"text": "", "action": "dropped"}
                    ]}"#,
                ),
            )
            .await
            .unwrap();

        let sent = chat.sent.lock().unwrap();
        let buttons = &sent[0].1.buttons;
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0].callback_data, "sc_7_renew");
    }

    #[tokio::test]
    async fn fails_without_message_config_or_chat_id() {
        let ctx = context(VarMap::new());

        let action = SendTelegramAction::new(FakeChat::new(configured()));
        assert!(action.execute(&ctx, &resolved("{}")).await.is_err());

        let action = SendTelegramAction::new(FakeChat::new(ChatSettings::default()));
        let err = action
            .execute(&ctx, &resolved(r#"{"message": "hi"}"#))
            .await
            .unwrap_err();
        assert!(err.message.contains("not configured"));

        let action = SendTelegramAction::new(FakeChat::new(ChatSettings {
            configured: true,
            enabled: true,
            default_chat: String::new(),
        }));
        let err = action
            .execute(&ctx, &resolved(r#"{"message": "hi"}"#))
            .await
            .unwrap_err();
        assert!(err.message.contains("no chat ID"));
    }
}
