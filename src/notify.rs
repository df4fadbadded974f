//! Per-event chat notifications.
//!
//! Billing webhook events render through per-event templates (merchant
//! overrides first, then the built-in defaults) in the placeholder-emptying
//! mode and go out through the chat gateway to the merchant's default chat.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::dsl::ParamValue;
use crate::format::{money, scalar_to_string};
use crate::gateway::chat::{ChatGateway, ChatTarget, OutboundMessage};
use crate::template::{self, RenderMode};
use crate::types::VarMap;

/// Fallback when neither the merchant nor the defaults cover an event.
const GENERIC_TEMPLATE: &str = "\u{1F4CC} {{event}}\nUser: {{userEmail}}";

/// Built-in template per billing event.
pub fn default_template(event: &str) -> Option<&'static str> {
    let template = match event {
        "subscription.created" => {
            "\u{1F195} New subscription created\nPlan: {{planName}}\nUser: {{userEmail}}\nAmount: {{amountFormatted}}"
        }
        "subscription.activated" => {
            "\u{2705} Subscription activated\nPlan: {{planName}}\nUser: {{userEmail}}"
        }
        "subscription.updated" => {
            "\u{1F4DD} Subscription updated\nPlan: {{planName}}\nUser: {{userEmail}}"
        }
        "subscription.cancelled" => {
            "\u{274C} Subscription cancelled\nPlan: {{planName}}\nUser: {{userEmail}}"
        }
        "subscription.expired" => {
            "\u{23F0} Subscription expired\nPlan: {{planName}}\nUser: {{userEmail}}"
        }
        "subscription.auto_renew.success" => {
            "\u{1F504} Auto-renewal successful\nPlan: {{planName}}\nUser: {{userEmail}}\nAmount: {{amountFormatted}}"
        }
        "subscription.auto_renew.failure" => {
            "\u{26A0}\u{FE0F} Auto-renewal failed\nPlan: {{planName}}\nUser: {{userEmail}}"
        }
        "payment.created" => {
            "\u{1F4B3} Payment created\nAmount: {{amountFormatted}}\nUser: {{userEmail}}"
        }
        "payment.success" => {
            "\u{2705} Payment successful\nAmount: {{amountFormatted}}\nUser: {{userEmail}}"
        }
        "payment.failure" => {
            "\u{274C} Payment failed\nAmount: {{amountFormatted}}\nUser: {{userEmail}}"
        }
        "invoice.created" => {
            "\u{1F4C4} Invoice created\nAmount: {{amountFormatted}}\nUser: {{userEmail}}"
        }
        "invoice.paid" => "\u{2705} Invoice paid\nAmount: {{amountFormatted}}\nUser: {{userEmail}}",
        "invoice.failed" => "\u{1F6AB} Invoice failed\nUser: {{userEmail}}",
        "refund.created" => {
            "\u{1F4B0} Refund initiated\nAmount: {{amountFormatted}}\nUser: {{userEmail}}"
        }
        "refund.success" => {
            "\u{2705} Refund completed\nAmount: {{amountFormatted}}\nUser: {{userEmail}}"
        }
        "refund.failure" => "\u{274C} Refund failed\nAmount: {{amountFormatted}}\nUser: {{userEmail}}",
        "user.created" => {
            "\u{1F464} New user registered\nEmail: {{userEmail}}\nName: {{firstName}} {{lastName}}"
        }
        _ => return None,
    };
    Some(template)
}

/// Merchant override first, then the built-in default, then the generic
/// fallback.
pub fn template_for_event(event: &str, overrides: &HashMap<String, String>) -> String {
    if let Some(custom) = overrides.get(event).filter(|t| !t.is_empty()) {
        return custom.clone();
    }
    default_template(event)
        .unwrap_or(GENERIC_TEMPLATE)
        .to_string()
}

const SCALAR_KEYS: [&str; 22] = [
    "subscriptionId",
    "planId",
    "planName",
    "userId",
    "userEmail",
    "userName",
    "firstName",
    "lastName",
    "amount",
    "currency",
    "status",
    "paymentId",
    "invoiceId",
    "refundId",
    "gatewayId",
    "quantity",
    "description",
    "reason",
    "periodStart",
    "periodEnd",
    "trialEnd",
    "nextBillingDate",
];

/// Builds the template variables for an event payload: known top-level
/// scalars, common fields of nested subscription/plan/user/payment/invoice/
/// refund objects, and a derived `amountFormatted`.
pub fn event_variables(event: &str, data: &ParamValue) -> VarMap {
    let mut vars = VarMap::new();
    vars.insert("event".to_string(), event.to_string());

    let Some(root) = data.as_object() else {
        return vars;
    };

    for key in SCALAR_KEYS {
        if let Some(value) = root.get(key).and_then(scalar_to_string) {
            vars.insert(key.to_string(), value);
        }
    }

    if let Some(subscription) = root.get("subscription") {
        set_missing_from(
            &mut vars,
            subscription,
            &[
                ("subscriptionId", "subscriptionId"),
                ("status", "status"),
                ("quantity", "quantity"),
            ],
        );
        if let Some(plan) = subscription.as_object().and_then(|m| m.get("plan")) {
            set_missing_from(
                &mut vars,
                plan,
                &[
                    ("planName", "planName"),
                    ("planId", "planId"),
                    ("amount", "amount"),
                    ("currency", "currency"),
                ],
            );
        }
    }
    if let Some(user) = root.get("user") {
        set_missing_from(
            &mut vars,
            user,
            &[
                ("userEmail", "email"),
                ("userName", "userName"),
                ("firstName", "firstName"),
                ("lastName", "lastName"),
                ("userId", "id"),
            ],
        );
    }
    if let Some(payment) = root.get("payment") {
        set_missing_from(
            &mut vars,
            payment,
            &[
                ("paymentId", "paymentId"),
                ("amount", "totalAmount"),
                ("currency", "currency"),
                ("gatewayId", "gatewayId"),
            ],
        );
    }
    if let Some(invoice) = root.get("invoice") {
        set_missing_from(
            &mut vars,
            invoice,
            &[
                ("invoiceId", "invoiceId"),
                ("amount", "totalAmount"),
                ("currency", "currency"),
            ],
        );
    }
    if let Some(refund) = root.get("refund") {
        set_missing_from(
            &mut vars,
            refund,
            &[
                ("refundId", "refundId"),
                ("amount", "refundAmount"),
                ("currency", "currency"),
                ("reason", "refundComment"),
            ],
        );
    }

    if let Some(amount) = vars.get("amount") {
        let currency = vars.get("currency").cloned().unwrap_or_default();
        let formatted = match amount.parse::<i64>() {
            Ok(minor) => money(minor, &currency),
            Err(_) => {
                if currency.is_empty() {
                    amount.clone()
                } else {
                    format!("{amount} {}", currency.to_uppercase())
                }
            }
        };
        vars.insert("amountFormatted".to_string(), formatted);
    }

    vars
}

/// Copies fields of a nested payload object into variables that are not
/// already set.
fn set_missing_from(vars: &mut VarMap, obj: &ParamValue, pairs: &[(&str, &str)]) {
    let Some(map) = obj.as_object() else { return };
    for (var, field) in pairs {
        if vars.contains_key(*var) {
            continue;
        }
        if let Some(value) = map.get(*field).and_then(scalar_to_string) {
            vars.insert((*var).to_string(), value);
        }
    }
}

pub struct Notifier {
    chat: Arc<dyn ChatGateway>,
}

impl Notifier {
    pub fn new(chat: Arc<dyn ChatGateway>) -> Self {
        Self { chat }
    }

    /// Renders and delivers the notification for an event. Returns whether
    /// a message was sent; merchants without an enabled, configured chat
    /// with a default target are silently skipped.
    pub async fn send_event(
        &self,
        merchant_id: i64,
        event: &str,
        data: &ParamValue,
        overrides: &HashMap<String, String>,
    ) -> Result<bool> {
        let settings = self.chat.settings(merchant_id).await?;
        if !settings.enabled || !settings.configured || settings.default_chat.is_empty() {
            return Ok(false);
        }

        let template_str = template_for_event(event, overrides);
        let vars = event_variables(event, data);
        let message = template::render(&template_str, &vars, RenderMode::EmptyMissing);
        if message.is_empty() {
            return Ok(false);
        }

        self.chat
            .send(
                merchant_id,
                OutboundMessage {
                    target: ChatTarget::parse(&settings.default_chat),
                    text: message,
                    buttons: Vec::new(),
                },
            )
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::chat::{ChatSettings, DeliveredMessage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn event_variables_pull_nested_fields_without_overwriting() {
        let data: ParamValue = serde_json::from_str(
            r#"{
                "amount": 2990,
                "currency": "usd",
                "user": {"email": "a@b.c", "id": 12},
                "subscription": {"subscriptionId": "sub_9", "plan": {"planName": "Pro"}}
            }"#,
        )
        .unwrap();

        let vars = event_variables("payment.success", &data);
        assert_eq!(vars["event"], "payment.success");
        assert_eq!(vars["userEmail"], "a@b.c");
        assert_eq!(vars["userId"], "12");
        assert_eq!(vars["subscriptionId"], "sub_9");
        assert_eq!(vars["planName"], "Pro");
        assert_eq!(vars["amountFormatted"], "29.9 USD");
    }

    #[test]
    fn overrides_beat_defaults_beat_generic() {
        let mut overrides = HashMap::new();
        overrides.insert("payment.success".to_string(), "Paid: {{amountFormatted}}".to_string());

        assert_eq!(
            template_for_event("payment.success", &overrides),
            "Paid: {{amountFormatted}}"
        );
        assert!(template_for_event("payment.success", &HashMap::new())
            .contains("Payment successful"));
        assert!(template_for_event("something.else", &HashMap::new()).contains("{{event}}"));
    }

    struct FakeChat {
        settings: ChatSettings,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl ChatGateway for FakeChat {
        async fn settings(&self, _merchant_id: i64) -> Result<ChatSettings> {
            Ok(self.settings.clone())
        }

        async fn send(
            &self,
            _merchant_id: i64,
            message: OutboundMessage,
        ) -> Result<DeliveredMessage> {
            self.sent.lock().unwrap().push(message);
            Ok(DeliveredMessage { message_id: 1 })
        }
    }

    #[tokio::test]
    async fn unresolved_placeholders_are_blanked_in_notifications() {
        let chat = Arc::new(FakeChat {
            settings: ChatSettings {
                configured: true,
                enabled: true,
                default_chat: "100".to_string(),
            },
            sent: Mutex::new(Vec::new()),
        });
        let notifier = Notifier::new(chat.clone());

        let data: ParamValue = serde_json::from_str(r#"{"amount": 500}"#).unwrap();
        let sent = notifier
            .send_event(5, "payment.success", &data, &HashMap::new())
            .await
            .unwrap();
        assert!(sent);

        let messages = chat.sent.lock().unwrap();
        // userEmail was unknown: the placeholder renders as empty, not verbatim.
        assert_eq!(
            messages[0].text,
            "\u{2705} Payment successful\nAmount: 5\nUser: "
        );
        assert_eq!(messages[0].target, ChatTarget::Id(100));
    }

    #[tokio::test]
    async fn disabled_chat_skips_delivery() {
        let chat = Arc::new(FakeChat {
            settings: ChatSettings::default(),
            sent: Mutex::new(Vec::new()),
        });
        let notifier = Notifier::new(chat.clone());

        let sent = notifier
            .send_event(5, "payment.success", &ParamValue::object(), &HashMap::new())
            .await
            .unwrap();
        assert!(!sent);
        assert!(chat.sent.lock().unwrap().is_empty());
    }
}
