//! `unibee_api`: run an internal billing query or mutation and flatten the
//! result into string variables.
//!
//! Sub-actions are independently idempotent except `cancel_subscription`
//! and `create_discount`, which mutate billing state; duplicate scenario
//! runs duplicate those side effects (operational caveat, not deduplicated
//! here).

use std::sync::Arc;

use async_trait::async_trait;

use crate::dsl::{ParamValue, Params};
use crate::engine::ExecutionContext;
use crate::error::ActionError;
use crate::format::minor_units_to_decimal;
use crate::gateway::billing::{
    BillingGateway, DiscountBillingType, DiscountType, NewDiscount, SubscriptionDetail,
    UserAccount,
};

use super::{Action, ActionOutput, ResolvedStep};

pub struct BillingApiAction {
    billing: Arc<dyn BillingGateway>,
}

impl BillingApiAction {
    pub fn new(billing: Arc<dyn BillingGateway>) -> Self {
        Self { billing }
    }
}

#[async_trait]
impl Action for BillingApiAction {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        step: &ResolvedStep,
    ) -> Result<ActionOutput, ActionError> {
        let action = step.require_str("action")?;
        let params = step
            .params
            .object_of("params")
            .map(|map| Params(map.clone()))
            .unwrap_or_default();

        match action {
            "get_subscription" => self.get_subscription(ctx, &params).await,
            "get_user" => self.get_user(ctx, &params).await,
            "get_invoice_list" => self.get_invoice_list(ctx, &params).await,
            "cancel_subscription" => self.cancel_subscription(ctx, &params).await,
            "create_discount" => self.create_discount(ctx, &params).await,
            "get_plan" => self.get_plan(ctx, &params).await,
            other => Err(ActionError::new(format!(
                "unibee_api: unknown action \"{other}\""
            ))),
        }
    }
}

impl BillingApiAction {
    async fn get_subscription(
        &self,
        ctx: &ExecutionContext,
        params: &Params,
    ) -> Result<ActionOutput, ActionError> {
        if let Some(subscription_id) = string_arg(params, ctx, "subscriptionId") {
            let detail = self
                .billing
                .subscription_by_id(ctx.merchant_id, &subscription_id)
                .await
                .map_err(|e| ActionError::new(format!("unibee_api: get_subscription failed: {e:#}")))?;
            return Ok(match detail {
                Some(detail) => subscription_to_vars(&detail),
                None => not_found(),
            });
        }

        let Some(user_id) = i64_arg(params, ctx, "userId") else {
            return Err(ActionError::new(
                "unibee_api: get_subscription requires subscriptionId or userId",
            ));
        };

        let detail = self
            .billing
            .active_subscription_for_user(ctx.merchant_id, user_id)
            .await
            .map_err(|e| ActionError::new(format!("unibee_api: get_subscription failed: {e:#}")))?;
        Ok(match detail {
            Some(detail) => subscription_to_vars(&detail),
            None => not_found(),
        })
    }

    async fn get_user(
        &self,
        ctx: &ExecutionContext,
        params: &Params,
    ) -> Result<ActionOutput, ActionError> {
        let user = if let Some(user_id) = i64_arg(params, ctx, "userId") {
            self.billing
                .user_by_id(ctx.merchant_id, user_id)
                .await
                .map_err(|e| ActionError::new(format!("unibee_api: get_user failed: {e:#}")))?
        } else if let Some(email) = string_arg(params, ctx, "email") {
            self.billing
                .user_by_email(ctx.merchant_id, &email)
                .await
                .map_err(|e| ActionError::new(format!("unibee_api: get_user failed: {e:#}")))?
        } else {
            return Err(ActionError::new("unibee_api: get_user requires userId or email"));
        };

        Ok(match user {
            Some(user) => user_to_vars(&user),
            None => not_found(),
        })
    }

    async fn get_invoice_list(
        &self,
        ctx: &ExecutionContext,
        params: &Params,
    ) -> Result<ActionOutput, ActionError> {
        let Some(user_id) = i64_arg(params, ctx, "userId") else {
            return Err(ActionError::new("unibee_api: get_invoice_list requires userId"));
        };

        let limit = match int_param(params, "limit") {
            Some(n) if (1..=20).contains(&n) => n as usize,
            _ => 5,
        };

        let invoices = self
            .billing
            .invoices_for_user(ctx.merchant_id, user_id, limit)
            .await
            .map_err(|e| ActionError::new(format!("unibee_api: get_invoice_list failed: {e:#}")))?;

        let mut output = ActionOutput::new();
        output.insert("found".to_string(), ParamValue::from("true"));
        output.insert(
            "invoice_count".to_string(),
            ParamValue::from(invoices.len().to_string()),
        );

        if invoices.is_empty() {
            return Ok(output);
        }

        let mut entries = Vec::with_capacity(invoices.len());
        let mut lines = Vec::with_capacity(invoices.len());
        for (i, invoice) in invoices.iter().enumerate() {
            let amount = minor_units_to_decimal(invoice.total_amount);
            let status = invoice.status.to_string();
            lines.push(format!(
                "{}. {} {} - {} ({})",
                i + 1,
                amount,
                invoice.currency.to_uppercase(),
                status,
                invoice.invoice_id
            ));
            entries.push(serde_json::json!({
                "invoiceId": invoice.invoice_id,
                "amount": amount,
                "currency": invoice.currency,
                "status": status,
                "subscriptionId": invoice.subscription_id,
            }));
        }

        let encoded = serde_json::to_string(&entries)
            .map_err(|e| ActionError::new(format!("unibee_api: get_invoice_list failed: {e}")))?;
        output.insert("invoices_json".to_string(), ParamValue::from(encoded));
        output.insert("invoices_text".to_string(), ParamValue::from(lines.join("\n")));
        Ok(output)
    }

    async fn cancel_subscription(
        &self,
        ctx: &ExecutionContext,
        params: &Params,
    ) -> Result<ActionOutput, ActionError> {
        let Some(subscription_id) = string_arg(params, ctx, "subscriptionId") else {
            return Err(ActionError::new(
                "unibee_api: cancel_subscription requires subscriptionId",
            ));
        };

        let existing = self
            .billing
            .subscription_by_id(ctx.merchant_id, &subscription_id)
            .await
            .map_err(|e| ActionError::new(format!("unibee_api: cancel_subscription failed: {e:#}")))?;
        if existing.is_none() {
            return Err(ActionError::new(format!(
                "unibee_api: subscription {subscription_id} not found"
            )));
        }

        // Cancel at period end rather than immediately.
        self.billing
            .cancel_subscription_at_period_end(ctx.merchant_id, &subscription_id)
            .await
            .map_err(|e| ActionError::new(format!("unibee_api: cancel_subscription failed: {e:#}")))?;

        tracing::info!(
            execution_id = %ctx.execution_id,
            subscription_id = %subscription_id,
            "subscription flagged to cancel at period end"
        );

        let mut output = ActionOutput::new();
        output.insert("cancelled".to_string(), ParamValue::from("true"));
        output.insert("subscriptionId".to_string(), ParamValue::from(subscription_id));
        Ok(output)
    }

    async fn create_discount(
        &self,
        ctx: &ExecutionContext,
        params: &Params,
    ) -> Result<ActionOutput, ActionError> {
        let Some(code) = string_arg(params, ctx, "code") else {
            return Err(ActionError::new("unibee_api: create_discount requires code"));
        };

        if let Some(existing) = self
            .billing
            .discount_by_code(ctx.merchant_id, &code)
            .await
            .map_err(|e| ActionError::new(format!("unibee_api: create_discount failed: {e:#}")))?
        {
            let mut output = ActionOutput::new();
            output.insert("discount_id".to_string(), ParamValue::from(existing.discount_id));
            output.insert("code".to_string(), ParamValue::from(existing.code));
            output.insert("already_exists".to_string(), ParamValue::from("true"));
            return Ok(output);
        }

        let discount_type = match int_param(params, "discountType") {
            Some(2) => DiscountType::FixedAmount,
            _ => DiscountType::Percentage,
        };
        let billing_type = match int_param(params, "billingType") {
            Some(1) => DiscountBillingType::OneTime,
            _ => DiscountBillingType::Recurring,
        };

        let discount = NewDiscount {
            code: code.clone(),
            name: string_arg(params, ctx, "name"),
            discount_type,
            billing_type,
            percentage: int_param(params, "discountPercentage").unwrap_or(0),
            amount: int_param(params, "discountAmount").unwrap_or(0),
            currency: string_arg(params, ctx, "currency").unwrap_or_default(),
        };

        let created = self
            .billing
            .create_discount(ctx.merchant_id, discount)
            .await
            .map_err(|e| ActionError::new(format!("unibee_api: create_discount failed: {e:#}")))?;

        if let Err(e) = self
            .billing
            .activate_discount(ctx.merchant_id, &created.discount_id)
            .await
        {
            tracing::warn!(
                execution_id = %ctx.execution_id,
                code = %created.code,
                "failed to activate discount code: {e:#}"
            );
        }

        let mut output = ActionOutput::new();
        output.insert("discount_id".to_string(), ParamValue::from(created.discount_id));
        output.insert("code".to_string(), ParamValue::from(created.code));
        output.insert("created".to_string(), ParamValue::from("true"));
        Ok(output)
    }

    async fn get_plan(
        &self,
        ctx: &ExecutionContext,
        params: &Params,
    ) -> Result<ActionOutput, ActionError> {
        let Some(plan_id) = i64_arg(params, ctx, "planId") else {
            return Err(ActionError::new("unibee_api: get_plan requires planId"));
        };

        let Some(plan) = self
            .billing
            .plan_by_id(ctx.merchant_id, plan_id)
            .await
            .map_err(|e| ActionError::new(format!("unibee_api: get_plan failed: {e:#}")))?
        else {
            return Ok(not_found());
        };

        let mut output = ActionOutput::new();
        output.insert("found".to_string(), ParamValue::from("true"));
        output.insert("plan_id".to_string(), ParamValue::from(plan.plan_id.to_string()));
        output.insert("plan_name".to_string(), ParamValue::from(plan.name));
        output.insert(
            "amount".to_string(),
            ParamValue::from(minor_units_to_decimal(plan.amount)),
        );
        output.insert("currency".to_string(), ParamValue::from(plan.currency));
        output.insert(
            "interval".to_string(),
            ParamValue::from(format!("{} {}", plan.interval_count, plan.interval_unit)),
        );
        output.insert("description".to_string(), ParamValue::from(plan.description));
        output.insert("plan_status".to_string(), ParamValue::from(plan.status.to_string()));
        Ok(output)
    }
}

fn not_found() -> ActionOutput {
    let mut output = ActionOutput::new();
    output.insert("found".to_string(), ParamValue::from("false"));
    output
}

fn subscription_to_vars(detail: &SubscriptionDetail) -> ActionOutput {
    let mut output = ActionOutput::new();
    output.insert("found".to_string(), ParamValue::from("true"));

    let sub = &detail.subscription;
    output.insert(
        "subscription_id".to_string(),
        ParamValue::from(sub.subscription_id.clone()),
    );
    output.insert(
        "subscription_status".to_string(),
        ParamValue::from(sub.status.to_string()),
    );
    output.insert(
        "subscription_amount".to_string(),
        ParamValue::from(minor_units_to_decimal(sub.amount)),
    );
    output.insert(
        "subscription_currency".to_string(),
        ParamValue::from(sub.currency.clone()),
    );
    output.insert(
        "period_end".to_string(),
        ParamValue::from(sub.current_period_end.to_string()),
    );

    if let Some(plan) = &detail.plan {
        output.insert("plan_name".to_string(), ParamValue::from(plan.name.clone()));
        output.insert(
            "interval_unit".to_string(),
            ParamValue::from(plan.interval_unit.clone()),
        );
    }
    if let Some(user) = &detail.user {
        output.insert("user_email".to_string(), ParamValue::from(user.email.clone()));
    }
    output
}

fn user_to_vars(user: &UserAccount) -> ActionOutput {
    let mut output = ActionOutput::new();
    output.insert("found".to_string(), ParamValue::from("true"));
    output.insert("user_id".to_string(), ParamValue::from(user.user_id.to_string()));
    output.insert("user_email".to_string(), ParamValue::from(user.email.clone()));
    output.insert("user_userName".to_string(), ParamValue::from(user.user_name.clone()));
    output.insert("user_firstName".to_string(), ParamValue::from(user.first_name.clone()));
    output.insert("user_lastName".to_string(), ParamValue::from(user.last_name.clone()));
    output.insert("user_language".to_string(), ParamValue::from(user.language.clone()));
    output
}

/// Parameter value, falling back to an execution variable of the same name.
fn string_arg(params: &Params, ctx: &ExecutionContext, key: &str) -> Option<String> {
    params
        .str_of(key)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| ctx.variables.get(key).filter(|s| !s.is_empty()).cloned())
}

fn i64_arg(params: &Params, ctx: &ExecutionContext, key: &str) -> Option<i64> {
    if let Some(raw) = string_arg(params, ctx, key) {
        return raw.parse().ok();
    }
    params.i64_of(key)
}

/// Numeric parameter, accepting numbers and numeric strings. Does not
/// consult variables.
fn int_param(params: &Params, key: &str) -> Option<i64> {
    match params.get(key) {
        Some(ParamValue::Number(n)) => n.as_i64(),
        Some(ParamValue::String(s)) => s.parse().ok(),
        _ => None,
    }
}
