//! Billing-domain collaborator: subscription/user/invoice/plan lookups plus
//! the two mutating calls the `unibee_api` step can issue.
//!
//! Statuses cross this boundary as enums; the fixed human labels the action
//! exposes as variables come from the `Display` derives.

use anyhow::Result;
use async_trait::async_trait;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
    Suspended,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Processing,
    Paid,
    Failed,
    Cancelled,
    Reversed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PlanStatus {
    Editing,
    Active,
    Inactive,
    Expired,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub current_period_end: i64,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub plan_id: i64,
    pub name: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub interval_unit: String,
    pub interval_count: i32,
    pub description: String,
    pub status: PlanStatus,
}

#[derive(Debug, Clone)]
pub struct UserAccount {
    pub user_id: i64,
    pub email: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub language: String,
}

/// A subscription with its plan and owner, as returned by detail lookups.
#[derive(Debug, Clone)]
pub struct SubscriptionDetail {
    pub subscription: Subscription,
    pub plan: Option<Plan>,
    pub user: Option<UserAccount>,
}

#[derive(Debug, Clone)]
pub struct InvoiceSummary {
    pub invoice_id: String,
    /// Minor units.
    pub total_amount: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub subscription_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountType {
    Percentage,
    FixedAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountBillingType {
    OneTime,
    Recurring,
}

#[derive(Debug, Clone)]
pub struct NewDiscount {
    pub code: String,
    pub name: Option<String>,
    pub discount_type: DiscountType,
    pub billing_type: DiscountBillingType,
    pub percentage: i64,
    /// Minor units; used with [`DiscountType::FixedAmount`].
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct DiscountCode {
    pub discount_id: String,
    pub code: String,
}

#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn subscription_by_id(
        &self,
        merchant_id: i64,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionDetail>>;

    /// The user's first active-or-incomplete subscription, if any.
    async fn active_subscription_for_user(
        &self,
        merchant_id: i64,
        user_id: i64,
    ) -> Result<Option<SubscriptionDetail>>;

    async fn user_by_id(&self, merchant_id: i64, user_id: i64) -> Result<Option<UserAccount>>;

    async fn user_by_email(&self, merchant_id: i64, email: &str) -> Result<Option<UserAccount>>;

    /// Most recent invoices first.
    async fn invoices_for_user(
        &self,
        merchant_id: i64,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<InvoiceSummary>>;

    /// Flags the subscription to end at the current period boundary. Mutates
    /// billing state; duplicate scenario runs duplicate the flag write.
    async fn cancel_subscription_at_period_end(
        &self,
        merchant_id: i64,
        subscription_id: &str,
    ) -> Result<()>;

    async fn discount_by_code(
        &self,
        merchant_id: i64,
        code: &str,
    ) -> Result<Option<DiscountCode>>;

    /// Creates a discount code. Mutates billing state; not deduplicated
    /// across runs.
    async fn create_discount(&self, merchant_id: i64, discount: NewDiscount)
        -> Result<DiscountCode>;

    async fn activate_discount(&self, merchant_id: i64, discount_id: &str) -> Result<()>;

    async fn plan_by_id(&self, merchant_id: i64, plan_id: i64) -> Result<Option<Plan>>;
}
