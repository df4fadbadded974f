//! Email delivery collaborator.

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct EmailRequest {
    pub merchant_id: i64,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send(&self, request: EmailRequest) -> Result<()>;
}
