//! Outbound side of the chat transport, as seen by the course engine.

use anyhow::Result;
use serenity::async_trait;

use crate::models::UserId;

/// Identifier the transport assigns to a delivered message.
pub type MessageId = u64;

/// Sends direct messages to users by identity.
///
/// Handed to the pacer, the curator proxy and the admin broadcast, so none of them
/// reach for a global bot handle.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, user: UserId, text: &str) -> Result<MessageId>;
}
