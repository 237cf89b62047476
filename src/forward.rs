//! Downstream delivery of paired messages
//!
//! Builds the prompt for a completed pair, asks the downstream bot for a
//! reply and hands that reply to the host's outbound channel. Forwarding is
//! best-effort: callers log failures and never surface them to the user.

use crate::event::{Reply, SessionContext};
use crate::pairing::CombinedMessage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Fixed instruction placed before every forwarded image URL and text
pub const INSTRUCTION_PREFIX: &str = "The user has uploaded an image. \
    Look at the image at the URL below and answer the request that follows.";

/// Errors that can occur while forwarding a paired message
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The downstream bot was unreachable or rejected the request
    #[error("Downstream error: {0}")]
    Downstream(String),
    /// The downstream bot did not answer in time
    #[error("Downstream timed out after {0:?}")]
    Timeout(Duration),
    /// The reply could not be delivered to the original conversation
    #[error("Delivery error: {0}")]
    Delivery(String),
}

/// Conversational bot that receives combined prompts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Produce a reply to `prompt` within the conversation described by `session`
    async fn reply(&self, prompt: &str, session: &SessionContext) -> Result<Reply, ForwardError>;
}

/// Host outbound channel for downstream replies
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Send `reply` into the conversation of `session`
    async fn deliver(&self, session: &SessionContext, reply: &Reply) -> Result<(), ForwardError>;
}

/// Build the downstream prompt for an image URL and the user's text
#[must_use]
pub fn compose_prompt(image_url: &str, text: &str) -> String {
    format!("{INSTRUCTION_PREFIX}\nImage: {image_url}\nRequest: {text}")
}

/// Sends completed pairs to the downstream bot
pub struct Forwarder {
    downstream: Arc<dyn Downstream>,
    sink: Arc<dyn ReplySink>,
    timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder with a bounded downstream request time
    #[must_use]
    pub fn new(
        downstream: Arc<dyn Downstream>,
        sink: Arc<dyn ReplySink>,
        timeout: Duration,
    ) -> Self {
        Self {
            downstream,
            sink,
            timeout,
        }
    }

    /// Forward `combined` downstream and deliver the bot's reply
    ///
    /// # Errors
    ///
    /// Returns `ForwardError` if the bot fails, times out, or the reply
    /// cannot be delivered.
    #[instrument(
        skip_all,
        fields(user_id = %combined.user_id, session_id = %combined.session.session_id)
    )]
    pub async fn forward(&self, combined: &CombinedMessage) -> Result<(), ForwardError> {
        let prompt = compose_prompt(&combined.image_url, &combined.text);

        let reply = tokio::time::timeout(
            self.timeout,
            self.downstream.reply(&prompt, &combined.session),
        )
        .await
        .map_err(|_| ForwardError::Timeout(self.timeout))??;

        if reply.content.trim().is_empty() {
            warn!("Downstream bot returned an empty reply");
            return Ok(());
        }

        self.sink.deliver(&combined.session, &reply).await?;
        info!("Forwarded paired message");
        Ok(())
    }
}
