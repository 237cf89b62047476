//! Delivers downstream bot replies back into the Telegram conversation.

use crate::event::{Reply, SessionContext};
use crate::forward::{ForwardError, ReplySink};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ReplyParameters};

/// Reply sink that answers in the original chat, threaded to the original message
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    /// Create a sink sending through `bot`
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ReplySink for TelegramSink {
    async fn deliver(&self, session: &SessionContext, reply: &Reply) -> Result<(), ForwardError> {
        let chat_id: i64 = session
            .session_id
            .parse()
            .map_err(|_| ForwardError::Delivery(format!("bad chat id {}", session.session_id)))?;

        let mut request = self.bot.send_message(ChatId(chat_id), reply.content.clone());
        if let Ok(message_id) = session.message_ref.parse::<i32>() {
            request = request.reply_parameters(ReplyParameters::new(MessageId(message_id)));
        }

        request
            .await
            .map_err(|e| ForwardError::Delivery(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::UserId;

    #[tokio::test]
    async fn test_non_numeric_chat_id_is_delivery_error() {
        let sink = TelegramSink::new(Bot::new("123456:TEST"));
        let session = SessionContext {
            session_id: "not-a-chat".to_string(),
            message_ref: "1".to_string(),
            user_id: UserId::new("1"),
        };

        let err = sink
            .deliver(&session, &Reply::text("hi"))
            .await
            .expect_err("chat id must be numeric");
        assert!(matches!(err, ForwardError::Delivery(_)));
    }
}
