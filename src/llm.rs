//! OpenAI-compatible downstream bot
//!
//! Answers forwarded prompts with a chat model and keeps a short per-session
//! history so follow-ups in the same conversation have context.

use crate::config::{
    Settings, DEFAULT_SYSTEM_MESSAGE, LLM_HISTORY_MESSAGES, LLM_MAX_TOKENS,
    LLM_SESSION_MAX_CAPACITY, LLM_SESSION_TTL_SECS,
};
use crate::event::{Reply, SessionContext};
use crate::forward::{Downstream, ForwardError};
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Turn {
    User(String),
    Assistant(String),
}

/// Chat model behind an OpenAI-compatible API
pub struct LlmBot {
    client: Client<OpenAIConfig>,
    model: String,
    system_message: String,
    history: Cache<String, Vec<Turn>>,
}

impl LlmBot {
    /// Create a bot for `api_base` using `model`
    #[must_use]
    pub fn new(api_key: &str, api_base: &str, model: &str, system_message: Option<&str>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        let history = Cache::builder()
            .max_capacity(LLM_SESSION_MAX_CAPACITY)
            .time_to_idle(Duration::from_secs(LLM_SESSION_TTL_SECS))
            .build();

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            system_message: system_message.unwrap_or(DEFAULT_SYSTEM_MESSAGE).to_string(),
            history,
        }
    }

    /// Create a bot from settings, `None` without an API key
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let key = settings.llm_api_key.as_deref().filter(|k| !k.trim().is_empty())?;
        Some(Self::new(
            key,
            &settings.llm_api_base,
            &settings.llm_model,
            settings.system_message.as_deref(),
        ))
    }

    fn build_messages(
        &self,
        history: &[Turn],
        prompt: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, ForwardError> {
        let mut messages = vec![ChatCompletionRequestSystemMessageArgs::default()
            .content(self.system_message.as_str())
            .build()
            .map_err(|e| ForwardError::Downstream(e.to_string()))?
            .into()];

        for turn in history {
            let m = match turn {
                Turn::User(content) => ChatCompletionRequestUserMessageArgs::default()
                    .content(content.as_str())
                    .build()
                    .map_err(|e| ForwardError::Downstream(e.to_string()))?
                    .into(),
                Turn::Assistant(content) => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content.as_str())
                    .build()
                    .map_err(|e| ForwardError::Downstream(e.to_string()))?
                    .into(),
            };
            messages.push(m);
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|e| ForwardError::Downstream(e.to_string()))?
                .into(),
        );
        Ok(messages)
    }

    /// Append one exchange to the session history, keeping the newest messages
    ///
    /// Applied to the entry currently stored, so concurrent replies in the
    /// same session all land in the history.
    async fn record_exchange(&self, session_id: &str, prompt: &str, content: &str) {
        let entry = self
            .history
            .entry(session_id.to_string())
            .and_upsert_with(|existing| {
                let mut history = existing.map(|e| e.into_value()).unwrap_or_default();
                history.push(Turn::User(prompt.to_string()));
                history.push(Turn::Assistant(content.to_string()));
                if history.len() > LLM_HISTORY_MESSAGES {
                    let excess = history.len() - LLM_HISTORY_MESSAGES;
                    history.drain(..excess);
                }
                std::future::ready(history)
            })
            .await;

        debug!(
            session_id = %session_id,
            turns = entry.value().len(),
            "Updated session history"
        );
    }
}

#[async_trait]
impl Downstream for LlmBot {
    async fn reply(&self, prompt: &str, session: &SessionContext) -> Result<Reply, ForwardError> {
        let history = self
            .history
            .get(&session.session_id)
            .await
            .unwrap_or_default();

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(self.build_messages(&history, prompt)?)
            .max_tokens(LLM_MAX_TOKENS)
            .build()
            .map_err(|e| ForwardError::Downstream(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ForwardError::Downstream(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ForwardError::Downstream("Empty response".to_string()))?;

        self.record_exchange(&session.session_id, prompt, &content).await;

        Ok(Reply::text(content))
    }
}
