//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；每次请求施加超时。
//! 结构化请求打开 JSON 模式，并把 Schema 作为最后一条 system 指令附上。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::LlmSection;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

#[derive(Debug, Default)]
struct UsageCounter {
    prompt: AtomicU64,
    completion: AtomicU64,
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    usage: UsageCounter,
}

impl OpenAiClient {
    /// api_key 为空时读 OPENAI_API_KEY
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!("no API key configured for the OpenAI-compatible client");
        }

        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
            usage: UsageCounter::default(),
        }
    }

    pub fn from_section(section: &LlmSection) -> Self {
        Self::new(
            section.base_url.as_deref(),
            &section.model,
            section.api_key.as_deref(),
            section.request_timeout_secs,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, messages: &[Message], json_mode: bool) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(to_openai_messages(messages)?);
        if json_mode {
            args.response_format(ResponseFormat::JsonObject);
        }
        args.build().map_err(|e| LlmError::Request(e.to_string()))
    }

    async fn send(&self, request: CreateChatCompletionRequest) -> Result<String, LlmError> {
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .prompt
                .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
            self.usage
                .completion
                .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

fn to_openai_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
    messages
        .iter()
        .map(|m| {
            let content = m.content.clone();
            let built = match m.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(content)
                    .build()
                    .map(ChatCompletionRequestMessage::System),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(content)
                    .build()
                    .map(ChatCompletionRequestMessage::User),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content)
                    .build()
                    .map(ChatCompletionRequestMessage::Assistant),
            };
            built.map_err(|e| LlmError::Request(e.to_string()))
        })
        .collect()
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = self.request(messages, false)?;
        self.send(request).await
    }

    async fn complete_structured(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        let mut full = messages.to_vec();
        full.push(Message::system(format!(
            "Respond with a single JSON object conforming to this JSON Schema:\n{}",
            schema
        )));
        let request = self.request(&full, true)?;
        tracing::debug!(model = %self.model, "structured completion");
        self.send(request).await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        let prompt = self.usage.prompt.load(Ordering::Relaxed);
        let completion = self.usage.completion.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_map_to_request_messages() {
        let converted = to_openai_messages(&[
            Message::system("sys"),
            Message::user("질문"),
            Message::assistant("답"),
        ])
        .unwrap();
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(converted[2], ChatCompletionRequestMessage::Assistant(_)));
    }

    #[test]
    fn test_from_section_uses_model() {
        let client = OpenAiClient::from_section(&LlmSection {
            api_key: Some("sk-test".into()),
            ..LlmSection::default()
        });
        assert_eq!(client.model(), "gpt-4o-mini");
        assert_eq!(client.token_usage(), (0, 0, 0));
    }
}
