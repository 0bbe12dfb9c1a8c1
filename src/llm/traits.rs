//! 文本生成服务抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（自由文本）、
//! complete_structured（附带输出 JSON Schema 提示，返回应符合该 Schema 的文本）。
//! 调用方必须防御式解析返回内容并在失败时回退。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 文本生成失败（请求失败、空响应、超时）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("empty response")]
    EmptyResponse,

    #[error("timeout after {0}s")]
    Timeout(u64),
}

/// LLM 客户端 trait：非流式完成 + 带 Schema 提示的结构化完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 结构化完成：默认实现把 Schema 作为额外 system 指令拼在最前，再走 complete
    async fn complete_structured(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        let mut full = Vec::with_capacity(messages.len() + 1);
        full.extend(messages.iter().cloned());
        full.push(Message::system(format!(
            "Respond with a single JSON object only (no markdown, no prose) conforming to this JSON Schema:\n{}",
            schema
        )));
        self.complete(&full).await
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
