//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按首条 system 消息匹配规则（子串），命中则返回预设回复或错误；
//! 无规则命中时回显最后一条 User 消息。记录调用次数，便于断言「没有第二次外部调用」。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

enum Reply {
    Text(String),
    Fail(String),
}

struct Rule {
    needle: String,
    reply: Reply,
    hits: AtomicUsize,
}

/// Mock 客户端：规则表 + 回显兜底
#[derive(Default)]
pub struct MockLlmClient {
    rules: Vec<Rule>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// system 提示包含 needle 时返回 reply
    pub fn on(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Reply::Text(reply.into()),
            hits: AtomicUsize::new(0),
        });
        self
    }

    /// system 提示包含 needle 时返回错误
    pub fn fail_on(mut self, needle: impl Into<String>, error: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Reply::Fail(error.into()),
            hits: AtomicUsize::new(0),
        });
        self
    }

    /// 每次调用前先睡眠（用于超时测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 总调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 命中指定 needle 的次数
    pub fn hits(&self, needle: &str) -> usize {
        self.rules
            .iter()
            .filter(|r| r.needle == needle)
            .map(|r| r.hits.load(Ordering::SeqCst))
            .sum()
    }

    /// 所有收到的 prompt
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        if let Some(rule) = self.rules.iter().find(|r| system.contains(&r.needle)) {
            rule.hits.fetch_add(1, Ordering::SeqCst);
            return match &rule.reply {
                Reply::Text(t) => Ok(t.clone()),
                Reply::Fail(e) => Err(LlmError::Request(e.clone())),
            };
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rule_matches_system_prompt_only() {
        let mock = MockLlmClient::new().on("분류", r#"{"intents":["qa"]}"#);
        let out = mock
            .complete(&[Message::system("의도 분류기"), Message::user("hello")])
            .await
            .unwrap();
        assert_eq!(out, r#"{"intents":["qa"]}"#);

        // 用户文本里出现 needle 不会命中
        let out = mock.complete(&[Message::user("분류")]).await.unwrap();
        assert_eq!(out, "Echo from Mock: 분류");
        assert_eq!(mock.calls(), 2);
        assert_eq!(mock.hits("분류"), 1);
    }

    #[tokio::test]
    async fn test_fail_rule() {
        let mock = MockLlmClient::new().fail_on("x", "boom");
        let err = mock.complete(&[Message::system("x")]).await.unwrap_err();
        assert_eq!(err, LlmError::Request("boom".into()));
    }
}
