//! 导师运行时错误类型
//!
//! 所有错误在单元执行器边界被转换为面向用户的道歉消息（见 agents::executor），
//! 不会穿透编排循环；分类失败由 Planner 自行回退到 `[qa]`。

use thiserror::Error;

use crate::llm::LlmError;

/// 编排核心中可能出现的错误（LLM、解析、单元、外部服务、存储等）
#[derive(Error, Debug)]
pub enum TutorError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Unit execution failed: {0}")]
    UnitFailed(String),

    #[error("Unit timeout: {0}")]
    UnitTimeout(String),

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<serde_json::Error> for TutorError {
    fn from(e: serde_json::Error) -> Self {
        TutorError::JsonParse(e.to_string())
    }
}

impl From<config::ConfigError> for TutorError {
    fn from(e: config::ConfigError) -> Self {
        TutorError::Config(e.to_string())
    }
}
