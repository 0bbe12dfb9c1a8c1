//! LLM 层：文本生成服务抽象与实现（OpenAI 兼容 / Mock）+ 结构化输出解析

pub mod mock;
pub mod openai;
pub mod structured;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use structured::{ask_json, extract_json, parse_structured, schema_of};
pub use traits::{LlmClient, LlmError};
