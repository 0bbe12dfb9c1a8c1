//! 结构化输出：Schema 提示 + 防御式 JSON 解析
//!
//! extract_json 从文本中剥离 ```json 代码块或截取首尾花括号；
//! ask_json 为 T 生成 JSON Schema，调用 complete_structured 并解析为 T。

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::core::TutorError;
use crate::llm::LlmClient;
use crate::memory::Message;

/// 从 LLM 输出中提取 JSON 片段（```json ... ```、``` ... ``` 或首个 `{` 到最后一个 `}`）
pub fn extract_json(output: &str) -> &str {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// 解析为 T；失败时返回 JsonParse（附原文，便于日志排查）
pub fn parse_structured<T: DeserializeOwned>(output: &str) -> Result<T, TutorError> {
    let json_str = extract_json(output);
    serde_json::from_str(json_str)
        .map_err(|e| TutorError::JsonParse(format!("{}: {}", e, json_str)))
}

/// T 的 JSON Schema（作为输出 Schema 提示传给文本生成服务）
pub fn schema_of<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(serde_json::Value::Null)
}

/// 带 Schema 提示调用 LLM 并解析为 T
pub async fn ask_json<T>(llm: &dyn LlmClient, messages: &[Message]) -> Result<T, TutorError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = schema_of::<T>();
    let raw = llm.complete_structured(messages, &schema).await?;
    parse_structured(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Probe {
        intents: Vec<String>,
    }

    #[test]
    fn test_extract_fenced_json() {
        let raw = "설명입니다\n```json\n{\"intents\": [\"qa\"]}\n```\n끝";
        let p: Probe = parse_structured(raw).unwrap();
        assert_eq!(p.intents, vec!["qa"]);
    }

    #[test]
    fn test_extract_bare_braces() {
        let raw = "sure! {\"intents\": [\"retrieve\", \"quiz\"]} hope it helps";
        let p: Probe = parse_structured(raw).unwrap();
        assert_eq!(p.intents.len(), 2);
    }

    #[test]
    fn test_malformed_is_json_parse_error() {
        let err = parse_structured::<Probe>("no json here").unwrap_err();
        assert!(matches!(err, TutorError::JsonParse(_)));
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = schema_of::<Probe>();
        assert!(schema.to_string().contains("intents"));
    }
}
