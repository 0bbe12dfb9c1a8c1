//! Agent Unit 契约与注册表
//!
//! 所有单元实现 AgentUnit（name / handle），由 UnitRegistry 按 UnitName 注册与查找；
//! 计划中不在注册表里的步骤一律回退到 qa。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Profile, TutorError};
use crate::memory::{ContextMutation, ContextStore};

/// 计划步骤名（固定词表）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnitName {
    #[serde(rename = "retrieve")]
    Retrieve,
    #[serde(rename = "summarize")]
    Summarize,
    #[serde(rename = "explain-term")]
    ExplainTerm,
    #[serde(rename = "quiz")]
    Quiz,
    #[serde(rename = "qa")]
    Qa,
}

impl UnitName {
    pub const ALL: [UnitName; 5] = [
        UnitName::Retrieve,
        UnitName::Summarize,
        UnitName::ExplainTerm,
        UnitName::Quiz,
        UnitName::Qa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitName::Retrieve => "retrieve",
            UnitName::Summarize => "summarize",
            UnitName::ExplainTerm => "explain-term",
            UnitName::Quiz => "quiz",
            UnitName::Qa => "qa",
        }
    }

    /// 依赖序：retrieve < summarize < explain-term < quiz；qa 无依赖
    pub fn dependency_rank(&self) -> Option<u8> {
        match self {
            UnitName::Retrieve => Some(0),
            UnitName::Summarize => Some(1),
            UnitName::ExplainTerm => Some(2),
            UnitName::Quiz => Some(3),
            UnitName::Qa => None,
        }
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitName {
    type Err = TutorError;

    /// 同时接受旧的步骤别名（news_find / news_summary / term_explain）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retrieve" | "news_find" => Ok(UnitName::Retrieve),
            "summarize" | "news_summary" => Ok(UnitName::Summarize),
            "explain-term" | "explain_term" | "term_explain" => Ok(UnitName::ExplainTerm),
            "quiz" => Ok(UnitName::Quiz),
            "qa" => Ok(UnitName::Qa),
            other => Err(TutorError::UnknownUnit(other.to_string())),
        }
    }
}

/// 单元输入：本轮用户文本 + 画像
#[derive(Debug, Clone)]
pub struct UnitInput {
    pub text: String,
    pub profile: Profile,
}

impl UnitInput {
    pub fn new(text: impl Into<String>, profile: Profile) -> Self {
        Self {
            text: text.into(),
            profile,
        }
    }
}

/// 单元输出：一条回复 + 对自己所属字段的变更
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOutput {
    pub reply: String,
    pub mutations: Vec<ContextMutation>,
}

impl UnitOutput {
    pub fn reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            mutations: Vec::new(),
        }
    }

    pub fn with(mut self, mutation: ContextMutation) -> Self {
        self.mutations.push(mutation);
        self
    }
}

/// Agent Unit：只暴露一个 handle；可读任意 context 字段，写入通过 mutations 返回
#[async_trait]
pub trait AgentUnit: Send + Sync {
    fn name(&self) -> UnitName;

    async fn handle(&self, input: &UnitInput, ctx: &ContextStore) -> Result<UnitOutput, TutorError>;
}

/// 单元注册表：按 UnitName 存储 Arc<dyn AgentUnit>
#[derive(Default, Clone)]
pub struct UnitRegistry {
    units: HashMap<UnitName, Arc<dyn AgentUnit>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, unit: impl AgentUnit + 'static) {
        self.units.insert(unit.name(), Arc::new(unit));
    }

    pub fn register_arc(&mut self, unit: Arc<dyn AgentUnit>) {
        self.units.insert(unit.name(), unit);
    }

    pub fn get(&self, name: UnitName) -> Option<Arc<dyn AgentUnit>> {
        self.units.get(&name).cloned()
    }

    pub fn contains(&self, name: UnitName) -> bool {
        self.units.contains_key(&name)
    }

    /// 查找单元；未注册时回退到 qa（qa 也未注册则返回 None）
    pub fn resolve(&self, name: UnitName) -> Option<Arc<dyn AgentUnit>> {
        if let Some(unit) = self.get(name) {
            return Some(unit);
        }
        tracing::warn!(unit = %name, "unit not registered, falling back to qa");
        self.get(UnitName::Qa)
    }

    pub fn names(&self) -> Vec<UnitName> {
        let mut names: Vec<_> = self.units.keys().copied().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(UnitName);

    #[async_trait]
    impl AgentUnit for Fixed {
        fn name(&self) -> UnitName {
            self.0
        }

        async fn handle(&self, _input: &UnitInput, _ctx: &ContextStore) -> Result<UnitOutput, TutorError> {
            Ok(UnitOutput::reply(self.0.as_str()))
        }
    }

    #[test]
    fn test_parse_aliases_and_serde_names() {
        assert_eq!("news_find".parse::<UnitName>().unwrap(), UnitName::Retrieve);
        assert_eq!("term_explain".parse::<UnitName>().unwrap(), UnitName::ExplainTerm);
        assert!(matches!(
            "weather".parse::<UnitName>(),
            Err(TutorError::UnknownUnit(_))
        ));
        assert_eq!(
            serde_json::to_string(&UnitName::ExplainTerm).unwrap(),
            "\"explain-term\""
        );
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_qa() {
        let mut registry = UnitRegistry::new();
        registry.register(Fixed(UnitName::Qa));
        let unit = registry.resolve(UnitName::Summarize).unwrap();
        assert_eq!(unit.name(), UnitName::Qa);

        let out = unit
            .handle(&UnitInput::new("x", Profile::default()), &ContextStore::default())
            .await
            .unwrap();
        assert_eq!(out.reply, "qa");
    }
}
