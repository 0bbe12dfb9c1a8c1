//! Context Store：单个会话内跨轮次携带的派生产物
//!
//! 选中的文章、生成的摘要、进行中的测验、批量模式文章池、术语解释列表。
//! 单元不直接改写 ContextStore，而是返回 ContextMutation，由编排循环按归属校验后应用。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::UnitName;
use crate::core::Level;

/// 文章记录（检索单元产出）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// 搜索结果摘要片段
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub content: String,
}

/// 文章中的数值指标
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Metric {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub period: String,
}

/// 术语及其解释
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TermExplanation {
    pub term: String,
    pub definition: String,
}

/// 按文章分组的术语解释
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermExplanationGroup {
    pub title: String,
    pub definitions: Vec<TermExplanation>,
}

/// 摘要记录（摘要单元产出）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub title: String,
    pub url: String,
    pub level: Level,
    /// 5 句核心摘要
    pub body: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub term_candidates: Vec<String>,
    /// 生成失败时的原因（占位摘要）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Summary {
    /// 无法生成时的占位摘要
    pub fn placeholder(article: &Article, level: Level, body: &str, error: &str) -> Self {
        Self {
            title: article.title.clone(),
            url: article.url.clone(),
            level,
            body: body.to_string(),
            key_points: vec![],
            metrics: vec![],
            term_candidates: vec![],
            error: Some(error.to_string()),
        }
    }

    /// 标题 + 正文 + 术语候选，用于判断某个术语是否出现在本摘要中
    pub fn mentions(&self, term: &str) -> bool {
        self.title.contains(term)
            || self.body.contains(term)
            || self.term_candidates.iter().any(|t| t.contains(term))
    }
}

/// 测验题型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizKind {
    Ox,
    MultipleChoice,
    ShortAnswer,
}

impl QuizKind {
    pub fn label(&self) -> &'static str {
        match self {
            QuizKind::Ox => "OX 퀴즈",
            QuizKind::MultipleChoice => "객관식",
            QuizKind::ShortAnswer => "단답형",
        }
    }
}

/// 正确答案（按题型区分）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuizAnswer {
    Ox { correct: bool },
    MultipleChoice { options: Vec<String>, correct_index: usize },
    ShortAnswer { accepted: Vec<String> },
}

/// 进行中的测验题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizRecord {
    pub question: String,
    pub answer: QuizAnswer,
    pub rationale: String,
    /// 是否为经济术语测验
    #[serde(default)]
    pub term_quiz: bool,
}

impl QuizRecord {
    pub fn kind(&self) -> QuizKind {
        match self.answer {
            QuizAnswer::Ox { .. } => QuizKind::Ox,
            QuizAnswer::MultipleChoice { .. } => QuizKind::MultipleChoice,
            QuizAnswer::ShortAnswer { .. } => QuizKind::ShortAnswer,
        }
    }

    pub fn options(&self) -> &[String] {
        match &self.answer {
            QuizAnswer::MultipleChoice { options, .. } => options,
            _ => &[],
        }
    }

    /// 展示用正确答案：OX -> "O"/"X"，客观题 -> "n. 选项"，简答 -> 以 ", " 连接
    pub fn formatted_answer(&self) -> String {
        match &self.answer {
            QuizAnswer::Ox { correct } => if *correct { "O" } else { "X" }.to_string(),
            QuizAnswer::MultipleChoice {
                options,
                correct_index,
            } => match options.get(*correct_index) {
                Some(opt) => format!("{}. {}", correct_index + 1, opt),
                None => "[정답 오류]".to_string(),
            },
            QuizAnswer::ShortAnswer { accepted } => accepted.join(", "),
        }
    }

    /// 正确答案的纯文本（批量导出用）
    pub fn answer_text(&self) -> String {
        match &self.answer {
            QuizAnswer::MultipleChoice {
                options,
                correct_index,
            } => options.get(*correct_index).cloned().unwrap_or_default(),
            _ => self.formatted_answer(),
        }
    }
}

/// 会话内的 Context Store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStore {
    #[serde(default)]
    pub selected_articles: Vec<Article>,
    #[serde(default)]
    pub summaries: Vec<Summary>,
    #[serde(default)]
    pub active_quiz: Option<QuizRecord>,
    #[serde(default)]
    pub daily_pool: Vec<Article>,
    #[serde(default)]
    pub term_explanations: Vec<TermExplanationGroup>,
    /// 外部存储带来的未知键，原样保留
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ContextStore {
    pub fn has_active_quiz(&self) -> bool {
        self.active_quiz.is_some()
    }

    /// 应用一条变更；返回 false 表示变更不属于该单元，已丢弃
    pub fn apply(&mut self, unit: UnitName, mutation: ContextMutation) -> bool {
        if mutation.owner() != unit {
            tracing::warn!(
                unit = %unit,
                owner = %mutation.owner(),
                field = mutation.field(),
                "dropping context mutation from non-owning unit"
            );
            return false;
        }
        match mutation {
            ContextMutation::SelectedArticles(v) => self.selected_articles = v,
            ContextMutation::DailyPool(v) => self.daily_pool = v,
            ContextMutation::Summaries(v) => self.summaries = v,
            ContextMutation::ActiveQuiz(q) => self.active_quiz = q,
            ContextMutation::TermExplanations(v) => self.term_explanations = v,
        }
        true
    }
}

/// 单元返回的上下文变更；每个字段只有一个归属单元
#[derive(Debug, Clone, PartialEq)]
pub enum ContextMutation {
    SelectedArticles(Vec<Article>),
    DailyPool(Vec<Article>),
    Summaries(Vec<Summary>),
    ActiveQuiz(Option<QuizRecord>),
    TermExplanations(Vec<TermExplanationGroup>),
}

impl ContextMutation {
    pub fn owner(&self) -> UnitName {
        match self {
            ContextMutation::SelectedArticles(_) | ContextMutation::DailyPool(_) => {
                UnitName::Retrieve
            }
            ContextMutation::Summaries(_) => UnitName::Summarize,
            ContextMutation::ActiveQuiz(_) => UnitName::Quiz,
            ContextMutation::TermExplanations(_) => UnitName::ExplainTerm,
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            ContextMutation::SelectedArticles(_) => "selectedArticles",
            ContextMutation::DailyPool(_) => "dailyPool",
            ContextMutation::Summaries(_) => "summaries",
            ContextMutation::ActiveQuiz(_) => "activeQuiz",
            ContextMutation::TermExplanations(_) => "termExplanations",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mc_quiz() -> QuizRecord {
        QuizRecord {
            question: "q".into(),
            answer: QuizAnswer::MultipleChoice {
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_index: 2,
            },
            rationale: "r".into(),
            term_quiz: false,
        }
    }

    #[test]
    fn test_formatted_answer() {
        assert_eq!(mc_quiz().formatted_answer(), "3. c");
        let ox = QuizRecord {
            answer: QuizAnswer::Ox { correct: false },
            ..mc_quiz()
        };
        assert_eq!(ox.formatted_answer(), "X");
        let short = QuizRecord {
            answer: QuizAnswer::ShortAnswer {
                accepted: vec!["환율 변동".into(), "공급망 불안".into()],
            },
            ..mc_quiz()
        };
        assert_eq!(short.formatted_answer(), "환율 변동, 공급망 불안");
    }

    #[test]
    fn test_apply_rejects_foreign_field() {
        let mut ctx = ContextStore::default();
        let applied = ctx.apply(
            UnitName::Summarize,
            ContextMutation::ActiveQuiz(Some(mc_quiz())),
        );
        assert!(!applied);
        assert!(ctx.active_quiz.is_none());

        assert!(ctx.apply(UnitName::Quiz, ContextMutation::ActiveQuiz(Some(mc_quiz()))));
        assert!(ctx.has_active_quiz());
    }

    #[test]
    fn test_unknown_keys_survive_roundtrip() {
        let raw = r#"{"selectedArticles":[],"legacyFlag":true}"#;
        let ctx: ContextStore = serde_json::from_str(raw).unwrap();
        assert_eq!(ctx.extra.get("legacyFlag"), Some(&serde_json::Value::Bool(true)));
        let back = serde_json::to_value(&ctx).unwrap();
        assert_eq!(back["legacyFlag"], serde_json::Value::Bool(true));
    }
}
