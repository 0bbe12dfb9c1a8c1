//! 术语解释单元
//!
//! 先抽取目标术语：出现在已存摘要中 -> 基于该摘要的上下文解释；
//! 未出现 -> Term Cache Loop 通用定义；没有目标术语 -> 对每篇摘要的术语候选做批量上下文解释，
//! 结果写入 termExplanations。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::agents::{AgentUnit, TermCacheLoop, TermLookup, UnitInput, UnitName, UnitOutput};
use crate::core::{Level, TutorError};
use crate::llm::{ask_json, LlmClient};
use crate::memory::{ContextMutation, ContextStore, Message, Summary, TermExplanationGroup};

/// 目标术语抽取提示
pub const TERM_TARGET_SYSTEM: &str = "너는 사용자 질문에서 '설명 대상이 되는 핵심 단어(용어)'를 추출하는 분석기다.\n\
사용자가 특정 단어의 뜻, 정의, 개념을 물어보면 그 단어만 딱 잘라서 추출해라.\n\n\
예시:\n\
- '금리가 뭐야?' -> {\"term\": \"금리\"}\n\
- '인플레이션 뜻 알려줘' -> {\"term\": \"인플레이션\"}\n\
- '방금 기사 용어 설명해줘' -> {\"term\": null}";

#[derive(Debug, Deserialize, JsonSchema)]
struct TermTarget {
    /// 要解释的术语；不明确时为 null
    #[serde(default)]
    term: Option<String>,
}

/// 术语解释单元
pub struct ExplainTermUnit {
    llm: Arc<dyn LlmClient>,
    terms: Arc<TermCacheLoop>,
}

impl ExplainTermUnit {
    pub fn new(llm: Arc<dyn LlmClient>, terms: Arc<TermCacheLoop>) -> Self {
        Self { llm, terms }
    }

    /// 抽取目标术语；失败或为空时返回 None
    pub async fn extract_target(&self, text: &str) -> Option<String> {
        let messages = [Message::system(TERM_TARGET_SYSTEM), Message::user(text)];
        match ask_json::<TermTarget>(self.llm.as_ref(), &messages).await {
            Ok(t) => t.term.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                tracing::debug!(error = %e, "term target extraction failed");
                None
            }
        }
    }

    /// 对每篇摘要的术语候选做上下文解释；没有候选时先从正文抽取 3~5 个
    pub async fn build_term_explanations(
        &self,
        summaries: &[Summary],
        level: Level,
    ) -> Vec<TermExplanationGroup> {
        let mut groups = Vec::new();
        for s in summaries {
            if s.error.is_some() || s.body.trim().is_empty() {
                continue;
            }
            let result = if s.term_candidates.is_empty() {
                self.terms.explain_text(&s.body, level).await
            } else {
                self.terms
                    .explain_in_context(&s.body, &s.term_candidates, level)
                    .await
            };
            match result {
                Ok(definitions) if !definitions.is_empty() => groups.push(TermExplanationGroup {
                    title: s.title.clone(),
                    definitions,
                }),
                Ok(_) => {}
                Err(e) => tracing::warn!(title = %s.title, error = %e, "contextual explanation failed"),
            }
        }
        groups
    }

    async fn explain_single(&self, term: &str, ctx: &ContextStore, level: Level) -> String {
        if let Some(summary) = ctx.summaries.iter().find(|s| s.mentions(term)) {
            match self
                .terms
                .explain_in_context(&summary.body, &[term.to_string()], level)
                .await
            {
                Ok(defs) if !defs.is_empty() => {
                    return format!(
                        "이 용어는 방금 본 뉴스에 나오는 말이에요.\n\n📖 **{}** (문맥 정의)\n{}\n\n(관련 기사: {})",
                        term, defs[0].definition, summary.title
                    );
                }
                Ok(_) => tracing::debug!(term, "empty contextual explanation, using general definition"),
                Err(e) => tracing::warn!(term, error = %e, "contextual explanation failed, using general definition"),
            }
        }

        match self.terms.define(term, "", level).await {
            TermLookup::Failed(msg) => msg,
            lookup => format!(
                "뉴스에는 없지만, '{}' 수준으로 설명해 드릴게요.\n\n💡 **{}** (일반 정의)\n{}",
                level,
                term,
                lookup.definition()
            ),
        }
    }
}

#[async_trait]
impl AgentUnit for ExplainTermUnit {
    fn name(&self) -> UnitName {
        UnitName::ExplainTerm
    }

    async fn handle(&self, input: &UnitInput, ctx: &ContextStore) -> Result<UnitOutput, TutorError> {
        let level = input.profile.level;

        if let Some(term) = self.extract_target(&input.text).await {
            tracing::info!(term = %term, "explain single term");
            return Ok(UnitOutput::reply(self.explain_single(&term, ctx, level).await));
        }

        if ctx.summaries.is_empty() {
            return Ok(UnitOutput::reply(
                "설명할 요약문이 없습니다. 뉴스 요약을 먼저 진행해주세요.",
            ));
        }

        let groups = self.build_term_explanations(&ctx.summaries, level).await;
        if groups.is_empty() {
            return Ok(UnitOutput::reply("요약문에서 설명할 용어를 찾지 못했어요."));
        }

        let mut lines = vec![format!("'{}' 수준에 맞춰 주요 용어를 풀이했습니다.\n", level)];
        for g in &groups {
            lines.push(format!("🔹 기사: {}", g.title));
            for d in &g.definitions {
                lines.push(format!("   • **{}**: {}", d.term, d.definition));
            }
            lines.push(String::new());
        }
        Ok(UnitOutput::reply(lines.join("\n")).with(ContextMutation::TermExplanations(groups)))
    }
}
