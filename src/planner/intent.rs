//! 意图规划器
//!
//! 输入用户原文与上下文标志，输出非空的有序单元名列表：
//! 1. 有进行中的测验且文本像是答案（单个数字、O/X、短语、放弃说法）-> 恰好 `[quiz]`；
//! 2. 否则由 LLM 给出多步计划，再按依赖序整理（retrieve < summarize < explain-term < quiz）；
//! 3. 分类失败（格式错误、超时）-> `[qa]`。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::agents::quiz::grading::{is_bare_token, is_giveup};
use crate::agents::UnitName;
use crate::llm::{ask_json, LlmClient};
use crate::memory::{ContextStore, Message};

/// 路由提示（开头固定）
pub const ROUTER_SYSTEM: &str = "너는 뉴스 학습 튜터 시스템의 의도 분류자(Supervisor Router)다.";

const ROUTER_RULES: &str = "사용자의 요청을 분석해서 어떤 작업 단계들이 필요한지를 순서대로 판단해.\n\n\
가능한 단계(intent):\n\
- qa: 일반적인 질문이나 사실 확인, 또는 단순 인사·잡담.\n\
- retrieve: 뉴스 검색 요청.\n\
- summarize: 뉴스 요약 요청.\n\
- explain-term: 용어 설명 요청.\n\
- quiz: 퀴즈 생성 요청 또는 퀴즈 정답 제출.\n\n\
최우선 규칙: 퀴즈가 진행 중이고 사용자가 숫자, O/X, 단답형 정답을 말했다면 무조건 [\"quiz\"].\n\n\
예시:\n\
- '삼성전자 주가 알려주고 관련 기사 요약해줘' -> [\"qa\",\"retrieve\",\"summarize\"]\n\
- '최근 금리 기사 찾아서 퀴즈 내줘' -> [\"retrieve\",\"quiz\"]\n\
- '안녕', '고마워' -> [\"qa\"]\n\
명확히 맞지 않으면 [\"qa\"].";

/// LLM 路由结果
#[derive(Debug, Deserialize, JsonSchema)]
struct RouteDecision {
    intents: Vec<String>,
}

/// 意图规划器
pub struct IntentPlanner {
    llm: Arc<dyn LlmClient>,
    answer_max_chars: usize,
    timeout: Option<Duration>,
}

impl IntentPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, answer_max_chars: usize) -> Self {
        Self {
            llm,
            answer_max_chars,
            timeout: None,
        }
    }

    /// 分类调用的超时，超时视为分类失败
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 有进行中测验时，文本是否应视为作答
    pub fn is_answer_like(&self, text: &str) -> bool {
        let t = text.trim();
        if t.is_empty() {
            return false;
        }
        if is_bare_token(t) || is_giveup(t) {
            return true;
        }
        t.chars().count() <= self.answer_max_chars && !t.ends_with('?')
    }

    /// 生成计划；永远非空
    pub async fn plan(&self, text: &str, ctx: &ContextStore) -> Vec<UnitName> {
        let quiz_active = ctx.has_active_quiz();
        if quiz_active && self.is_answer_like(text) {
            tracing::debug!("active quiz and answer-like input, routing to quiz");
            return vec![UnitName::Quiz];
        }

        let messages = [
            Message::system(format!(
                "{ROUTER_SYSTEM}\n{ROUTER_RULES}\n\n현재 상태: is_quiz_active={}",
                quiz_active
            )),
            Message::user(text),
        ];
        let call = ask_json::<RouteDecision>(self.llm.as_ref(), &messages);
        let decision = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(timeout_ms = limit.as_millis() as u64, "intent classification timed out");
                    return vec![UnitName::Qa];
                }
            },
            None => call.await,
        };

        match decision {
            Ok(d) => normalize_plan(&d.intents),
            Err(e) => {
                tracing::warn!(error = %e, "intent classification failed, falling back to qa");
                vec![UnitName::Qa]
            }
        }
    }
}

/// 整理 LLM 给出的步骤：未知名 -> qa，去重，按依赖序稳定排序（qa 保持原位），空 -> [qa]
pub fn normalize_plan(raw: &[String]) -> Vec<UnitName> {
    let mut seen = HashSet::new();
    let mut plan: Vec<UnitName> = raw
        .iter()
        .map(|s| {
            s.parse::<UnitName>().unwrap_or_else(|_| {
                tracing::debug!(intent = %s, "unknown intent mapped to qa");
                UnitName::Qa
            })
        })
        .filter(|u| seen.insert(*u))
        .collect();

    let slots: Vec<usize> = plan
        .iter()
        .enumerate()
        .filter(|(_, u)| u.dependency_rank().is_some())
        .map(|(i, _)| i)
        .collect();
    let mut ranked: Vec<UnitName> = slots.iter().map(|&i| plan[i]).collect();
    ranked.sort_by_key(|u| u.dependency_rank());
    for (slot, unit) in slots.into_iter().zip(ranked) {
        plan[slot] = unit;
    }

    if plan.is_empty() {
        plan.push(UnitName::Qa);
    }
    plan
}
