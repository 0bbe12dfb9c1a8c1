//! 编排循环：Planner -> Agent Unit -> 推进 cursor，直到计划耗尽
//!
//! 阶段由 ConversationState 推导：PLANNING（无计划或有新用户输入）-> DISPATCHING（cursor < len）
//! -> DONE（cursor == len）。单元失败或超时由执行器转成道歉消息，cursor 照常前移，不重试。
//! 单元返回的变更在此按归属校验后写回 Context Store。

use crate::agents::{UnitExecutor, UnitInput, UnitName};
use crate::core::state::{ConversationState, Phase};
use crate::memory::Message;
use crate::planner::IntentPlanner;

/// 每轮最多派发的步骤数（词表只有 5 个单元，去重后的计划不会超过它）
const MAX_STEPS_PER_TURN: usize = 8;

/// 一个步骤的执行记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// 计划中的步骤名
    pub step: UnitName,
    /// 实际执行的单元（未注册时回退为 qa）
    pub unit: UnitName,
    pub reply: String,
    pub failed: bool,
}

/// 一轮对话的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    pub plan: Vec<UnitName>,
    pub steps: Vec<StepRecord>,
}

impl TurnOutcome {
    pub fn replies(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.reply.as_str()).collect()
    }
}

/// 主控循环
pub struct Orchestrator {
    planner: IntentPlanner,
    executor: UnitExecutor,
}

impl Orchestrator {
    pub fn new(planner: IntentPlanner, executor: UnitExecutor) -> Self {
        Self { planner, executor }
    }

    pub fn executor(&self) -> &UnitExecutor {
        &self.executor
    }

    /// 处理一条用户消息：追加到历史、规划、依次派发；任何单元失败都不会中断本轮
    pub async fn run_turn(&self, state: &mut ConversationState, text: &str) -> TurnOutcome {
        state.append_message(Message::user(text));
        self.drive(state).await
    }

    /// 驱动状态机直到 DONE；可用于续跑从存储中加载的、未执行完的计划
    pub async fn drive(&self, state: &mut ConversationState) -> TurnOutcome {
        let mut outcome = TurnOutcome::default();
        let mut dispatched = 0usize;

        loop {
            match state.phase() {
                Phase::Planning => {
                    let text = state.last_user_text().to_string();
                    let plan = self.planner.plan(&text, &state.context).await;
                    tracing::info!(plan = ?plan, "planned");
                    outcome.plan = plan.clone();
                    state.set_plan(plan);
                }
                Phase::Dispatching => {
                    if dispatched >= MAX_STEPS_PER_TURN {
                        tracing::warn!(cursor = state.cursor(), "step limit reached, ending turn");
                        break;
                    }
                    let Some(step) = state.current_step() else {
                        break;
                    };
                    if outcome.plan.is_empty() {
                        outcome.plan = state.plan().to_vec();
                    }

                    let input = UnitInput::new(state.last_user_text(), state.profile.clone());
                    let result = self.executor.dispatch(step, &input, &state.context).await;
                    dispatched += 1;

                    for mutation in result.output.mutations {
                        let field = mutation.field();
                        if state.context.apply(result.unit, mutation) {
                            tracing::debug!(unit = %result.unit, field, "context updated");
                        }
                    }
                    state.append_message(Message::assistant(result.output.reply.clone()));
                    state.complete_step(step);
                    tracing::debug!(step = %step, cursor = state.cursor(), "step completed");

                    outcome.steps.push(StepRecord {
                        step,
                        unit: result.unit,
                        reply: result.output.reply,
                        failed: result.error.is_some(),
                    });
                }
                Phase::Done => break,
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::agents::{AgentUnit, UnitOutput, UnitRegistry, UNIT_ERROR_MESSAGE};
    use crate::core::{Profile, TutorError};
    use crate::llm::MockLlmClient;
    use crate::memory::{Article, ContextMutation, ContextStore};
    use crate::planner::ROUTER_SYSTEM;

    struct Echo(UnitName);

    #[async_trait]
    impl AgentUnit for Echo {
        fn name(&self) -> UnitName {
            self.0
        }

        async fn handle(&self, _input: &UnitInput, ctx: &ContextStore) -> Result<UnitOutput, TutorError> {
            let out = UnitOutput::reply(format!("{}:{}", self.0, ctx.selected_articles.len()));
            Ok(match self.0 {
                UnitName::Retrieve => out.with(ContextMutation::SelectedArticles(vec![Article::default()])),
                // 写别人的字段，应被丢弃
                UnitName::Summarize => out.with(ContextMutation::SelectedArticles(vec![])),
                _ => out,
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl AgentUnit for Broken {
        fn name(&self) -> UnitName {
            UnitName::Retrieve
        }

        async fn handle(&self, _input: &UnitInput, _ctx: &ContextStore) -> Result<UnitOutput, TutorError> {
            Err(TutorError::Search("quota".into()))
        }
    }

    fn orchestrator(router_reply: &str, registry: UnitRegistry) -> Orchestrator {
        let llm = Arc::new(MockLlmClient::new().on(ROUTER_SYSTEM, router_reply));
        Orchestrator::new(
            IntentPlanner::new(llm, 12),
            UnitExecutor::with_timeout(registry, Duration::from_secs(5)),
        )
    }

    fn full_registry() -> UnitRegistry {
        let mut r = UnitRegistry::new();
        for name in UnitName::ALL {
            r.register(Echo(name));
        }
        r
    }

    #[tokio::test]
    async fn test_steps_run_in_dependency_order() {
        let orch = orchestrator(r#"{"intents":["summarize","retrieve"]}"#, full_registry());
        let mut state = ConversationState::new(Profile::default());
        let out = orch.run_turn(&mut state, "금리 기사 찾아서 요약해줘").await;

        assert_eq!(out.plan, vec![UnitName::Retrieve, UnitName::Summarize]);
        // summarize 看到 retrieve 写入的文章
        assert_eq!(out.replies(), vec!["retrieve:0", "summarize:1"]);
        // summarize 写 selectedArticles 被拒
        assert_eq!(state.context.selected_articles.len(), 1);
        assert_eq!(state.phase(), Phase::Done);
        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.last_agent(), Some(UnitName::Summarize));
    }

    #[tokio::test]
    async fn test_failed_step_still_advances() {
        let mut registry = full_registry();
        registry.register(Broken);
        let orch = orchestrator(r#"{"intents":["retrieve","quiz"]}"#, registry);
        let mut state = ConversationState::new(Profile::default());
        let out = orch.run_turn(&mut state, "기사 찾아서 퀴즈").await;

        assert_eq!(out.steps.len(), 2);
        assert!(out.steps[0].failed);
        assert_eq!(out.steps[0].reply, UNIT_ERROR_MESSAGE);
        assert_eq!(out.steps[1].reply, "quiz:0");
        assert_eq!(state.cursor(), 2);
        assert!(state.completed().contains(&UnitName::Retrieve));
    }

    #[tokio::test]
    async fn test_unregistered_step_falls_back_to_qa() {
        let mut registry = UnitRegistry::new();
        registry.register(Echo(UnitName::Qa));
        let orch = orchestrator(r#"{"intents":["explain-term"]}"#, registry);
        let mut state = ConversationState::new(Profile::default());
        let out = orch.run_turn(&mut state, "용어 설명").await;
        assert_eq!(out.steps[0].step, UnitName::ExplainTerm);
        assert_eq!(out.steps[0].unit, UnitName::Qa);
        assert_eq!(out.steps[0].reply, "qa:0");
    }

    #[tokio::test]
    async fn test_new_message_replans() {
        let orch = orchestrator(r#"{"intents":["qa"]}"#, full_registry());
        let mut state = ConversationState::new(Profile::default());
        orch.run_turn(&mut state, "안녕").await;
        let out = orch.run_turn(&mut state, "고마워").await;
        assert_eq!(out.plan, vec![UnitName::Qa]);
        assert_eq!(state.messages().len(), 4);
        assert_eq!(state.cursor(), 1);
    }

    #[tokio::test]
    async fn test_drive_resumes_unfinished_plan() {
        let orch = orchestrator(r#"{"intents":["qa"]}"#, full_registry());
        let mut state = ConversationState::new(Profile::default());
        state.append_message(Message::user("기사 찾아서 요약"));
        state.set_plan(vec![UnitName::Retrieve, UnitName::Summarize]);
        state.complete_step(UnitName::Retrieve);

        let out = orch.drive(&mut state).await;
        assert_eq!(out.plan, vec![UnitName::Retrieve, UnitName::Summarize]);
        assert_eq!(out.replies(), vec!["summarize:0"]);
    }
}
