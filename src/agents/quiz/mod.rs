//! 测验单元：一次只有一道进行中的题
//!
//! 状态：NONE -> ACTIVE（REQUEST）-> NONE（ANSWER / GIVEUP）。
//! ACTIVE 时再次 REQUEST 会被拒绝并重述当前题目；任何判分结果都会清空 activeQuiz。

pub mod generate;
pub mod grading;

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agents::{AgentUnit, UnitInput, UnitName, UnitOutput};
use crate::core::{Level, TutorError};
use crate::llm::{ask_json, LlmClient};
use crate::memory::{ContextMutation, ContextStore, Message, QuizKind, QuizRecord, Summary};

pub use generate::{QuizGenerator, QUIZ_SYSTEM, TERM_QUIZ_SYSTEM};
pub use grading::{check_short_answer, grade, is_bare_token, is_giveup, SHORT_ANSWER_RATIO};

/// 动作分类提示（开头固定）
pub const ACTION_SYSTEM: &str = "너는 퀴즈 대화의 사용자 의도를 분류하는 분석기다.\n\
- REQUEST: 새 퀴즈를 내달라는 요청 (유형 OX / MC4 / ShortAnswer, 개수, 경제 용어 퀴즈 여부)\n\
- ANSWER: 출제된 문제에 대한 답 제출 (user_answer에 답만 담을 것)\n\
- GIVEUP: 모르겠다, 포기, 정답 알려달라는 말";

pub const NO_ACTIVE_QUIZ_MESSAGE: &str = "채점할 문제가 없어요. 먼저 퀴즈를 요청해 주세요.";
pub const NO_MATERIAL_MESSAGE: &str = "퀴즈를 만들 기사가 없어요. 뉴스 검색과 요약을 먼저 해주세요.";
pub const GENERATION_FAILED_MESSAGE: &str =
    "문제를 생성하지 못했어요. 잠시 후 다시 요청해 주세요.";

/// 用户在测验对话中的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizAction {
    Request {
        kind: Option<QuizKind>,
        count: usize,
        term_quiz: bool,
    },
    Answer(String),
    GiveUp,
}

impl QuizAction {
    fn default_request() -> Self {
        QuizAction::Request {
            kind: None,
            count: 1,
            term_quiz: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
enum ActionTag {
    Request,
    Answer,
    Giveup,
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
enum QuizTypeTag {
    #[serde(rename = "OX")]
    Ox,
    #[serde(rename = "MC4")]
    Mc4,
    #[serde(rename = "ShortAnswer")]
    ShortAnswer,
}

impl From<QuizTypeTag> for QuizKind {
    fn from(tag: QuizTypeTag) -> Self {
        match tag {
            QuizTypeTag::Ox => QuizKind::Ox,
            QuizTypeTag::Mc4 => QuizKind::MultipleChoice,
            QuizTypeTag::ShortAnswer => QuizKind::ShortAnswer,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ActionDecision {
    action: ActionTag,
    #[serde(default, rename = "type")]
    quiz_type: Option<QuizTypeTag>,
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    is_term: bool,
    #[serde(default)]
    user_answer: Option<String>,
}

/// 等级对应的默认题型
pub fn default_kind(level: Level) -> QuizKind {
    match level {
        Level::Seed => QuizKind::Ox,
        Level::Sprout | Level::Tree => QuizKind::MultipleChoice,
        Level::Forest => QuizKind::ShortAnswer,
    }
}

/// 出题素材：最近一篇摘要的正文，正文为空时用标题
pub fn quiz_material(summaries: &[Summary]) -> Option<String> {
    let last = summaries.last()?;
    let body = last.body.trim();
    let text = if body.is_empty() { last.title.trim() } else { body };
    (!text.is_empty()).then(|| text.to_string())
}

/// 出题文本
pub fn render_quiz(quiz: &QuizRecord) -> String {
    let mut lines = vec![
        format!("**{}**를 냈어요!", quiz.kind().label()),
        format!("Q. {}", quiz.question),
    ];
    match quiz.kind() {
        QuizKind::MultipleChoice => {
            for (i, opt) in quiz.options().iter().enumerate() {
                lines.push(format!("   {}) {}", i + 1, opt));
            }
        }
        QuizKind::Ox => lines.push("   (O / X)".to_string()),
        QuizKind::ShortAnswer => {}
    }
    lines.push(String::new());
    lines.push("정답을 입력해 주세요! 👇".to_string());
    lines.join("\n")
}

/// 每篇文章的批量测验
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSet {
    pub title: String,
    pub questions: Vec<QuizRecord>,
}

/// 测验单元
pub struct QuizUnit {
    llm: Arc<dyn LlmClient>,
    generator: QuizGenerator,
}

impl QuizUnit {
    pub fn new(llm: Arc<dyn LlmClient>, generator: QuizGenerator) -> Self {
        Self { llm, generator }
    }

    /// 动作分类：确定性规则优先，其次 LLM，失败时按 token 兜底
    pub async fn classify(&self, text: &str, has_active: bool) -> QuizAction {
        if is_giveup(text) {
            return QuizAction::GiveUp;
        }
        if has_active && is_bare_token(text) {
            return QuizAction::Answer(text.trim().to_string());
        }

        let messages = [
            Message::system(format!(
                "{}\n현재 진행 중인 퀴즈: {}",
                ACTION_SYSTEM,
                if has_active { "있음" } else { "없음" }
            )),
            Message::user(text),
        ];
        match ask_json::<ActionDecision>(self.llm.as_ref(), &messages).await {
            Ok(d) => match d.action {
                ActionTag::Request => QuizAction::Request {
                    kind: d.quiz_type.map(QuizKind::from),
                    count: d.count.unwrap_or(1).max(1),
                    term_quiz: d.is_term,
                },
                ActionTag::Answer => QuizAction::Answer(
                    d.user_answer
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty())
                        .unwrap_or_else(|| text.trim().to_string()),
                ),
                ActionTag::Giveup => QuizAction::GiveUp,
            },
            Err(e) => {
                tracing::debug!(error = %e, "quiz action classification failed");
                if is_bare_token(text) {
                    QuizAction::Answer(text.trim().to_string())
                } else {
                    QuizAction::default_request()
                }
            }
        }
    }

    fn grade_active(&self, quiz: &QuizRecord, action: &QuizAction) -> String {
        let answer = quiz.formatted_answer();
        match action {
            QuizAction::GiveUp => format!("정답은 **{}** 입니다.\n\n💡 해설: {}", answer, quiz.rationale),
            QuizAction::Answer(user) if grade(quiz, user) => {
                format!("🎉 **정답입니다!**\n\n💡 해설: {}", quiz.rationale)
            }
            _ => format!(
                "땡! 아쉽네요. 😅\n정답은 **{}** 입니다.\n\n💡 해설: {}",
                answer, quiz.rationale
            ),
        }
    }

    /// 批量出题：每篇摘要 per_article 道题干互不相同的题
    pub async fn build_daily_quizzes(
        &self,
        summaries: &[Summary],
        level: Level,
        per_article: usize,
    ) -> Vec<QuizSet> {
        let kind = default_kind(level);
        let mut sets = Vec::new();
        for s in summaries {
            if s.error.is_some() || s.body.trim().is_empty() {
                continue;
            }
            let questions = self.generator.pick_many(&s.body, kind, per_article, false).await;
            if questions.is_empty() {
                tracing::warn!(title = %s.title, "no quiz generated");
                continue;
            }
            sets.push(QuizSet {
                title: s.title.clone(),
                questions,
            });
        }
        sets
    }
}

#[async_trait]
impl AgentUnit for QuizUnit {
    fn name(&self) -> UnitName {
        UnitName::Quiz
    }

    async fn handle(&self, input: &UnitInput, ctx: &ContextStore) -> Result<UnitOutput, TutorError> {
        let action = self.classify(&input.text, ctx.has_active_quiz()).await;
        tracing::info!(action = ?action, active = ctx.has_active_quiz(), "quiz action");

        match (&ctx.active_quiz, action) {
            (Some(quiz), QuizAction::Request { .. }) => {
                tracing::info!("quiz request rejected, one already active");
                Ok(UnitOutput::reply(format!(
                    "아직 풀지 않은 문제가 있어요. 먼저 답해 주세요!\n\n{}",
                    render_quiz(quiz)
                )))
            }
            (Some(quiz), action) => {
                let reply = self.grade_active(quiz, &action);
                Ok(UnitOutput::reply(reply).with(ContextMutation::ActiveQuiz(None)))
            }
            (None, QuizAction::Request { kind, term_quiz, .. }) => {
                let Some(material) = quiz_material(&ctx.summaries) else {
                    return Ok(UnitOutput::reply(NO_MATERIAL_MESSAGE));
                };
                let kind = kind.unwrap_or_else(|| default_kind(input.profile.level));
                match self.generator.pick_one(&material, kind, term_quiz).await {
                    Some(quiz) => {
                        let reply = render_quiz(&quiz);
                        Ok(UnitOutput::reply(reply).with(ContextMutation::ActiveQuiz(Some(quiz))))
                    }
                    None => Ok(UnitOutput::reply(GENERATION_FAILED_MESSAGE)),
                }
            }
            (None, _) => Ok(UnitOutput::reply(NO_ACTIVE_QUIZ_MESSAGE)),
        }
    }
}
