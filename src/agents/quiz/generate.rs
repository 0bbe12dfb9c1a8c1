//! 测验生成：候选生成 + 打分挑选
//!
//! 每次出题生成 `candidates` 个结构化候选，客观题打乱选项并跟踪正确下标，
//! 按（解析长度 + 不同选项数）取最优。术语测验使用面向术语的提示。

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use rand::seq::{IndexedRandom, SliceRandom};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::TutorError;
use crate::llm::{ask_json, LlmClient};
use crate::memory::{Message, QuizAnswer, QuizKind, QuizRecord};

/// 内容测验提示（开头固定）
pub const QUIZ_SYSTEM: &str = "당신은 주어진 내용을 바탕으로 퀴즈를 출제하는 전문 교사입니다.";
/// 术语测验提示（开头固定）
pub const TERM_QUIZ_SYSTEM: &str =
    "당신은 주어진 내용을 바탕으로 '경제 용어' 퀴즈를 출제하는 전문 교사입니다.";

const STYLE_VARIANTS: [&str; 3] = [
    "보기는 난이도 순으로 섞고, 오답엔 실제 헷갈리는 개념을 섞어라.",
    "정답 해설은 1문장 요약 + 핵심 근거 1개로 써라.",
    "질문은 사실 확인형으로, 보기는 원인/결과를 섞어라.",
];

const SAFE_RULES: &str = "- 숫자 함정 금지: 소수점을 포함하는 정확한 수치를 판단하는 문제는 삼가할 것.\n\
- O/X는 개념·사실 확인형 위주(정의, 주체 비교, 원인-결과).\n\
- 불필요한 이중부정, 애매모호 표현, 트릭 금지. 근거는 본문에서 명확히 찾을 수 있어야 함.";

#[derive(Debug, Deserialize, JsonSchema)]
struct OxDraft {
    question: String,
    /// true = O, false = X
    answer: bool,
    rationale: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MultipleChoiceDraft {
    question: String,
    /// 4 个选项
    options: Vec<String>,
    /// 正确选项下标（0 起）
    answer_index: usize,
    rationale: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ShortAnswerDraft {
    question: String,
    /// 所有可接受的简短答案
    answer: Vec<String>,
    rationale: String,
}

fn task_label(kind: QuizKind, term_quiz: bool) -> String {
    let prefix = if term_quiz { "경제 용어 " } else { "" };
    match kind {
        QuizKind::Ox => format!("{}O/X 퀴즈 1개", prefix),
        QuizKind::MultipleChoice => format!("{}4지선다 객관식 퀴즈 1개", prefix),
        QuizKind::ShortAnswer => format!("{}단답형 퀴즈 1개", prefix),
    }
}

fn type_rules(term_quiz: bool) -> &'static str {
    if term_quiz {
        "- 단답형: 질문은 용어의 정의, 정답은 용어 자체(리스트).\n\
         - 객관식: 정의를 제시하고 용어를 묻는다. 보기는 정의가 아닌 용어여야 한다.\n\
         - O/X: \"'[용어]'는 [정의]를 의미한다.\" 형식으로 관계가 올바른지 묻는다."
    } else {
        "- 단답형: 답이 내용에 나오는 핵심 단어(한두 단어)가 되도록 질문하고, 가능한 정답을 모두 리스트에 담는다.\n\
         - 객관식/O/X: 내용을 기반으로 질문, 보기, 정답을 구성한다."
    }
}

/// 打分：解析长度 + 不同选项数
pub fn score(quiz: &QuizRecord) -> usize {
    let distinct: HashSet<&String> = quiz.options().iter().collect();
    quiz.rationale.chars().count() + distinct.len()
}

/// 打乱选项并返回新的正确下标
fn shuffle_options(options: Vec<String>, correct_index: usize) -> (Vec<String>, usize) {
    let Some(correct) = options.get(correct_index).cloned() else {
        return (options, correct_index);
    };
    let mut options = options;
    options.shuffle(&mut rand::rng());
    let idx = options.iter().position(|o| *o == correct).unwrap_or(0);
    (options, idx)
}

fn pick_variant() -> &'static str {
    STYLE_VARIANTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(STYLE_VARIANTS[0])
}

/// 测验生成器
pub struct QuizGenerator {
    llm: Arc<dyn LlmClient>,
    candidates: usize,
}

impl QuizGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, candidates: usize) -> Self {
        Self {
            llm,
            candidates: candidates.max(1),
        }
    }

    fn prompt(&self, context: &str, kind: QuizKind, term_quiz: bool) -> Vec<Message> {
        let head = if term_quiz { TERM_QUIZ_SYSTEM } else { QUIZ_SYSTEM };
        let system = format!(
            "{head}\n제시된 내용을 기반으로 학생들의 이해도를 평가할 수 있는 퀴즈를 생성해야 합니다.\n\n\
             [유형별 규칙]\n{}\n\n[공통 지시사항]\n1. 퀴즈 유형: {}\n2. 모든 문제에는 간단한 해설(rationale)을 포함하세요.\n\
             3. 스타일 가이드: {}\n4. 안전 규칙(엄수):\n{}\n\n[DIVERSITY_KEY]\n{}",
            type_rules(term_quiz),
            task_label(kind, term_quiz),
            pick_variant(),
            SAFE_RULES,
            uuid::Uuid::new_v4().simple(),
        );
        vec![
            Message::system(system),
            Message::user(format!("[내용]\n{}", context)),
        ]
    }

    /// 生成单题并校验
    pub async fn generate_one(
        &self,
        context: &str,
        kind: QuizKind,
        term_quiz: bool,
    ) -> Result<QuizRecord, TutorError> {
        let messages = self.prompt(context, kind, term_quiz);
        let llm = self.llm.as_ref();
        let record = match kind {
            QuizKind::Ox => {
                let d: OxDraft = ask_json(llm, &messages).await?;
                QuizRecord {
                    question: d.question,
                    answer: QuizAnswer::Ox { correct: d.answer },
                    rationale: d.rationale,
                    term_quiz,
                }
            }
            QuizKind::MultipleChoice => {
                let d: MultipleChoiceDraft = ask_json(llm, &messages).await?;
                if d.options.len() < 2 || d.answer_index >= d.options.len() {
                    return Err(TutorError::JsonParse(format!(
                        "invalid options: {} options, answer_index {}",
                        d.options.len(),
                        d.answer_index
                    )));
                }
                let (options, correct_index) = shuffle_options(d.options, d.answer_index);
                QuizRecord {
                    question: d.question,
                    answer: QuizAnswer::MultipleChoice {
                        options,
                        correct_index,
                    },
                    rationale: d.rationale,
                    term_quiz,
                }
            }
            QuizKind::ShortAnswer => {
                let d: ShortAnswerDraft = ask_json(llm, &messages).await?;
                let accepted: Vec<String> = d
                    .answer
                    .into_iter()
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
                if accepted.is_empty() {
                    return Err(TutorError::JsonParse("no accepted answers".to_string()));
                }
                QuizRecord {
                    question: d.question,
                    answer: QuizAnswer::ShortAnswer { accepted },
                    rationale: d.rationale,
                    term_quiz,
                }
            }
        };
        if record.question.trim().is_empty() {
            return Err(TutorError::JsonParse("empty question".to_string()));
        }
        Ok(record)
    }

    /// 生成 candidates 个候选并取得分最高者；全部失败时为 None
    pub async fn pick_one(&self, context: &str, kind: QuizKind, term_quiz: bool) -> Option<QuizRecord> {
        let attempts = (0..self.candidates).map(|_| self.generate_one(context, kind, term_quiz));
        let mut best: Option<QuizRecord> = None;
        for result in join_all(attempts).await {
            match result {
                Ok(q) => {
                    if best.as_ref().map(|b| score(&q) > score(b)).unwrap_or(true) {
                        best = Some(q);
                    }
                }
                Err(e) => tracing::debug!(error = %e, "quiz candidate rejected"),
            }
        }
        best
    }

    /// 生成 n 道题干互不相同的题，最多尝试 n * 5 次
    pub async fn pick_many(&self, context: &str, kind: QuizKind, n: usize, term_quiz: bool) -> Vec<QuizRecord> {
        let mut quizzes = Vec::new();
        let mut seen = HashSet::new();
        let mut trials = 0;
        while quizzes.len() < n && trials < n * 5 {
            trials += 1;
            let Some(q) = self.pick_one(context, kind, term_quiz).await else {
                continue;
            };
            if seen.insert(q.question.clone()) {
                quizzes.push(q);
            }
        }
        quizzes
    }
}
