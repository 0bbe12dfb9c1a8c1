//! 新闻摘要单元
//!
//! 对每篇选中文章：去控制字符、按安全长度截断，空正文直接给占位摘要；
//! 否则请求结构化摘要（5 句正文、3 条要点、指标、2~10 个术语候选），
//! 失败按 500ms × 次数线性退避重试，耗尽后存占位摘要并附带错误。
//! 多篇文章并发请求，单元总耗时约等于最慢的一篇。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::agents::{AgentUnit, UnitInput, UnitName, UnitOutput};
use crate::core::{Level, Profile, TutorError};
use crate::llm::{ask_json, LlmClient};
use crate::memory::{Article, ContextMutation, ContextStore, Message, Metric, Summary};

/// 摘要系统提示（开头固定）
pub const SUMMARY_SYSTEM: &str =
    "당신은 경제 뉴스 요약 전문가입니다. 반드시 한국어로 답하고, 사실에 없는 내용은 추정하지 마세요.";

pub const EMPTY_CONTENT_BODY: &str = "본문이 비어 있어 요약을 제공할 수 없습니다.";

const MAX_TERM_CANDIDATES: usize = 10;

/// 结构化摘要（LLM 输出）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SummaryDraft {
    /// 恰好 5 句的核心摘要
    #[serde(alias = "summary_5sentences")]
    pub summary: String,
    /// 3 条要点
    #[serde(default)]
    pub key_points: Vec<String>,
    /// 正文中实际出现的数值指标
    #[serde(default)]
    pub metrics: Vec<Metric>,
    /// 读者可能不认识的经济术语（2~10 个）
    #[serde(default)]
    pub term_candidates: Vec<String>,
}

struct Readability {
    sent_avg: &'static str,
    sent_max: u32,
    jargon_max: u32,
    tone: &'static str,
    audience: &'static str,
}

fn readability(level: Level) -> Readability {
    match level {
        Level::Seed => Readability {
            sent_avg: "25~30",
            sent_max: 30,
            jargon_max: 0,
            tone: "일상어 위주, 평이·직설",
            audience: "유치원생이 알아 들을 수 있게 요약하라.",
        },
        Level::Sprout => Readability {
            sent_avg: "35~40",
            sent_max: 40,
            jargon_max: 1,
            tone: "간결·실용, 필요시 쉬운 괄호 풀이",
            audience: "초등학생이 알아 들을 수 있게 요약하라.",
        },
        Level::Tree => Readability {
            sent_avg: "45~50",
            sent_max: 50,
            jargon_max: 3,
            tone: "시장·수급 용어 허용, 과잉전문어 금지",
            audience: "경제학을 전공한 학부생이 알아 들을 수 있게 요약하라.",
        },
        Level::Forest => Readability {
            sent_avg: "55~60",
            sent_max: 60,
            jargon_max: 5,
            tone: "정책·커브·프리미엄 등 고급 용어 허용",
            audience: "경제학 박사 혹은 교수가 알아 들을 수 있게 요약하라.",
        },
    }
}

fn build_system_prompt(profile: &Profile) -> String {
    let cfg = readability(profile.level);
    let interests = if profile.interests.is_empty() {
        "일반".to_string()
    } else {
        profile.interests.join(", ")
    };
    format!(
        "{SUMMARY_SYSTEM}\n\
         - summary: 5문장 핵심 요약(문장 수 정확히 5개, 500자 내외).\n\
         - key_points: 불릿 3개(간결, 중복 금지).\n\
         - metrics: 본문에 실재하는 수치·지표만 포함(이름/값/기간, 없으면 빈 배열).\n\
         - term_candidates: 독자가 모를 법한 경제 용어 2~10개(기사 맥락 내에서만).\n\
         - 가독성 목표: 평균 문장 길이 {} 단어, 최대 {} 단어/문장, 전문용어 상한 {}개, 톤: {}.\n\
         - 개인화: 관심사({}), 레벨({})를 문장에 자연스럽게 녹여 쓰세요.\n\
         - {}",
        cfg.sent_avg,
        cfg.sent_max,
        cfg.jargon_max,
        cfg.tone,
        interests,
        profile.level,
        cfg.audience,
    )
}

/// 控制字符（\t \n \r 除外）替换为空格
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() && !matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

/// 按字符数截断
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// 摘要单元
pub struct SummarizeUnit {
    llm: Arc<dyn LlmClient>,
    max_content_chars: usize,
    retries: usize,
    backoff: Duration,
}

impl SummarizeUnit {
    pub fn new(llm: Arc<dyn LlmClient>, max_content_chars: usize, retries: usize) -> Self {
        Self {
            llm,
            max_content_chars,
            retries: retries.max(1),
            backoff: Duration::from_millis(500),
        }
    }

    /// 覆盖退避基数（测试中设为 0）
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// 单篇摘要；永不返回 Err，失败时为带 error 的占位摘要
    pub async fn summarize_one(&self, article: &Article, profile: &Profile) -> Summary {
        let content = truncate_chars(&strip_control_chars(&article.content), self.max_content_chars);
        if content.trim().is_empty() {
            tracing::debug!(title = %article.title, "skip empty content");
            return Summary::placeholder(article, profile.level, EMPTY_CONTENT_BODY, "empty_content");
        }

        let messages = [
            Message::system(build_system_prompt(profile)),
            Message::user(format!(
                "다음 기사를 요약하세요.\n제목: {}\nURL: {}\n본문:\n{}\n\n제약:\n1) 본문에 없는 수치·사실을 만들지 마세요.\n2) JSON 외의 텍스트를 추가하지 마세요.",
                strip_control_chars(&article.title),
                article.url,
                content
            )),
        ];

        let mut last_err = String::new();
        for attempt in 1..=self.retries {
            match self.request(&messages).await {
                Ok(draft) => {
                    tracing::debug!(title = %article.title, attempt, "summary ok");
                    let mut term_candidates = draft.term_candidates;
                    term_candidates.truncate(MAX_TERM_CANDIDATES);
                    return Summary {
                        title: article.title.clone(),
                        url: article.url.clone(),
                        level: profile.level,
                        body: draft.summary.trim().to_string(),
                        key_points: draft.key_points,
                        metrics: draft.metrics,
                        term_candidates,
                        error: None,
                    };
                }
                Err(e) => {
                    tracing::warn!(title = %article.title, attempt, error = %e, "summary attempt failed");
                    last_err = e.to_string();
                    if attempt < self.retries {
                        tokio::time::sleep(self.backoff * attempt as u32).await;
                    }
                }
            }
        }

        Summary::placeholder(
            article,
            profile.level,
            &format!("요약 중 오류가 발생했습니다. ({})", last_err),
            &last_err,
        )
    }

    async fn request(&self, messages: &[Message]) -> Result<SummaryDraft, TutorError> {
        let draft: SummaryDraft = ask_json(self.llm.as_ref(), messages).await?;
        if draft.summary.trim().is_empty() {
            return Err(TutorError::JsonParse("empty summary".to_string()));
        }
        Ok(draft)
    }

    /// 并发摘要多篇文章，结果与输入顺序一致
    pub async fn summarize_all(&self, articles: &[Article], profile: &Profile) -> Vec<Summary> {
        let total = articles.len();
        let jobs = articles.iter().enumerate().map(|(i, article)| {
            tracing::info!(index = i + 1, total, title = %article.title, "summarizing");
            self.summarize_one(article, profile)
        });
        join_all(jobs).await
    }

    /// 批量模式：优先 dailyPool，为空时回退 selectedArticles
    pub async fn build_daily_summaries(&self, ctx: &ContextStore, profile: &Profile) -> Vec<Summary> {
        let articles = if ctx.daily_pool.is_empty() {
            &ctx.selected_articles
        } else {
            &ctx.daily_pool
        };
        self.summarize_all(articles, profile).await
    }
}

#[async_trait]
impl AgentUnit for SummarizeUnit {
    fn name(&self) -> UnitName {
        UnitName::Summarize
    }

    async fn handle(&self, input: &UnitInput, ctx: &ContextStore) -> Result<UnitOutput, TutorError> {
        if ctx.selected_articles.is_empty() {
            return Ok(UnitOutput::reply(
                "요약할 기사가 없습니다. 먼저 뉴스를 검색해 주세요.",
            ));
        }

        let summaries = self.summarize_all(&ctx.selected_articles, &input.profile).await;
        let mut lines = vec![format!("총 {}건의 기사를 요약했습니다.\n", summaries.len())];
        for (i, s) in summaries.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, s.title));
            if !s.url.is_empty() {
                lines.push(format!("   🔗 {}", s.url));
            }
            lines.push(format!("   [요약] {}\n", s.body));
        }

        Ok(UnitOutput::reply(lines.join("\n")).with(ContextMutation::Summaries(summaries)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    const DRAFT: &str = r#"{"summary":"한국은행이 기준금리를 동결했다.","key_points":["동결","물가","환율"],"metrics":[{"name":"기준금리","value":"3.50%"}],"term_candidates":["기준금리","물가"]}"#;

    fn article(content: &str) -> Article {
        Article {
            title: "금리 동결".into(),
            url: "https://a.com/1".into(),
            content: content.into(),
            ..Article::default()
        }
    }

    #[test]
    fn test_strip_and_truncate() {
        assert_eq!(strip_control_chars("a\u{0}b\nc\u{1f}"), "a b\nc ");
        assert_eq!(truncate_chars("가나다라", 2), "가나");
    }

    #[tokio::test]
    async fn test_empty_content_skips_llm() {
        let mock = Arc::new(MockLlmClient::new().on(SUMMARY_SYSTEM, DRAFT));
        let unit = SummarizeUnit::new(mock.clone(), 4000, 3);
        let s = unit.summarize_one(&article("  \u{0} "), &Profile::default()).await;
        assert_eq!(s.body, EMPTY_CONTENT_BODY);
        assert_eq!(s.error.as_deref(), Some("empty_content"));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_content_truncated_before_prompt() {
        let mock = Arc::new(MockLlmClient::new().on(SUMMARY_SYSTEM, DRAFT));
        let unit = SummarizeUnit::new(mock.clone(), 10, 3);
        let long = "가".repeat(50);
        let s = unit.summarize_one(&article(&long), &Profile::default()).await;
        assert!(s.error.is_none());
        assert_eq!(s.metrics[0].period, "");
        let prompt = &mock.seen()[0][1].content;
        assert!(prompt.contains(&"가".repeat(10)));
        assert!(!prompt.contains(&"가".repeat(11)));
    }

    #[tokio::test]
    async fn test_retries_then_placeholder() {
        let mock = Arc::new(MockLlmClient::new().fail_on(SUMMARY_SYSTEM, "rate limited"));
        let unit = SummarizeUnit::new(mock.clone(), 4000, 3).with_backoff(Duration::ZERO);
        let s = unit.summarize_one(&article("본문"), &Profile::default()).await;
        assert_eq!(mock.calls(), 3);
        assert!(s.body.starts_with("요약 중 오류가 발생했습니다."));
        assert!(s.error.unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_handle_without_articles() {
        let mock = Arc::new(MockLlmClient::new());
        let unit = SummarizeUnit::new(mock, 4000, 3);
        let out = unit
            .handle(&UnitInput::new("요약해줘", Profile::default()), &ContextStore::default())
            .await
            .unwrap();
        assert!(out.mutations.is_empty());
        assert!(out.reply.contains("요약할 기사가 없습니다"));
    }

    #[tokio::test]
    async fn test_articles_summarized_concurrently_within_unit_timeout() {
        use crate::agents::{UnitExecutor, UnitRegistry};

        let mock = Arc::new(
            MockLlmClient::new()
                .on(SUMMARY_SYSTEM, DRAFT)
                .with_delay(Duration::from_millis(150)),
        );
        let mut registry = UnitRegistry::new();
        registry.register(SummarizeUnit::new(mock.clone(), 4000, 3));
        // 依次执行需要约 450ms
        let exec = UnitExecutor::with_timeout(registry, Duration::from_millis(350));

        let ctx = ContextStore {
            selected_articles: (1..=3)
                .map(|i| Article {
                    title: format!("기사 {}", i),
                    url: format!("https://a.com/{}", i),
                    content: "본문".into(),
                    ..Article::default()
                })
                .collect(),
            ..ContextStore::default()
        };
        let result = exec
            .dispatch(UnitName::Summarize, &UnitInput::new("요약해줘", Profile::default()), &ctx)
            .await;

        assert!(result.error.is_none());
        let ContextMutation::Summaries(summaries) = &result.output.mutations[0] else {
            panic!("expected summaries");
        };
        let titles: Vec<_> = summaries.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["기사 1", "기사 2", "기사 3"]);
        assert!(summaries.iter().all(|s| s.error.is_none()));
        assert_eq!(mock.calls(), 3);
    }
}
