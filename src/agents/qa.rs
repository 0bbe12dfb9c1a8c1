//! 问答单元：smalltalk / internal / web / term 四种模式
//!
//! 先走确定性规则（问候 -> smalltalk；有摘要时出现序数词 -> internal 并指定下标），
//! 否则由 LLM 路由。internal 基于本会话的摘要与文章做检索增强，语料为空时转 web。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::agents::{AgentUnit, TermCacheLoop, TermLookup, UnitInput, UnitName, UnitOutput};
use crate::core::{Level, TutorError};
use crate::llm::{ask_json, LlmClient};
use crate::memory::{ContextStore, Message};
use crate::tools::WebSearch;

/// 路由提示（开头固定）
pub const QA_ROUTE_SYSTEM: &str = "너는 QA 서브에이전트의 라우터야. 아래 네 모드 중 하나를 고른다.\n\
 - smalltalk: 인사/잡담/감사 등 도구 불필요한 일상 대화.\n\
 - internal: 사용자가 오늘 학습한 요약/기사에 기대어 답해야 할 때. 내부 요약이 실제로 존재할 때만 선택한다.\n\
 - term: 특정 경제 용어의 뜻을 묻는 질문. term에 용어만 담는다.\n\
 - web: 그 밖의 모든 정보 탐색/사실 확인(외부 검색 필요) 상황.\n\
사용자가 '두번째/3번' 등을 말하면 forced_index를 0부터 시작해 지정(두번째=1, 3번=2). 못찾으면 null.";
pub const SMALLTALK_SYSTEM: &str = "너는 공손하고 간결하게 대화하는 어시스턴트다.";
pub const INTERNAL_SYSTEM: &str = "너는 사용자가 오늘 학습한 요약/기사 내용을 근거로 설명하는 튜터야.";
pub const WEB_SYSTEM: &str = "너는 뉴스/웹 검색 결과를 사용자 질의에 맞춰 핵심만 정리하는 어시스턴트다.";

pub const NO_INTERNAL_CONTEXT: &str = "(관련 내부 요약을 찾지 못했습니다.)";
pub const NO_SEARCH_RESULTS: &str = "(검색 결과가 없습니다)";

const CHUNK_SIZE: usize = 600;
const CHUNK_OVERLAP: usize = 80;
const TOP_CHUNKS: usize = 3;
const ARTICLE_CORPUS_CHARS: usize = 4000;

static SMALLTALK_RE: OnceLock<Option<Regex>> = OnceLock::new();
static ORDINAL_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 问答模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum QaMode {
    Smalltalk,
    Internal,
    Web,
    Term,
}

/// 路由结果
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct QaRoute {
    pub mode: QaMode,
    #[serde(default)]
    pub forced_index: Option<usize>,
    #[serde(default)]
    pub term: Option<String>,
}

impl QaRoute {
    fn mode(mode: QaMode) -> Self {
        Self {
            mode,
            forced_index: None,
            term: None,
        }
    }
}

pub fn is_smalltalk(text: &str) -> bool {
    SMALLTALK_RE
        .get_or_init(|| Regex::new(r"(?i)^\s*(안녕|하이|헬로|hello|반가워|고마워|감사|잘\s*지내|ㅎㅇ)").ok())
        .as_ref()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// "첫번째 / 1번" -> 0，"두번째 / 2번" -> 1，"세번째 / 3번" -> 2；"11번" 之类的多位数不算
pub fn resolve_ordinal(text: &str) -> Option<usize> {
    let caps = ORDINAL_RE
        .get_or_init(|| Regex::new(r"(?:^|[^0-9])(?:(첫|두|세) ?번째|([1-3]) ?번)").ok())
        .as_ref()?
        .captures(text)?;
    let key = caps.get(1).or_else(|| caps.get(2))?.as_str();
    match key {
        "첫" | "1" => Some(0),
        "두" | "2" => Some(1),
        "세" | "3" => Some(2),
        _ => None,
    }
}

/// 语料条目：(文档 id, 文本)，id 形如 summary:0 / article:1
pub fn collect_corpus(ctx: &ContextStore) -> Vec<(String, String)> {
    let mut corpus = Vec::new();
    for (i, s) in ctx.summaries.iter().enumerate() {
        if s.error.is_some() {
            continue;
        }
        let mut body = s.body.trim().to_string();
        for point in &s.key_points {
            body.push_str(&format!("\n- {}", point));
        }
        if !body.trim().is_empty() {
            corpus.push((format!("summary:{}", i), body));
        }
    }
    for (i, a) in ctx.selected_articles.iter().enumerate() {
        let content = a.content.trim();
        if !content.is_empty() {
            corpus.push((
                format!("article:{}", i),
                content.chars().take(ARTICLE_CORPUS_CHARS).collect(),
            ));
        }
    }
    corpus
}

/// 按字符切块（size 字符，相邻块重叠 overlap 字符）
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// 问句词与块的重叠数；韩语词尾助词按去掉末字再匹配一次
fn overlap_score(query: &HashSet<String>, chunk: &str) -> usize {
    let chunk = chunk.to_lowercase();
    query
        .iter()
        .filter(|t| {
            if chunk.contains(t.as_str()) {
                return true;
            }
            let mut stem = t.chars();
            stem.next_back();
            let stem = stem.as_str();
            stem.chars().count() >= 2 && chunk.contains(stem)
        })
        .count()
}

/// 取与问句重叠最多的前 top 个块
pub fn rank_chunks(question: &str, texts: &[String], top: usize) -> Vec<String> {
    let query = tokens(question);
    let mut scored: Vec<(usize, usize, String)> = texts
        .iter()
        .flat_map(|t| chunk_text(t, CHUNK_SIZE, CHUNK_OVERLAP))
        .enumerate()
        .map(|(i, c)| (overlap_score(&query, &c), i, c))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(top).map(|(_, _, c)| c).collect()
}

/// 问答单元
pub struct QaUnit {
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn WebSearch>,
    terms: Arc<TermCacheLoop>,
}

impl QaUnit {
    pub fn new(llm: Arc<dyn LlmClient>, search: Arc<dyn WebSearch>, terms: Arc<TermCacheLoop>) -> Self {
        Self { llm, search, terms }
    }

    /// 规则优先，其次 LLM 路由；失败时按 web 处理
    pub async fn route(&self, text: &str, ctx: &ContextStore) -> QaRoute {
        let has_summaries = !ctx.summaries.is_empty();
        if is_smalltalk(text) {
            return QaRoute::mode(QaMode::Smalltalk);
        }
        if has_summaries {
            if let Some(idx) = resolve_ordinal(text) {
                return QaRoute {
                    mode: QaMode::Internal,
                    forced_index: Some(idx),
                    term: None,
                };
            }
        }

        let messages = [
            Message::system(format!(
                "{}\n\n[컨텍스트] has_summaries={}",
                QA_ROUTE_SYSTEM, has_summaries
            )),
            Message::user(text),
        ];
        match ask_json::<QaRoute>(self.llm.as_ref(), &messages).await {
            Ok(route) => route,
            Err(e) => {
                tracing::debug!(error = %e, "qa route failed, using web");
                QaRoute::mode(QaMode::Web)
            }
        }
    }

    async fn smalltalk(&self, text: &str) -> Result<String, TutorError> {
        let messages = [Message::system(SMALLTALK_SYSTEM), Message::user(text)];
        Ok(self.llm.complete(&messages).await?)
    }

    /// 内部检索增强；语料为空时返回 None
    async fn internal(
        &self,
        question: &str,
        ctx: &ContextStore,
        forced: Option<usize>,
        level: Level,
    ) -> Result<Option<String>, TutorError> {
        let corpus = collect_corpus(ctx);
        if corpus.is_empty() {
            return Ok(None);
        }

        let mut selected: Vec<String> = match forced {
            Some(i) => {
                let ids = [format!("summary:{}", i), format!("article:{}", i)];
                corpus
                    .iter()
                    .filter(|(id, _)| ids.contains(id))
                    .map(|(_, t)| t.clone())
                    .collect()
            }
            None => Vec::new(),
        };
        if selected.is_empty() {
            let texts: Vec<String> = corpus.into_iter().map(|(_, t)| t).collect();
            selected = rank_chunks(question, &texts, TOP_CHUNKS);
        }
        selected.truncate(TOP_CHUNKS);

        let ctx_text = if selected.is_empty() {
            NO_INTERNAL_CONTEXT.to_string()
        } else {
            selected.join("\n\n---\n\n")
        };
        let messages = [
            Message::system(format!(
                "{INTERNAL_SYSTEM} 반드시 제공된 컨텍스트 내에서만 답하고, 문맥에 없는 내용은 추측하지 말아라. \
                 사용자 수준({})에 맞춰 간단히 설명하고, 필요하면 한 줄 예시를 들어라.",
                level
            )),
            Message::user(format!("질문: {}\n\n[내부 컨텍스트]\n{}", question, ctx_text)),
        ];
        Ok(Some(self.llm.complete(&messages).await?))
    }

    async fn web(&self, question: &str, level: Level) -> Result<String, TutorError> {
        let results = match self.search.search(question, 1).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "qa web search failed");
                Vec::new()
            }
        };
        let refs = results
            .iter()
            .take(1)
            .map(|r| format!("- {} {}", r.title, r.url))
            .collect::<Vec<_>>()
            .join("\n");
        let refs = if refs.is_empty() {
            NO_SEARCH_RESULTS.to_string()
        } else {
            refs
        };
        let messages = [
            Message::system(format!(
                "{WEB_SYSTEM} 사용자 수준({})에 맞춰 간결하게 요약하고, 가능한 경우 참고링크도 함께 제공해.",
                level
            )),
            Message::user(format!("사용자 질문: {}\n\n검색 결과:\n{}", question, refs)),
        ];
        Ok(self.llm.complete(&messages).await?)
    }

    async fn term(&self, term: &str, level: Level) -> String {
        match self.terms.define(term, "", level).await {
            TermLookup::Failed(msg) => msg,
            lookup => format!("💡 **{}**\n{}", term, lookup.definition()),
        }
    }
}

#[async_trait]
impl AgentUnit for QaUnit {
    fn name(&self) -> UnitName {
        UnitName::Qa
    }

    async fn handle(&self, input: &UnitInput, ctx: &ContextStore) -> Result<UnitOutput, TutorError> {
        let level = input.profile.level;
        let route = self.route(&input.text, ctx).await;
        tracing::info!(mode = ?route.mode, forced_index = ?route.forced_index, "qa route");

        let reply = match route.mode {
            QaMode::Smalltalk => self.smalltalk(&input.text).await?,
            QaMode::Term => match route.term.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                Some(term) => self.term(term, level).await,
                None => self.web(&input.text, level).await?,
            },
            QaMode::Internal => match self.internal(&input.text, ctx, route.forced_index, level).await? {
                Some(answer) => answer,
                None => {
                    tracing::debug!("no internal corpus, falling back to web");
                    self.web(&input.text, level).await?
                }
            },
            QaMode::Web => self.web(&input.text, level).await?,
        };
        Ok(UnitOutput::reply(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::term_loop::DEFINE_SYSTEM;
    use crate::core::Profile;
    use crate::llm::MockLlmClient;
    use crate::memory::{Article, InMemoryTermCache, Summary};
    use crate::tools::SearchResult;

    struct OneResult;

    #[async_trait]
    impl WebSearch for OneResult {
        async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchResult>, TutorError> {
            assert_eq!(max_results, 1);
            Ok(vec![SearchResult {
                title: "환율 급등".into(),
                url: "https://news.example/1".into(),
                ..SearchResult::default()
            }])
        }
    }

    fn unit(mock: MockLlmClient) -> (QaUnit, Arc<MockLlmClient>) {
        let mock = Arc::new(mock);
        let terms = Arc::new(TermCacheLoop::new(mock.clone(), Arc::new(InMemoryTermCache::new())));
        (QaUnit::new(mock.clone(), Arc::new(OneResult), terms), mock)
    }

    fn summary(title: &str, body: &str) -> Summary {
        Summary {
            title: title.into(),
            url: String::new(),
            level: Level::Sprout,
            body: body.into(),
            key_points: vec!["요점".into()],
            metrics: vec![],
            term_candidates: vec![],
            error: None,
        }
    }

    #[test]
    fn test_ordinals_and_smalltalk() {
        assert_eq!(resolve_ordinal("두 번째 기사 설명해줘"), Some(1));
        assert_eq!(resolve_ordinal("3번 요약"), Some(2));
        assert_eq!(resolve_ordinal("금리 알려줘"), None);
        assert_eq!(resolve_ordinal("첫번째 기사"), Some(0));
        assert_eq!(resolve_ordinal("11번 기사 알려줘"), None);
        assert_eq!(resolve_ordinal("21번"), None);
        assert_eq!(resolve_ordinal("기사 2번 다시"), Some(1));
        assert!(is_smalltalk("안녕하세요"));
        assert!(is_smalltalk("Hello there"));
        assert!(!is_smalltalk("금리가 왜 올라?"));
    }

    #[test]
    fn test_chunks_overlap() {
        let text = "가".repeat(1200);
        let chunks = chunk_text(&text, 600, 80);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 600);
        assert_eq!(chunks[2].chars().count(), 1200 - 1040);
        assert!(chunk_text("", 600, 80).is_empty());
    }

    #[test]
    fn test_rank_prefers_overlapping_chunk() {
        let texts = vec!["주가가 올랐다".to_string(), "기준금리를 동결했다".to_string()];
        let top = rank_chunks("기준금리가 뭐야", &texts, 1);
        assert_eq!(top, vec!["기준금리를 동결했다".to_string()]);
    }

    #[tokio::test]
    async fn test_forced_index_uses_that_summary() {
        let (u, mock) = unit(MockLlmClient::new().on(INTERNAL_SYSTEM, "두번째 기사 설명"));
        let ctx = ContextStore {
            summaries: vec![summary("A", "첫 기사 본문"), summary("B", "둘째 기사 본문")],
            ..ContextStore::default()
        };
        let out = u
            .handle(&UnitInput::new("두번째 기사 자세히", Profile::default()), &ctx)
            .await
            .unwrap();
        assert_eq!(out.reply, "두번째 기사 설명");
        let prompt = &mock.seen()[0][1].content;
        assert!(prompt.contains("둘째 기사 본문"));
        assert!(!prompt.contains("첫 기사 본문"));
        assert_eq!(mock.hits(QA_ROUTE_SYSTEM), 0);
    }

    #[tokio::test]
    async fn test_internal_without_corpus_goes_web() {
        let (u, mock) = unit(
            MockLlmClient::new()
                .on(QA_ROUTE_SYSTEM, r#"{"mode":"internal"}"#)
                .on(WEB_SYSTEM, "웹 요약"),
        );
        let out = u
            .handle(&UnitInput::new("오늘 요약 다시", Profile::default()), &ContextStore::default())
            .await
            .unwrap();
        assert_eq!(out.reply, "웹 요약");
        let prompt = &mock.seen()[1][1].content;
        assert!(prompt.contains("- 환율 급등 https://news.example/1"));
    }

    #[tokio::test]
    async fn test_internal_includes_article_content() {
        let (u, mock) = unit(
            MockLlmClient::new()
                .on(QA_ROUTE_SYSTEM, r#"{"mode":"internal"}"#)
                .on(INTERNAL_SYSTEM, "답"),
        );
        let ctx = ContextStore {
            selected_articles: vec![Article {
                title: "t".into(),
                content: "반도체 수출이 늘었다".into(),
                ..Article::default()
            }],
            ..ContextStore::default()
        };
        u.handle(&UnitInput::new("반도체 수출 어땠어", Profile::default()), &ctx)
            .await
            .unwrap();
        assert!(mock.seen()[1][1].content.contains("반도체 수출이 늘었다"));
    }

    #[tokio::test]
    async fn test_term_mode_uses_cache_loop() {
        let (u, mock) = unit(
            MockLlmClient::new()
                .on(QA_ROUTE_SYSTEM, r#"{"mode":"term","term":"공매도"}"#)
                .on(DEFINE_SYSTEM, r#"{"definition":"빌린 주식을 파는 것"}"#),
        );
        let input = UnitInput::new("공매도가 뭐야", Profile::default());
        let first = u.handle(&input, &ContextStore::default()).await.unwrap();
        let second = u.handle(&input, &ContextStore::default()).await.unwrap();
        assert_eq!(first.reply, second.reply);
        assert_eq!(mock.hits(DEFINE_SYSTEM), 1);
    }

    #[tokio::test]
    async fn test_route_failure_falls_back_to_web() {
        let (u, mock) = unit(
            MockLlmClient::new()
                .fail_on(QA_ROUTE_SYSTEM, "down")
                .on(WEB_SYSTEM, "웹"),
        );
        let out = u
            .handle(&UnitInput::new("유가 전망", Profile::default()), &ContextStore::default())
            .await
            .unwrap();
        assert_eq!(out.reply, "웹");
        assert_eq!(mock.hits(WEB_SYSTEM), 1);
    }
}
