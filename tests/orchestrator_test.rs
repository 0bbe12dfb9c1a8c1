//! 编排循环端到端测试：Mock LLM + 内存搜索 / 抓取

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use news_tutor::agents::explain_term::TERM_TARGET_SYSTEM;
use news_tutor::agents::qa::{QA_ROUTE_SYSTEM, WEB_SYSTEM};
use news_tutor::agents::quiz::{ACTION_SYSTEM, NO_MATERIAL_MESSAGE, QUIZ_SYSTEM};
use news_tutor::agents::retrieve::SEARCH_PARAMS_SYSTEM;
use news_tutor::agents::summarize::SUMMARY_SYSTEM;
use news_tutor::agents::term_loop::DEFINE_SYSTEM;
use news_tutor::agents::{UnitName, UNIT_TIMEOUT_MESSAGE};
use news_tutor::config::AppConfig;
use news_tutor::core::{ConversationState, Level, Phase, Profile, TutorError, TutorServices};
use news_tutor::llm::MockLlmClient;
use news_tutor::memory::{FileSessionStore, InMemoryTermCache, SessionStore, TermCache};
use news_tutor::planner::ROUTER_SYSTEM;
use news_tutor::tools::{ContentFetcher, SearchResult, WebSearch};

const SUMMARY_DRAFT: &str = r#"{"summary":"한국은행이 기준금리를 연 3.50%로 동결했다.","key_points":["동결","물가","환율"],"metrics":[],"term_candidates":["기준금리"]}"#;
const OX_DRAFT: &str = r#"{"question":"한국은행은 기준금리를 동결했다.","answer":true,"rationale":"본문에 동결했다고 나온다."}"#;

struct FakeSearch;

#[async_trait]
impl WebSearch for FakeSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, TutorError> {
        Ok((1..=3)
            .map(|i| SearchResult {
                title: format!("{} 기사 {}", query, i),
                url: format!("https://www.yna.co.kr/view/{}", i),
                snippet: format!("{} 관련", query),
                published_at: None,
            })
            .take(max_results)
            .collect())
    }
}

struct FakeFetch {
    delay: Option<Duration>,
}

#[async_trait]
impl ContentFetcher for FakeFetch {
    async fn fetch(&self, url: &str, rule: Option<&str>) -> String {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        format!("{} 본문 (rule: {})", url, rule.unwrap_or("none"))
    }
}

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.quiz.candidates = 1;
    cfg.summarize.retries = 1;
    cfg.term.search_results = 0;
    cfg
}

fn services_with(mock: Arc<MockLlmClient>, fetch_delay: Option<Duration>) -> TutorServices {
    TutorServices::with_services(
        &config(),
        mock,
        Arc::new(FakeSearch),
        Arc::new(FakeFetch { delay: fetch_delay }),
        Arc::new(InMemoryTermCache::new()),
    )
}

fn seed_state() -> ConversationState {
    ConversationState::new(Profile::new(Level::Seed, vec![]))
}

#[tokio::test]
async fn retrieve_then_quiz_without_summaries_reports_no_material() {
    let mock = Arc::new(
        MockLlmClient::new()
            .on(ROUTER_SYSTEM, r#"{"intents":["news_find","quiz"]}"#)
            .on(SEARCH_PARAMS_SYSTEM, r#"{"keyword":"금리","k":1}"#)
            .on(ACTION_SYSTEM, r#"{"action":"REQUEST"}"#)
            .on(QUIZ_SYSTEM, OX_DRAFT),
    );
    let orch = services_with(mock.clone(), None).orchestrator();
    let mut state = seed_state();

    let out = orch.run_turn(&mut state, "최근 금리 기사 찾아서 퀴즈 내줘").await;

    assert_eq!(out.plan, vec![UnitName::Retrieve, UnitName::Quiz]);
    assert_eq!(out.steps.len(), 2);
    assert!(out.steps[0].reply.contains("금리 기사 1"));
    assert_eq!(out.steps[1].reply, NO_MATERIAL_MESSAGE);
    assert_eq!(state.context.selected_articles.len(), 1);
    assert_eq!(
        state.context.selected_articles[0].content,
        "https://www.yna.co.kr/view/1 본문 (rule: div.story-news.article)"
    );
    assert!(state.context.active_quiz.is_none());
    assert_eq!(mock.hits(QUIZ_SYSTEM), 0);
    assert_eq!(state.phase(), Phase::Done);
}

#[tokio::test]
async fn quiz_lifecycle_rejects_second_request_and_clears_on_answer() {
    let mock = Arc::new(
        MockLlmClient::new()
            .on(ROUTER_SYSTEM, r#"{"intents":["quiz","summarize","retrieve"]}"#)
            .on(SEARCH_PARAMS_SYSTEM, r#"{"keyword":"금리","k":1}"#)
            .on(SUMMARY_SYSTEM, SUMMARY_DRAFT)
            .on(ACTION_SYSTEM, r#"{"action":"REQUEST"}"#)
            .on(QUIZ_SYSTEM, OX_DRAFT),
    );
    let orch = services_with(mock.clone(), None).orchestrator();
    let mut state = seed_state();

    let out = orch.run_turn(&mut state, "금리 기사 찾아서 요약하고 퀴즈 내줘").await;
    assert_eq!(
        out.plan,
        vec![UnitName::Retrieve, UnitName::Summarize, UnitName::Quiz]
    );
    assert!(out.steps[2].reply.contains("Q. 한국은행은 기준금리를 동결했다."));
    let posed = state.context.active_quiz.clone().expect("quiz should be active");

    // 短句 -> [quiz]，分类为 REQUEST，被拒绝，题目不变
    let out = orch.run_turn(&mut state, "퀴즈 하나 더 내줘").await;
    assert_eq!(out.plan, vec![UnitName::Quiz]);
    assert_eq!(state.context.active_quiz.as_ref(), Some(&posed));
    assert_eq!(mock.hits(QUIZ_SYSTEM), 1);

    let router_calls = mock.hits(ROUTER_SYSTEM);
    let out = orch.run_turn(&mut state, "O").await;
    assert_eq!(out.plan, vec![UnitName::Quiz]);
    assert!(out.steps[0].reply.contains("정답입니다"));
    assert!(state.context.active_quiz.is_none());
    assert_eq!(mock.hits(ROUTER_SYSTEM), router_calls);
}

#[tokio::test]
async fn giveup_reveals_answer_and_clears_quiz() {
    let mock = Arc::new(
        MockLlmClient::new()
            .on(ROUTER_SYSTEM, r#"{"intents":["retrieve","summarize","quiz"]}"#)
            .on(SEARCH_PARAMS_SYSTEM, r#"{"keyword":"금리","k":1}"#)
            .on(SUMMARY_SYSTEM, SUMMARY_DRAFT)
            .on(ACTION_SYSTEM, r#"{"action":"REQUEST","type":"OX"}"#)
            .on(QUIZ_SYSTEM, OX_DRAFT),
    );
    let orch = services_with(mock, None).orchestrator();
    let mut state = seed_state();
    orch.run_turn(&mut state, "금리 퀴즈").await;
    assert!(state.context.has_active_quiz());

    let out = orch.run_turn(&mut state, "모르겠어").await;
    assert_eq!(out.plan, vec![UnitName::Quiz]);
    assert!(out.steps[0].reply.starts_with("정답은 **O**"));
    assert!(state.context.active_quiz.is_none());
}

#[tokio::test]
async fn term_definition_cached_across_turns() {
    let mock = Arc::new(
        MockLlmClient::new()
            .on(ROUTER_SYSTEM, r#"{"intents":["explain-term"]}"#)
            .on(TERM_TARGET_SYSTEM, r#"{"term":"공매도"}"#)
            .on(DEFINE_SYSTEM, r#"{"definition":"주식을 빌려서 먼저 파는 거래입니다."}"#),
    );
    let cache = Arc::new(InMemoryTermCache::new());
    let services = TutorServices::with_services(
        &config(),
        mock.clone(),
        Arc::new(FakeSearch),
        Arc::new(FakeFetch { delay: None }),
        cache.clone(),
    );
    let orch = services.orchestrator();
    let mut state = seed_state();

    let first = orch.run_turn(&mut state, "공매도가 뭐야?").await;
    let second = orch.run_turn(&mut state, "공매도가 뭐야?").await;

    assert_eq!(first.steps[0].reply, second.steps[0].reply);
    assert_eq!(mock.hits(DEFINE_SYSTEM), 1);
    assert_eq!(
        cache.get("공매도").as_deref(),
        Some("주식을 빌려서 먼저 파는 거래입니다.")
    );
}

#[tokio::test]
async fn unknown_intent_routes_to_qa() {
    let mock = Arc::new(
        MockLlmClient::new()
            .on(ROUTER_SYSTEM, r#"{"intents":["weather"]}"#)
            .on(QA_ROUTE_SYSTEM, r#"{"mode":"web"}"#)
            .on(WEB_SYSTEM, "검색 결과를 정리했어요."),
    );
    let orch = services_with(mock, None).orchestrator();
    let mut state = seed_state();
    let out = orch.run_turn(&mut state, "내일 날씨 어때").await;
    assert_eq!(out.plan, vec![UnitName::Qa]);
    assert_eq!(out.steps[0].reply, "검색 결과를 정리했어요.");
}

#[tokio::test]
async fn timed_out_step_is_skipped_and_next_step_runs() {
    let mock = Arc::new(
        MockLlmClient::new()
            .on(ROUTER_SYSTEM, r#"{"intents":["retrieve","summarize"]}"#)
            .on(SEARCH_PARAMS_SYSTEM, r#"{"keyword":"금리","k":1}"#),
    );
    let orch = services_with(mock, Some(Duration::from_millis(500)))
        .with_unit_timeout(Duration::from_millis(50))
        .orchestrator();
    let mut state = seed_state();

    let out = orch.run_turn(&mut state, "금리 기사 찾아서 요약해줘").await;

    assert_eq!(out.steps.len(), 2);
    assert!(out.steps[0].failed);
    assert_eq!(out.steps[0].reply, UNIT_TIMEOUT_MESSAGE);
    assert!(state.context.selected_articles.is_empty());
    assert!(out.steps[1].reply.contains("요약할 기사가 없습니다"));
    assert_eq!(state.cursor(), 2);
}

#[tokio::test]
async fn active_quiz_survives_session_store_roundtrip() {
    let mock = Arc::new(
        MockLlmClient::new()
            .on(ROUTER_SYSTEM, r#"{"intents":["retrieve","summarize","quiz"]}"#)
            .on(SEARCH_PARAMS_SYSTEM, r#"{"keyword":"금리","k":1}"#)
            .on(SUMMARY_SYSTEM, SUMMARY_DRAFT)
            .on(ACTION_SYSTEM, r#"{"action":"REQUEST"}"#)
            .on(QUIZ_SYSTEM, OX_DRAFT),
    );
    let orch = services_with(mock, None).orchestrator();
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path());

    let mut state = seed_state();
    orch.run_turn(&mut state, "금리 퀴즈 내줘").await;
    store.save("s1", &state).await.unwrap();

    let mut loaded = store.load("s1").await.unwrap().unwrap();
    assert!(loaded.context.has_active_quiz());
    let out = orch.run_turn(&mut loaded, "X").await;
    assert!(out.steps[0].reply.contains("땡!"));
    assert!(loaded.context.active_quiz.is_none());
}
