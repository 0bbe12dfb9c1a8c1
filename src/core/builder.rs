//! 组件装配：按配置创建 LLM、外部服务、术语缓存与五个单元
//!
//! 交互终端与批量流水线共用同一套 TutorServices，保证两处的单元配置一致。

use std::sync::Arc;
use std::time::Duration;

use crate::agents::{
    ExplainTermUnit, QaUnit, QuizGenerator, QuizUnit, RetrieveUnit, SummarizeUnit,
    TermCacheLoop, UnitExecutor, UnitRegistry,
};
use crate::config::AppConfig;
use crate::core::Orchestrator;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{InMemoryTermCache, TermCache};
use crate::planner::IntentPlanner;
use crate::tools::{ContentFetcher, ExtractionRules, HttpContentFetcher, TavilySearch, WebSearch};

/// 根据 [llm].provider 选择后端（openai / mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match cfg.llm.provider.to_lowercase().as_str() {
        "mock" => {
            tracing::warn!("Using Mock LLM, replies are echoes");
            Arc::new(MockLlmClient::new())
        }
        provider => {
            if provider != "openai" {
                tracing::warn!(provider, "unknown LLM provider, using OpenAI-compatible client");
            }
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::from_section(&cfg.llm))
        }
    }
}

/// 全部共享服务与单元；术语缓存为进程级，单元之间共享
pub struct TutorServices {
    pub llm: Arc<dyn LlmClient>,
    pub terms: Arc<TermCacheLoop>,
    pub retrieve: Arc<RetrieveUnit>,
    pub summarize: Arc<SummarizeUnit>,
    pub explain_term: Arc<ExplainTermUnit>,
    pub quiz: Arc<QuizUnit>,
    pub qa: Arc<QaUnit>,
    answer_max_chars: usize,
    unit_timeout: Duration,
}

impl TutorServices {
    /// 使用配置中的 HTTP 搜索 / 抓取实现
    pub fn from_config(cfg: &AppConfig) -> Self {
        let llm = create_llm_from_config(cfg);
        let search: Arc<dyn WebSearch> = Arc::new(TavilySearch::from_config(&cfg.tools.search));
        let fetcher: Arc<dyn ContentFetcher> = Arc::new(HttpContentFetcher::from_config(&cfg.tools.fetch));
        Self::with_services(cfg, llm, search, fetcher, Arc::new(InMemoryTermCache::new()))
    }

    /// 注入任意 LLM / 搜索 / 抓取 / 缓存实现（测试用 Mock 与内存假实现）
    pub fn with_services(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn WebSearch>,
        fetcher: Arc<dyn ContentFetcher>,
        cache: Arc<dyn TermCache>,
    ) -> Self {
        let terms = Arc::new(
            TermCacheLoop::new(llm.clone(), cache).with_search(search.clone(), cfg.term.search_results),
        );
        let retrieve = Arc::new(RetrieveUnit::new(
            llm.clone(),
            search.clone(),
            fetcher,
            ExtractionRules::new(cfg.tools.fetch.rules.clone()),
            cfg.tools.search.default_query.clone(),
        ));
        let summarize = Arc::new(SummarizeUnit::new(
            llm.clone(),
            cfg.summarize.max_content_chars,
            cfg.summarize.retries,
        ));
        let explain_term = Arc::new(ExplainTermUnit::new(llm.clone(), terms.clone()));
        let quiz = Arc::new(QuizUnit::new(
            llm.clone(),
            QuizGenerator::new(llm.clone(), cfg.quiz.candidates),
        ));
        let qa = Arc::new(QaUnit::new(llm.clone(), search, terms.clone()));

        Self {
            llm,
            terms,
            retrieve,
            summarize,
            explain_term,
            quiz,
            qa,
            answer_max_chars: cfg.planner.answer_max_chars,
            unit_timeout: Duration::from_secs(cfg.units.timeout_secs),
        }
    }

    /// 覆盖单元超时（测试中用毫秒级）
    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn registry(&self) -> UnitRegistry {
        let mut registry = UnitRegistry::new();
        registry.register_arc(self.retrieve.clone());
        registry.register_arc(self.summarize.clone());
        registry.register_arc(self.explain_term.clone());
        registry.register_arc(self.quiz.clone());
        registry.register_arc(self.qa.clone());
        registry
    }

    /// 组装编排循环；规划分类与单元共用同一超时
    pub fn orchestrator(&self) -> Orchestrator {
        let planner =
            IntentPlanner::new(self.llm.clone(), self.answer_max_chars).with_timeout(self.unit_timeout);
        Orchestrator::new(planner, UnitExecutor::with_timeout(self.registry(), self.unit_timeout))
    }
}
