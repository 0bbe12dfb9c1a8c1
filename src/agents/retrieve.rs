//! 新闻检索单元
//!
//! 从用户文本中抽取 {keyword, k}，调用 Web 搜索、按 URL 去重取前 k 篇，
//! 再按站点规则抓取正文，写入 selectedArticles。
//! 批量模式 build_daily_pool 按兴趣逐个检索（单个兴趣检索失败只跳过），过滤、按标题去重、最新优先，写入 dailyPool。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::agents::{AgentUnit, UnitInput, UnitName, UnitOutput};
use crate::core::{Profile, TutorError};
use crate::llm::{ask_json, LlmClient};
use crate::memory::{Article, ContextMutation, ContextStore, Message};
use crate::tools::{extract_domain, ContentFetcher, ExtractionRules, SearchResult, WebSearch};

/// 检索参数抽取提示
pub const SEARCH_PARAMS_SYSTEM: &str = "사용자의 입력에서 뉴스 검색을 위한 '핵심 키워드(keyword)'와 '요청 개수(k)'를 추출하세요.\n\
- keyword: 검색어 (명확하지 않으면 null)\n\
- k: 1~5 사이 숫자 (언급 없으면 1)\n\
- reason: 추출 근거\n\n\
예시:\n\
- '삼성전자 기사 3개 찾아줘' -> {\"keyword\": \"삼성전자\", \"k\": 3}\n\
- '최근 경제 뉴스 보여줘' -> {\"keyword\": \"경제\", \"k\": 1}\n\
- '요약해줘' -> {\"keyword\": null, \"k\": 1}";

const MAX_K: usize = 5;

/// 检索参数（LLM 结构化输出）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// 核心关键词；不明确时为 null
    #[serde(default)]
    pub keyword: Option<String>,
    /// 请求篇数（1..=5）
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_k() -> usize {
    1
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            keyword: None,
            k: 1,
            reason: None,
        }
    }
}

/// 检索单元：持有 LLM、搜索、抓取服务与站点规则
pub struct RetrieveUnit {
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn WebSearch>,
    fetcher: Arc<dyn ContentFetcher>,
    rules: ExtractionRules,
    default_query: String,
}

impl RetrieveUnit {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn WebSearch>,
        fetcher: Arc<dyn ContentFetcher>,
        rules: ExtractionRules,
        default_query: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            search,
            fetcher,
            rules,
            default_query: default_query.into(),
        }
    }

    /// 抽取检索参数；解析失败回退 {None, 1}
    pub async fn extract_params(&self, text: &str) -> SearchParams {
        let messages = [Message::system(SEARCH_PARAMS_SYSTEM), Message::user(text)];
        let mut params = match ask_json::<SearchParams>(self.llm.as_ref(), &messages).await {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "search params fallback");
                SearchParams::default()
            }
        };
        params.keyword = params
            .keyword
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        params.k = params.k.clamp(1, MAX_K);
        params
    }

    /// 抓取正文并转为 Article
    async fn hydrate(&self, results: Vec<SearchResult>) -> Vec<Article> {
        let fetches = results.iter().map(|r| {
            let rule = self.rules.rule_for(&r.url);
            self.fetcher.fetch(&r.url, rule)
        });
        let bodies = join_all(fetches).await;
        results
            .into_iter()
            .zip(bodies)
            .map(|(r, content)| Article {
                source: extract_domain(&r.url).unwrap_or_default(),
                title: r.title,
                url: r.url,
                published_at: r.published_at,
                snippet: r.snippet,
                content,
            })
            .collect()
    }

    /// 批量模式：按兴趣检索，兴趣过滤、按标题去重、最新优先，取前 pool_size 篇
    pub async fn build_daily_pool(
        &self,
        profile: &Profile,
        pool_size: usize,
    ) -> Result<Vec<Article>, TutorError> {
        let queries: Vec<String> = if profile.interests.is_empty() {
            vec![self.default_query.clone()]
        } else {
            profile.interests.clone()
        };

        let mut results = Vec::new();
        let mut seen_urls = HashSet::new();
        let mut failed = 0usize;
        let mut last_err = None;
        for query in &queries {
            match self.search.search(query, MAX_K).await {
                Ok(hits) => {
                    for r in hits {
                        if seen_urls.insert(r.url.clone()) {
                            results.push(r);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "daily pool query failed, skipping");
                    failed += 1;
                    last_err = Some(e);
                }
            }
        }
        // 全部查询失败才算失败
        if failed == queries.len() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }

        let interests: Vec<String> = profile.interests.iter().map(|i| i.to_lowercase()).collect();
        let mut seen_titles = HashSet::new();
        let mut pool: Vec<Article> = self
            .hydrate(results)
            .await
            .into_iter()
            .filter(|a| matches_interests(a, &interests))
            .filter(|a| seen_titles.insert(a.title.clone()))
            .collect();
        pool.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        pool.truncate(pool_size);

        tracing::info!(n = pool.len(), queries = queries.len(), "daily pool built");
        Ok(pool)
    }
}

/// 兴趣为空时全部通过；否则标题 / 摘要片段 / 正文任一包含任一兴趣
fn matches_interests(article: &Article, interests: &[String]) -> bool {
    if interests.is_empty() {
        return true;
    }
    let title = article.title.to_lowercase();
    let snippet = article.snippet.to_lowercase();
    let content = article.content.to_lowercase();
    interests
        .iter()
        .any(|k| title.contains(k) || snippet.contains(k) || content.contains(k))
}

#[async_trait]
impl AgentUnit for RetrieveUnit {
    fn name(&self) -> UnitName {
        UnitName::Retrieve
    }

    async fn handle(&self, input: &UnitInput, _ctx: &ContextStore) -> Result<UnitOutput, TutorError> {
        let params = self.extract_params(&input.text).await;
        let query = params.keyword.clone().unwrap_or_else(|| self.default_query.clone());
        tracing::info!(query = %query, k = params.k, "retrieve");

        let mut seen = HashSet::new();
        let picks: Vec<SearchResult> = self
            .search
            .search(&query, params.k * 2)
            .await?
            .into_iter()
            .filter(|r| seen.insert(r.url.clone()))
            .take(params.k)
            .collect();

        let label = params.keyword.as_deref().unwrap_or("최근");
        if picks.is_empty() {
            return Ok(UnitOutput::reply(format!(
                "'{}' 관련 기사를 찾지 못했습니다.",
                label
            )));
        }

        let articles = self.hydrate(picks).await;
        let mut lines = vec![format!("'{}' 관련 상위 {}개", label, articles.len())];
        for (i, a) in articles.iter().enumerate() {
            lines.push(format!("{}. {} ({})\n   {}", i + 1, a.title, a.source, a.url));
        }

        Ok(UnitOutput::reply(lines.join("\n")).with(ContextMutation::SelectedArticles(articles)))
    }
}
