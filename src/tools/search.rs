//! Web 搜索服务
//!
//! WebSearch trait：查询 + 结果数上限 -> 有序的 {title, url, snippet} 列表（可能为空）。
//! TavilySearch 通过 reqwest POST 到 Tavily 兼容端点；未配置 api_key 时直接返回空列表。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::config::SearchSection;
use crate::core::TutorError;

/// 单条搜索结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Web 搜索 trait
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, TutorError>;
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyItem>,
}

#[derive(Debug, Deserialize)]
struct TavilyItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
}

/// 解析 RFC 3339 / RFC 2822 / YYYY-MM-DD 日期
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Tavily 搜索客户端（topic = news）
pub struct TavilySearch {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl TavilySearch {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
        }
    }

    /// 从配置构建；api_key 缺省时读取 TAVILY_API_KEY
    pub fn from_config(cfg: &SearchSection) -> Self {
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| std::env::var("TAVILY_API_KEY").ok());
        Self::new(&cfg.endpoint, api_key, cfg.timeout_secs)
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, TutorError> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!("search api key missing, returning no results");
            return Ok(Vec::new());
        };
        let body = serde_json::json!({
            "api_key": api_key,
            "query": query,
            "max_results": max_results.max(1),
            "topic": "news",
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| TutorError::Search(format!("Request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(TutorError::Search(format!("HTTP {}", resp.status())));
        }
        let parsed: TavilyResponse = resp
            .json()
            .await
            .map_err(|e| TutorError::Search(format!("Decode body: {}", e)))?;

        tracing::debug!(query, n = parsed.results.len(), "search ok");
        Ok(parsed
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .take(max_results)
            .map(|r| SearchResult {
                title: r.title,
                url: r.url,
                snippet: r.content,
                published_at: r.published_date.as_deref().and_then(parse_published),
            })
            .collect())
    }
}
