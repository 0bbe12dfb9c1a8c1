//! 正文抓取服务：站点规则（CSS 选择器）、超时、结果大小限制
//!
//! ContentFetcher trait：URL + 站点抽取规则 -> 纯文本；任何失败都返回空字符串。
//! 命中规则时用 scraper 选取正文容器并丢弃 script/style/figure/aside；
//! 无规则或选择器未命中时用 html2text 提取整页可读文本。

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Node, Selector};

use crate::config::FetchSection;

/// 正文抓取 trait
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// rule 为 CSS 选择器；失败返回空字符串
    async fn fetch(&self, url: &str, rule: Option<&str>) -> String;
}

/// 域名 -> 选择器
#[derive(Debug, Clone, Default)]
pub struct ExtractionRules {
    rules: HashMap<String, String>,
}

impl ExtractionRules {
    pub fn new(rules: HashMap<String, String>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Self { rules }
    }

    pub fn rule_for(&self, url: &str) -> Option<&str> {
        let domain = extract_domain(url)?;
        self.rules.get(&domain).map(String::as_str)
    }
}

/// 从 URL 中提取 host（不含端口与路径）
pub fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let url = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let host = url.split('/').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_lowercase())
}

static BRACKET_TAG_RE: OnceLock<Option<Regex>> = OnceLock::new();
static BLANK_LINES_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 去除 [서울=연합뉴스] 之类的方括号标签，压缩多余空行
pub fn clean_article_text(text: &str) -> String {
    let mut out = text.to_string();
    if let Some(re) = BRACKET_TAG_RE
        .get_or_init(|| Regex::new(r"\[[^\]]*\]").ok())
        .as_ref()
    {
        out = re.replace_all(&out, "").into_owned();
    }
    if let Some(re) = BLANK_LINES_RE
        .get_or_init(|| Regex::new(r"\n{3,}").ok())
        .as_ref()
    {
        out = re.replace_all(&out, "\n\n").into_owned();
    }
    out.trim().to_string()
}

const SKIPPED_TAGS: [&str; 4] = ["script", "style", "figure", "aside"];

/// 用选择器抽取正文；选择器非法或未命中时返回 None
pub fn extract_with_rule(html: &str, rule: &str) -> Option<String> {
    let selector = Selector::parse(rule).ok()?;
    let doc = Html::parse_document(html);
    let container = doc.select(&selector).next()?;

    let mut parts = Vec::new();
    for node in container.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| SKIPPED_TAGS.contains(&e.name()))
                .unwrap_or(false)
        });
        let t = text.trim();
        if !skipped && !t.is_empty() {
            parts.push(t.to_string());
        }
    }
    let joined = parts.join("\n");
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect()
    } else {
        text
    }
}

/// 基于 reqwest 的正文抓取
pub struct HttpContentFetcher {
    client: Client,
    max_chars: usize,
}

impl HttpContentFetcher {
    pub fn new(user_agent: &str, timeout_secs: u64, max_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self { client, max_chars }
    }

    pub fn from_config(cfg: &FetchSection) -> Self {
        Self::new(&cfg.user_agent, cfg.timeout_secs, cfg.max_chars)
    }

    async fn get(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {}", e))?;
        Ok(body.trim_start_matches('\u{FEFF}').to_string())
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str, rule: Option<&str>) -> String {
        let html = match self.get(url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(url, error = %e, "fetch failed");
                return String::new();
            }
        };

        let text = rule
            .and_then(|r| extract_with_rule(&html, r))
            .or_else(|| {
                html2text::from_read(html.as_bytes(), 120)
                    .ok()
                    .filter(|t| !t.trim().is_empty())
            })
            .unwrap_or_default();

        truncate_chars(clean_article_text(&text), self.max_chars)
    }
}
