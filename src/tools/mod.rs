//! 外部服务：Web 搜索与正文抓取

pub mod fetch;
pub mod search;

pub use fetch::{clean_article_text, extract_domain, ContentFetcher, ExtractionRules, HttpContentFetcher};
pub use search::{parse_published, SearchResult, TavilySearch, WebSearch};
