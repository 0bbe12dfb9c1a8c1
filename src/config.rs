//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TUTOR__*` 覆盖（双下划线表示嵌套，如 `TUTOR__LLM__MODEL=gpt-4o-mini`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub planner: PlannerSection,
    pub units: UnitsSection,
    pub summarize: SummarizeSection,
    pub quiz: QuizSection,
    pub term: TermSection,
    pub tools: ToolsSection,
    pub daily: DailySection,
}

/// [app] 段：应用名、会话存储目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话 JSON 文件目录
    pub sessions_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            sessions_dir: PathBuf::from("workspace/sessions"),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// 测验进行中时，不超过此字符数的输入视为作答短语
    pub answer_max_chars: usize,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            answer_max_chars: 12,
        }
    }
}

/// [units] 段：单元调用外层超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnitsSection {
    pub timeout_secs: u64,
}

impl Default for UnitsSection {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

/// [summarize] 段：正文安全截断长度与重试次数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizeSection {
    pub max_content_chars: usize,
    pub retries: usize,
}

impl Default for SummarizeSection {
    fn default() -> Self {
        Self {
            max_content_chars: 4000,
            retries: 3,
        }
    }
}

/// [quiz] 段：每次出题生成的候选数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuizSection {
    pub candidates: usize,
}

impl Default for QuizSection {
    fn default() -> Self {
        Self { candidates: 3 }
    }
}

/// [term] 段：定义生成前检索的结果数（0 表示不检索）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TermSection {
    pub search_results: usize,
}

impl Default for TermSection {
    fn default() -> Self {
        Self { search_results: 3 }
    }
}

/// [tools] 段：外部服务
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsSection {
    pub search: SearchSection,
    pub fetch: FetchSection,
}

/// [tools.search] 段：Web 搜索服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// 未给出关键词时的默认新闻查询
    pub default_query: String,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: "https://api.tavily.com/search".to_string(),
            api_key: None,
            timeout_secs: 15,
            default_query: "경제 뉴스".to_string(),
        }
    }
}

/// [tools.fetch] 段：正文抓取
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub max_chars: usize,
    pub user_agent: String,
    /// 域名 -> CSS 选择器（站点正文抽取规则）
    pub rules: HashMap<String, String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_chars: 8000,
            user_agent: "NewsTutorAgent/1.0".to_string(),
            rules: default_fetch_rules(),
        }
    }
}

fn default_fetch_rules() -> HashMap<String, String> {
    [
        ("www.hankyung.com", "div#articletxt"),
        ("www.yna.co.kr", "div.story-news.article"),
        ("www.mk.co.kr", "div.news_cnt_detail_wrap"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// [daily] 段：批量生成
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DailySection {
    /// 每位用户的文章池大小
    pub pool_size: usize,
    /// 每篇文章的测验题数
    pub quizzes_per_article: usize,
    /// 同时处理的用户数
    pub concurrency: usize,
    pub output_dir: PathBuf,
}

impl Default for DailySection {
    fn default() -> Self {
        Self {
            pool_size: 3,
            quizzes_per_article: 2,
            concurrency: 4,
            output_dir: PathBuf::from("workspace/daily"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TUTOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TUTOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TUTOR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.summarize.max_content_chars, 4000);
        assert_eq!(cfg.units.timeout_secs, 60);
        assert_eq!(cfg.planner.answer_max_chars, 12);
        assert_eq!(
            cfg.tools.fetch.rules.get("www.hankyung.com").map(String::as_str),
            Some("div#articletxt")
        );
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[summarize]\nmax_content_chars = 1200\n\n[quiz]\ncandidates = 1\n"
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.summarize.max_content_chars, 1200);
        assert_eq!(cfg.summarize.retries, 3);
        assert_eq!(cfg.quiz.candidates, 1);
    }
}
