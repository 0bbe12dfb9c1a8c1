//! Term Cache Loop：带缓存命中/未命中分支的术语定义子流程
//!
//! define：精确查缓存，命中直接返回；未命中时（可选）先做 Web 检索作依据，再生成 2~3 句定义，
//! 按字面术语写入缓存。同一术语的并发未命中按术语加锁（single-flight），第二个调用者读取第一个的写入。
//! 生成失败返回占位文本且不写缓存。
//!
//! 上下文模式（explain_in_context / explain_text）用给定文本做消歧义，既不读也不写缓存。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{Level, TutorError};
use crate::llm::{ask_json, LlmClient};
use crate::memory::{Message, TermCache, TermExplanation};
use crate::tools::WebSearch;

/// 通用定义提示
pub const DEFINE_SYSTEM: &str = "당신은 경제 용어 사전입니다.";
/// 上下文解释提示
pub const CONTEXTUAL_SYSTEM: &str = "당신은 친절한 경제 선생님입니다.";
/// 术语抽取提示
pub const EXTRACT_TERMS_SYSTEM: &str = "당신은 경제 기사에서 핵심 용어를 고르는 편집자입니다.";

const MIN_EXTRACTED_TERMS: usize = 3;
const MAX_EXTRACTED_TERMS: usize = 5;

/// 通用定义的难度说明
pub fn general_style(level: Level) -> &'static str {
    match level {
        Level::Seed => "아주 쉬운 비유(예: 용돈, 장난감)를 들어 유치원생에게 설명하듯 해줘.",
        Level::Sprout => "초등학생도 이해할 수 있는 쉬운 단어로 설명해줘.",
        Level::Tree => "대학생 수준으로 정확한 경제적 정의와 예시를 들어줘.",
        Level::Forest => "전문가 수준의 깊이 있는 정의와 경제적 함의를 설명해줘.",
    }
}

/// 上下文解释的难度说明
pub fn contextual_style(level: Level) -> &'static str {
    match level {
        Level::Seed => "유치원생도 이해할 수 있는 아주 쉬운 비유를 들어 설명해줘.",
        Level::Sprout => "초등학생이 이해할 수 있게 쉬운 말로 풀어서 설명해줘.",
        Level::Tree => "경제학 기초 지식이 있는 대학생에게 설명하듯 명확하게 정의해줘.",
        Level::Forest => "전문적인 경제 용어를 사용하여 깊이 있게 설명해줘.",
    }
}

/// 生成失败时的占位文本（不写缓存）
pub fn unavailable_definition(term: &str) -> String {
    format!(
        "죄송해요, '{}'에 대한 설명을 생성하지 못했어요. 잠시 후 다시 시도해 주세요.",
        term
    )
}

#[derive(Debug, Deserialize, JsonSchema)]
struct Definition {
    #[serde(default)]
    #[allow(dead_code)]
    term: String,
    /// 2~3 句定义
    definition: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct Explanations {
    explanations: Vec<TermExplanation>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractedTerms {
    /// 3~5 个核心经济术语
    terms: Vec<String>,
}

/// 一次定义查询的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermLookup {
    /// 缓存命中，未发生外部调用
    Hit(String),
    /// 未命中，新生成并已写入缓存
    Generated(String),
    /// 生成失败，占位文本，未写缓存
    Failed(String),
}

impl TermLookup {
    pub fn definition(&self) -> &str {
        match self {
            TermLookup::Hit(d) | TermLookup::Generated(d) | TermLookup::Failed(d) => d,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, TermLookup::Hit(_))
    }
}

type InflightMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// 某术语的 in-flight 锁；drop 时（包括调用被取消）若已无其他持有者则移出 map
struct InflightSlot<'a> {
    inflight: &'a InflightMap,
    term: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        // map 内一份 + 本 slot 一份：没有其他等待者
        let same = map
            .get(&self.term)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock));
        if same && Arc::strong_count(&self.lock) <= 2 {
            map.remove(&self.term);
        }
    }
}

/// 术语定义子流程：缓存 + 按术语 single-flight + 生成
pub struct TermCacheLoop {
    llm: Arc<dyn LlmClient>,
    search: Option<Arc<dyn WebSearch>>,
    cache: Arc<dyn TermCache>,
    search_results: usize,
    inflight: InflightMap,
}

impl TermCacheLoop {
    pub fn new(llm: Arc<dyn LlmClient>, cache: Arc<dyn TermCache>) -> Self {
        Self {
            llm,
            search: None,
            cache,
            search_results: 0,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// 生成定义前先检索 n 条结果作为依据
    pub fn with_search(mut self, search: Arc<dyn WebSearch>, search_results: usize) -> Self {
        self.search = Some(search);
        self.search_results = search_results;
        self
    }

    pub fn cache(&self) -> &Arc<dyn TermCache> {
        &self.cache
    }

    fn slot_for(&self, term: &str) -> InflightSlot<'_> {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        let lock = map.entry(term.to_string()).or_default().clone();
        InflightSlot {
            inflight: &self.inflight,
            term: term.to_string(),
            lock,
        }
    }

    /// 缓存增强的通用定义
    pub async fn define(&self, term: &str, context: &str, level: Level) -> TermLookup {
        if let Some(cached) = self.cache.get(term) {
            tracing::debug!(term, "term cache hit");
            return TermLookup::Hit(cached);
        }

        let slot = self.slot_for(term);
        let _guard = slot.lock.lock().await;
        if let Some(cached) = self.cache.get(term) {
            tracing::debug!(term, "term cache filled while waiting");
            return TermLookup::Hit(cached);
        }
        match self.generate(term, context, level).await {
            Ok(definition) => {
                self.cache.insert_if_absent(term, &definition);
                tracing::info!(term, "term cache miss, stored");
                TermLookup::Generated(definition)
            }
            Err(e) => {
                tracing::warn!(term, error = %e, "definition generation failed");
                TermLookup::Failed(unavailable_definition(term))
            }
        }
    }

    /// 显式重新生成：成功时覆盖缓存
    pub async fn regenerate(&self, term: &str, context: &str, level: Level) -> TermLookup {
        let slot = self.slot_for(term);
        let _guard = slot.lock.lock().await;
        match self.generate(term, context, level).await {
            Ok(definition) => {
                self.cache.overwrite(term, &definition);
                TermLookup::Generated(definition)
            }
            Err(e) => {
                tracing::warn!(term, error = %e, "regeneration failed, cache untouched");
                TermLookup::Failed(unavailable_definition(term))
            }
        }
    }

    async fn grounding(&self, term: &str) -> String {
        let Some(search) = self.search.as_ref().filter(|_| self.search_results > 0) else {
            return String::new();
        };
        match search
            .search(&format!("{} 경제 용어 뜻", term), self.search_results)
            .await
        {
            Ok(results) => results
                .iter()
                .map(|r| format!("- {}: {}", r.title, r.snippet))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                tracing::warn!(term, error = %e, "grounding search failed, continuing without");
                String::new()
            }
        }
    }

    async fn generate(&self, term: &str, context: &str, level: Level) -> Result<String, TutorError> {
        let grounding = self.grounding(term).await;
        let system = format!(
            "{DEFINE_SYSTEM} 사용자가 묻는 용어에 대해 뉴스 문맥 없이도 이해할 수 있는 일반적인 정의를 2~3문장으로 내려주세요.\n난이도: {}",
            general_style(level)
        );
        let mut user = format!("용어: {}", term);
        if !context.trim().is_empty() {
            user.push_str(&format!("\n\n[참고 문장]\n{}", context));
        }
        if !grounding.is_empty() {
            user.push_str(&format!("\n\n[검색 결과]\n{}", grounding));
        }

        let messages = [Message::system(system), Message::user(user)];
        let def: Definition = ask_json(self.llm.as_ref(), &messages).await?;
        let definition = def.definition.trim().to_string();
        if definition.is_empty() {
            return Err(TutorError::JsonParse("empty definition".to_string()));
        }
        Ok(definition)
    }

    /// 上下文模式：用给定文本解释多个术语（不走缓存）
    pub async fn explain_in_context(
        &self,
        text: &str,
        terms: &[String],
        level: Level,
    ) -> Result<Vec<TermExplanation>, TutorError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let system = format!(
            "{CONTEXTUAL_SYSTEM} 주어진 뉴스 요약문과 용어 목록을 보고, 각 용어가 이 뉴스 맥락에서 어떤 의미로 쓰였는지 1~2문장으로 설명해주세요.\n설명 난이도: {}",
            contextual_style(level)
        );
        let messages = [
            Message::system(system),
            Message::user(format!(
                "뉴스 요약: {}\n설명할 용어들: {}",
                text,
                terms.join(", ")
            )),
        ];
        let out: Explanations = ask_json(self.llm.as_ref(), &messages).await?;
        Ok(out
            .explanations
            .into_iter()
            .filter(|e| !e.term.trim().is_empty() && !e.definition.trim().is_empty())
            .collect())
    }

    /// 从文本中抽取 3~5 个候选术语
    ///
    /// 多于 5 个截断；少于 3 个时追加提示重问一次，取两次中较多的一份。
    /// 重问后仍不足 3 个就按实际数量返回（可能为空），由调用方决定是否跳过。
    pub async fn extract_terms(&self, text: &str) -> Result<Vec<String>, TutorError> {
        let mut terms = self.request_terms(text, false).await?;
        if terms.len() < MIN_EXTRACTED_TERMS {
            tracing::debug!(n = terms.len(), "too few terms extracted, asking again");
            match self.request_terms(text, true).await {
                Ok(retry) if retry.len() > terms.len() => terms = retry,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "term re-extraction failed"),
            }
        }
        Ok(terms)
    }

    async fn request_terms(&self, text: &str, insist: bool) -> Result<Vec<String>, TutorError> {
        let mut system = format!(
            "{EXTRACT_TERMS_SYSTEM} 아래 글에서 독자가 모를 법한 핵심 경제 용어 {MIN_EXTRACTED_TERMS}~{MAX_EXTRACTED_TERMS}개를 골라주세요."
        );
        if insist {
            system.push_str(&format!(
                "\n반드시 {}개 이상 고르세요. 일반적인 경제 단어라도 괜찮습니다.",
                MIN_EXTRACTED_TERMS
            ));
        }
        let messages = [Message::system(system), Message::user(text.to_string())];
        let out: ExtractedTerms = ask_json(self.llm.as_ref(), &messages).await?;
        let mut terms: Vec<String> = Vec::new();
        for t in out.terms {
            let t = t.trim().to_string();
            if !t.is_empty() && !terms.contains(&t) {
                terms.push(t);
            }
        }
        terms.truncate(MAX_EXTRACTED_TERMS);
        Ok(terms)
    }

    /// 批量上下文模式：抽取后按同一文本解释
    pub async fn explain_text(&self, text: &str, level: Level) -> Result<Vec<TermExplanation>, TutorError> {
        let terms = self.extract_terms(text).await?;
        self.explain_in_context(text, &terms, level).await
    }
}
