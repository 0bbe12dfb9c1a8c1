//! 术语定义缓存：进程级、可注入的 key/value 服务
//!
//! 未命中时由 Term Cache Loop 写入；写入后不会被隐式覆盖，
//! 只有显式重新生成（overwrite）才会替换已有条目。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// 术语缓存 trait：按字面术语精确匹配
pub trait TermCache: Send + Sync {
    /// 精确查找
    fn get(&self, term: &str) -> Option<String>;

    /// 仅在不存在时写入；返回是否真正写入
    fn insert_if_absent(&self, term: &str, definition: &str) -> bool;

    /// 显式重新生成后覆盖
    fn overwrite(&self, term: &str, definition: &str);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 内存实现：测试中每个用例可各自创建独立实例
#[derive(Clone, Default)]
pub struct InMemoryTermCache {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryTermCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TermCache for InMemoryTermCache {
    fn get(&self, term: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(term).cloned()
    }

    fn insert_if_absent(&self, term: &str, definition: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(term) {
            return false;
        }
        entries.insert(term.to_string(), definition.to_string());
        true
    }

    fn overwrite(&self, term: &str, definition: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(term.to_string(), definition.to_string());
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
