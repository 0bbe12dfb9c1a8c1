//! 会话持久化
//!
//! 按会话 ID 加载/保存 ConversationState；核心只在轮次边界调用。
//! 提供内存实现与「每个会话一个 JSON 文件」的文件实现。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::ConversationState;

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 不存在时返回 None
    async fn load(&self, conversation_id: &str) -> anyhow::Result<Option<ConversationState>>;

    async fn save(&self, conversation_id: &str, state: &ConversationState) -> anyhow::Result<()>;
}

/// 内存会话存储
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, ConversationState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, conversation_id: &str) -> anyhow::Result<Option<ConversationState>> {
        Ok(self.sessions.read().await.get(conversation_id).cloned())
    }

    async fn save(&self, conversation_id: &str, state: &ConversationState) -> anyhow::Result<()> {
        self.sessions
            .write()
            .await
            .insert(conversation_id.to_string(), state.clone());
        Ok(())
    }
}

/// 文件会话存储：<root>/<conversation_id>.json
#[derive(Debug)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        // 会话 ID 只保留安全字符，防止路径穿越
        let safe: String = conversation_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, conversation_id: &str) -> anyhow::Result<Option<ConversationState>> {
        let path = self.path_for(conversation_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read session {}", path.display()))?;
        let state = serde_json::from_str(&data)
            .with_context(|| format!("parse session {}", path.display()))?;
        Ok(Some(state))
    }

    async fn save(&self, conversation_id: &str, state: &ConversationState) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("create {}", self.root.display()))?;
        let path = self.path_for(conversation_id);
        tokio::fs::write(&path, serde_json::to_string_pretty(state)?)
            .await
            .with_context(|| format!("write session {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Level, Profile};
    use crate::memory::Message;

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        assert!(store.load("abc").await.unwrap().is_none());

        let mut state = ConversationState::new(Profile::new(Level::Seed, vec!["금리".into()]));
        state.append_message(Message::user("안녕"));
        store.save("abc", &state).await.unwrap();

        let loaded = store.load("abc").await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_file_store_sanitizes_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        store
            .save("../escape", &ConversationState::default())
            .await
            .unwrap();
        assert!(dir.path().join("___escape.json").exists());
    }

    #[tokio::test]
    async fn test_memory_store_isolated_per_id() {
        let store = InMemorySessionStore::new();
        let mut a = ConversationState::default();
        a.append_message(Message::user("a"));
        store.save("a", &a).await.unwrap();
        assert!(store.load("b").await.unwrap().is_none());
        assert_eq!(store.load("a").await.unwrap().unwrap().messages().len(), 1);
    }
}
