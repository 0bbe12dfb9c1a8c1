//! 记忆层：对话消息、Context Store、术语缓存、会话持久化

pub mod context;
pub mod conversation;
pub mod session_store;
pub mod term_cache;

pub use context::{
    Article, ContextMutation, ContextStore, Metric, QuizAnswer, QuizKind, QuizRecord, Summary,
    TermExplanation, TermExplanationGroup,
};
pub use conversation::{Message, Role};
pub use session_store::{FileSessionStore, InMemorySessionStore, SessionStore};
pub use term_cache::{InMemoryTermCache, TermCache};
