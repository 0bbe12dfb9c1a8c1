//! 会话状态与 reducer
//!
//! ConversationState 是单个会话独占的记录：消息只追加，plan/cursor/completed 只能经由显式 setter 修改，
//! 避免松散 map 合并时的意外覆盖。Phase 由状态推导而来（Planning / Dispatching / Done）。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agents::UnitName;
use crate::memory::{ContextStore, Message};

/// 用户熟练度等级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    /// 씨앗
    #[serde(rename = "씨앗")]
    Seed,
    /// 새싹
    #[default]
    #[serde(rename = "새싹")]
    Sprout,
    /// 나무
    #[serde(rename = "나무")]
    Tree,
    /// 숲
    #[serde(rename = "숲")]
    Forest,
}

impl Level {
    /// 未知字符串一律视为 새싹
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "씨앗" | "seed" => Level::Seed,
            "나무" | "tree" => Level::Tree,
            "숲" | "forest" => Level::Forest,
            _ => Level::Sprout,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Seed => "씨앗",
            Level::Sprout => "새싹",
            Level::Tree => "나무",
            Level::Forest => "숲",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户画像：等级 + 兴趣
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub level: Level,
    #[serde(default)]
    pub interests: Vec<String>,
}

impl Profile {
    pub fn new(level: Level, interests: Vec<String>) -> Self {
        Self { level, interests }
    }

    /// 唯一的画像接入边界：接受 `level` 或 `grade`，兴趣可为数组或逗号分隔字符串
    pub fn from_json(value: &serde_json::Value) -> Self {
        let level = value
            .get("level")
            .or_else(|| value.get("grade"))
            .and_then(|v| v.as_str())
            .map(Level::parse)
            .unwrap_or_default();
        let interests = match value.get("interests") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(serde_json::Value::String(s)) => s
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };
        Self { level, interests }
    }
}

/// 编排循环所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 无计划或刚收到新的用户输入
    Planning,
    /// cursor < len(plan)
    Dispatching,
    /// cursor == len(plan)
    Done,
}

/// 单个会话的完整状态；每轮开始时创建或加载，结束时持久化
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    plan: Vec<UnitName>,
    #[serde(default)]
    cursor: usize,
    #[serde(default)]
    completed: BTreeSet<UnitName>,
    #[serde(default)]
    last_agent: Option<UnitName>,
    /// 新用户消息到达后、重新规划之前为 true
    #[serde(default)]
    pending_input: bool,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub context: ContextStore,
}

impl ConversationState {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn plan(&self) -> &[UnitName] {
        &self.plan
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn completed(&self) -> &BTreeSet<UnitName> {
        &self.completed
    }

    pub fn last_agent(&self) -> Option<UnitName> {
        self.last_agent
    }

    /// 消息 reducer：只追加，保持插入顺序
    pub fn append_message(&mut self, message: Message) {
        if message.is_user() {
            self.pending_input = true;
        }
        self.messages.push(message);
    }

    /// 最近一条用户消息
    pub fn last_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// 设置新计划：cursor 归零、completed 清空、消费掉待处理的用户输入
    pub fn set_plan(&mut self, plan: Vec<UnitName>) {
        self.plan = plan;
        self.cursor = 0;
        self.completed.clear();
        self.pending_input = false;
    }

    /// 当前步骤（已耗尽时为 None）
    pub fn current_step(&self) -> Option<UnitName> {
        self.plan.get(self.cursor).copied()
    }

    /// 标记当前步骤完成并前移 cursor；cursor 不会超过 len(plan)
    pub fn complete_step(&mut self, unit: UnitName) {
        self.completed.insert(unit);
        self.last_agent = Some(unit);
        self.cursor = (self.cursor + 1).min(self.plan.len());
    }

    pub fn phase(&self) -> Phase {
        if self.pending_input || self.plan.is_empty() {
            Phase::Planning
        } else if self.cursor < self.plan.len() {
            Phase::Dispatching
        } else {
            Phase::Done
        }
    }
}
