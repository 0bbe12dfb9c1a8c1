//! 规划层：把用户原文 + 上下文标志分类为有序的单元步骤

pub mod intent;

pub use intent::{normalize_plan, IntentPlanner, ROUTER_SYSTEM};
