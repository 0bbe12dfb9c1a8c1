//! news-tutor - 经济新闻学习导师后端
//!
//! 模块划分：
//! - **agents**: Agent Unit 契约、注册表、执行器与五个单元（retrieve / summarize / explain-term / quiz / qa）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、会话状态、编排循环与组件装配
//! - **llm**: 文本生成服务抽象与实现（OpenAI 兼容 / Mock）与结构化输出
//! - **memory**: 消息、Context Store、术语缓存、会话持久化
//! - **observability**: tracing 初始化
//! - **pipeline**: 每日批量内容生成
//! - **planner**: 意图规划
//! - **tools**: Web 搜索与正文抓取

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod planner;
pub mod tools;
