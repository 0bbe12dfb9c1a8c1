//! 核心编排层：错误类型、会话状态投影、主控循环与组件装配

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use builder::{create_llm_from_config, TutorServices};
pub use error::TutorError;
pub use orchestrator::{Orchestrator, StepRecord, TurnOutcome};
pub use state::{ConversationState, Level, Phase, Profile};
