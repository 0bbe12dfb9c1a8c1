//! Agent Units：单元契约、注册表、执行器与五个业务单元
//!
//! - **registry**: UnitName / AgentUnit / UnitRegistry
//! - **executor**: 带超时的单元调度，错误转为道歉消息
//! - **retrieve / summarize / explain_term / quiz / qa**: 业务单元
//! - **term_loop**: Term Cache Loop，供 explain_term 与 qa 共用

pub mod executor;
pub mod explain_term;
pub mod qa;
pub mod quiz;
pub mod registry;
pub mod retrieve;
pub mod summarize;
pub mod term_loop;

pub use executor::{Dispatched, UnitExecutor, UNIT_ERROR_MESSAGE, UNIT_TIMEOUT_MESSAGE};
pub use explain_term::ExplainTermUnit;
pub use qa::QaUnit;
pub use quiz::{QuizAction, QuizGenerator, QuizSet, QuizUnit};
pub use registry::{AgentUnit, UnitInput, UnitName, UnitOutput, UnitRegistry};
pub use retrieve::RetrieveUnit;
pub use summarize::SummarizeUnit;
pub use term_loop::{TermCacheLoop, TermLookup};
