//! 单元执行器
//!
//! 持有 UnitRegistry 与单元超时，dispatch(name, input, ctx) 在超时内调用单元；
//! 超时或失败时转为面向用户的道歉消息（不含变更）。每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::agents::{UnitInput, UnitName, UnitOutput, UnitRegistry};
use crate::core::TutorError;
use crate::memory::ContextStore;

/// 单元失败时的用户可见消息
pub const UNIT_ERROR_MESSAGE: &str =
    "죄송합니다. 요청을 처리하는 중 문제가 발생했어요. 잠시 후 다시 시도해 주세요.";

/// 单元超时时的用户可见消息
pub const UNIT_TIMEOUT_MESSAGE: &str =
    "죄송합니다. 응답 시간이 너무 오래 걸려 이번 단계는 건너뛸게요.";

/// 一次派发的结果
#[derive(Debug)]
pub struct Dispatched {
    /// 实际执行的单元（未注册时为 qa）
    pub unit: UnitName,
    pub output: UnitOutput,
    /// 失败原因（成功时为 None）
    pub error: Option<TutorError>,
}

/// 单元执行器：对每次调用施加超时，并把错误转为道歉消息
pub struct UnitExecutor {
    registry: UnitRegistry,
    timeout: Duration,
}

impl UnitExecutor {
    pub fn new(registry: UnitRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: UnitRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// 执行计划步骤；永不返回 Err
    pub async fn dispatch(&self, name: UnitName, input: &UnitInput, ctx: &ContextStore) -> Dispatched {
        let Some(unit) = self.registry.resolve(name) else {
            let err = TutorError::UnknownUnit(name.to_string());
            tracing::warn!(unit = %name, "no unit available for step");
            return Dispatched {
                unit: name,
                output: UnitOutput::reply(UNIT_ERROR_MESSAGE),
                error: Some(err),
            };
        };
        let resolved = unit.name();

        let start = Instant::now();
        let result = timeout(self.timeout, unit.handle(input, ctx)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "unit_audit",
            "step": name.as_str(),
            "unit": resolved.as_str(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "input_preview": preview(&input.text),
        });
        tracing::info!(audit = %audit, "unit");

        match result {
            Ok(Ok(output)) => Dispatched {
                unit: resolved,
                output,
                error: None,
            },
            Ok(Err(e)) => {
                tracing::warn!(unit = %resolved, error = %e, "unit failed");
                Dispatched {
                    unit: resolved,
                    output: UnitOutput::reply(UNIT_ERROR_MESSAGE),
                    error: Some(e),
                }
            }
            Err(_) => {
                tracing::warn!(unit = %resolved, timeout_ms = self.timeout.as_millis() as u64, "unit timed out");
                Dispatched {
                    unit: resolved,
                    output: UnitOutput::reply(UNIT_TIMEOUT_MESSAGE),
                    error: Some(TutorError::UnitTimeout(resolved.to_string())),
                }
            }
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > 80 {
        format!("{}...", text.chars().take(80).collect::<String>())
    } else {
        text.to_string()
    }
}
