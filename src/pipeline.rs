//! 批量（每日）内容生成
//!
//! 每个用户使用独立的 ConversationState：文章池 -> 摘要 -> 上下文术语解释 -> 测验，
//! 每个用户输出一份 JSON 报告。用户之间按配置的并发上限并行，单个用户失败只记录，不影响其他用户。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::agents::{QuizSet, UnitName};
use crate::config::DailySection;
use crate::core::{ConversationState, Profile, TutorError, TutorServices};
use crate::memory::{Article, ContextMutation, Summary, TermExplanationGroup};

/// 批量处理的一个用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyUser {
    pub id: String,
    pub profile: Profile,
}

impl DailyUser {
    /// 从 JSON 对象读取：id（缺省时为 user-<序号>）+ level/grade + interests
    pub fn from_json(index: usize, value: &serde_json::Value) -> Self {
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("user-{}", index + 1));
        Self {
            id,
            profile: Profile::from_json(value),
        }
    }
}

/// 读取用户列表文件（JSON 数组）
pub async fn load_users(path: &Path) -> anyhow::Result<Vec<DailyUser>> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read users {}", path.display()))?;
    let values: Vec<serde_json::Value> =
        serde_json::from_str(&data).with_context(|| format!("parse users {}", path.display()))?;
    Ok(values
        .iter()
        .enumerate()
        .map(|(i, v)| DailyUser::from_json(i, v))
        .collect())
}

/// 单个用户的每日报告
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub user: String,
    pub profile: Profile,
    pub generated_at: DateTime<Utc>,
    pub articles: Vec<Article>,
    pub summaries: Vec<Summary>,
    pub term_explanations: Vec<TermExplanationGroup>,
    pub quizzes: Vec<QuizSet>,
}

/// 单个用户的处理结果
#[derive(Debug)]
pub struct UserOutcome {
    pub user: String,
    pub result: anyhow::Result<PathBuf>,
}

/// 每日流水线
pub struct DailyPipeline {
    services: Arc<TutorServices>,
    cfg: DailySection,
}

impl DailyPipeline {
    pub fn new(services: Arc<TutorServices>, cfg: DailySection) -> Self {
        Self { services, cfg }
    }

    /// 为一个用户生成报告（不落盘）
    pub async fn run_user(&self, user: &DailyUser) -> Result<DailyReport, TutorError> {
        let mut state = ConversationState::new(user.profile.clone());
        let profile = user.profile.clone();
        let level = profile.level;

        tracing::info!(user = %user.id, level = %level, "daily: building pool");
        let pool = self
            .services
            .retrieve
            .build_daily_pool(&profile, self.cfg.pool_size)
            .await?;
        state.context.apply(UnitName::Retrieve, ContextMutation::DailyPool(pool.clone()));
        state.context.apply(UnitName::Retrieve, ContextMutation::SelectedArticles(pool));

        tracing::info!(user = %user.id, n = state.context.daily_pool.len(), "daily: summarizing");
        let summaries = self
            .services
            .summarize
            .build_daily_summaries(&state.context, &profile)
            .await;
        state.context.apply(UnitName::Summarize, ContextMutation::Summaries(summaries));

        tracing::info!(user = %user.id, "daily: explaining terms");
        let groups = self
            .services
            .explain_term
            .build_term_explanations(&state.context.summaries, level)
            .await;
        state.context.apply(UnitName::ExplainTerm, ContextMutation::TermExplanations(groups));

        tracing::info!(user = %user.id, "daily: generating quizzes");
        let quizzes = self
            .services
            .quiz
            .build_daily_quizzes(&state.context.summaries, level, self.cfg.quizzes_per_article)
            .await;

        let ctx = state.context;
        Ok(DailyReport {
            user: user.id.clone(),
            profile,
            generated_at: Utc::now(),
            articles: ctx.daily_pool,
            summaries: ctx.summaries,
            term_explanations: ctx.term_explanations,
            quizzes,
        })
    }

    async fn run_and_write(&self, user: &DailyUser) -> anyhow::Result<PathBuf> {
        let report = self
            .run_user(user)
            .await
            .with_context(|| format!("daily pipeline for {}", user.id))?;
        write_report(&self.cfg.output_dir, &report).await
    }

    /// 处理全部用户；按输入顺序返回每个用户的结果
    pub async fn run_all(&self, users: &[DailyUser]) -> Vec<UserOutcome> {
        let limit = self.cfg.concurrency.max(1);
        let mut outcomes: Vec<(usize, UserOutcome)> = stream::iter(users.iter().enumerate())
            .map(|(i, user)| async move {
                let result = self.run_and_write(user).await;
                match &result {
                    Ok(path) => tracing::info!(user = %user.id, path = %path.display(), "daily report written"),
                    Err(e) => tracing::error!(user = %user.id, error = %format!("{:#}", e), "daily pipeline failed"),
                }
                (
                    i,
                    UserOutcome {
                        user: user.id.clone(),
                        result,
                    },
                )
            })
            .buffer_unordered(limit)
            .collect()
            .await;
        outcomes.sort_by_key(|(i, _)| *i);
        outcomes.into_iter().map(|(_, o)| o).collect()
    }
}

/// 写入 <dir>/<user>-<YYYYMMDD>.json
pub async fn write_report(dir: &Path, report: &DailyReport) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create {}", dir.display()))?;
    let safe: String = report
        .user
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{}-{}.json", safe, report.generated_at.format("%Y%m%d")));
    tokio::fs::write(&path, serde_json::to_string_pretty(report)?)
        .await
        .with_context(|| format!("write report {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Level;

    #[test]
    fn test_user_from_json_defaults_id() {
        let u = DailyUser::from_json(2, &serde_json::json!({"grade": "씨앗", "interests": "반도체"}));
        assert_eq!(u.id, "user-3");
        assert_eq!(u.profile.level, Level::Seed);
        assert_eq!(u.profile.interests, vec!["반도체".to_string()]);
    }

    #[tokio::test]
    async fn test_load_users_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        tokio::fs::write(&path, r#"[{"id":"kim","level":"숲"},{"level":"나무"}]"#)
            .await
            .unwrap();
        let users = load_users(&path).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, "kim");
        assert_eq!(users[1].profile.level, Level::Tree);
    }
}
