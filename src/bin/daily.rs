//! news-tutor-daily：批量生成每日学习内容
//!
//! 读取用户列表（JSON 数组，每项含 id、level/grade、interests），为每个用户输出一份 JSON 报告。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use news_tutor::config::load_config;
use news_tutor::core::TutorServices;
use news_tutor::observability;
use news_tutor::pipeline::{load_users, DailyPipeline};

/// 每日内容批处理
#[derive(Parser, Debug)]
#[command(name = "news-tutor-daily", version, about = "일일 뉴스 학습 콘텐츠 생성")]
struct Cli {
    /// 用户列表文件
    #[arg(short, long)]
    users: PathBuf,

    /// 额外的配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 报告目录（覆盖 [daily].output_dir）
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let mut cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    if let Some(dir) = cli.output {
        cfg.daily.output_dir = dir;
    }
    let users = load_users(&cli.users).await?;
    if users.is_empty() {
        tracing::warn!("no users to process");
        return Ok(());
    }
    tracing::info!(users = users.len(), concurrency = cfg.daily.concurrency, "daily pipeline start");

    let services = Arc::new(TutorServices::from_config(&cfg));
    let pipeline = DailyPipeline::new(services, cfg.daily.clone());
    let outcomes = pipeline.run_all(&users).await;

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    for o in &outcomes {
        match &o.result {
            Ok(path) => println!("✅ {} -> {}", o.user, path.display()),
            Err(e) => println!("❌ {}: {:#}", o.user, e),
        }
    }
    tracing::info!(ok = outcomes.len() - failed, failed, "daily pipeline done");
    Ok(())
}
