//! news-tutor 交互终端
//!
//! 逐行读取 stdin，每行作为一轮对话交给编排循环；每轮结束后按会话 ID 持久化状态。
//! `exit` / `quit` 退出，`/state` 打印 Context Store 概览。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use news_tutor::config::load_config;
use news_tutor::core::{ConversationState, Level, Profile, TutorServices};
use news_tutor::memory::{FileSessionStore, SessionStore};
use news_tutor::observability;

/// 经济新闻学习导师（终端）
#[derive(Parser, Debug)]
#[command(name = "news-tutor", version, about = "경제 뉴스 학습 튜터")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 会话 ID（同一 ID 会接着上次的状态继续）
    #[arg(short, long, default_value = "default")]
    session: String,

    /// 新会话的等级：씨앗 / 새싹 / 나무 / 숲
    #[arg(short, long)]
    level: Option<String>,

    /// 新会话的兴趣（逗号分隔）
    #[arg(short, long)]
    interests: Option<String>,
}

fn state_overview(state: &ConversationState) -> String {
    let ctx = &state.context;
    let mut lines = vec![
        format!("level: {}  interests: {}", state.profile.level, state.profile.interests.join(", ")),
        format!("plan: {:?}  cursor: {}", state.plan(), state.cursor()),
        format!("messages: {}", state.messages().len()),
        format!("selectedArticles: {}", ctx.selected_articles.len()),
    ];
    for a in &ctx.selected_articles {
        lines.push(format!("  - {} ({})", a.title, a.url));
    }
    lines.push(format!("summaries: {}", ctx.summaries.len()));
    for s in &ctx.summaries {
        lines.push(format!("  - {} [{} terms]", s.title, s.term_candidates.len()));
    }
    lines.push(format!("termExplanations: {}", ctx.term_explanations.len()));
    lines.push(match &ctx.active_quiz {
        Some(q) => format!("activeQuiz: [{}] {}", q.kind().label(), q.question),
        None => "activeQuiz: none".to_string(),
    });
    lines.join("\n")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });
    let services = TutorServices::from_config(&cfg);
    let orchestrator = services.orchestrator();
    let store = FileSessionStore::new(&cfg.app.sessions_dir);

    let mut state = match store.load(&cli.session).await.context("Failed to load session")? {
        Some(state) => {
            tracing::info!(session = %cli.session, messages = state.messages().len(), "session resumed");
            state
        }
        None => {
            let level = cli.level.as_deref().map(Level::parse).unwrap_or_default();
            let interests = cli
                .interests
                .as_deref()
                .map(|s| {
                    s.split(',')
                        .map(|i| i.trim().to_string())
                        .filter(|i| !i.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            ConversationState::new(Profile::new(level, interests))
        }
    };

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout
        .write_all("경제 뉴스 튜터입니다. 무엇이든 물어보세요! (종료: exit)\n> ".as_bytes())
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let text = line.trim();
        match text {
            "" => {}
            "exit" | "quit" => break,
            "/state" => {
                stdout.write_all(format!("{}\n", state_overview(&state)).as_bytes()).await?;
            }
            _ => {
                let outcome = orchestrator.run_turn(&mut state, text).await;
                for reply in outcome.replies() {
                    stdout.write_all(format!("\n{}\n", reply).as_bytes()).await?;
                }
                if let Err(e) = store.save(&cli.session, &state).await {
                    tracing::error!(error = %format!("{:#}", e), "session save failed");
                }
            }
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    store
        .save(&cli.session, &state)
        .await
        .context("Failed to save session")?;
    Ok(())
}
