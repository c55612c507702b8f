//! ReWOO 命令行
//!
//! 入口：初始化日志、加载配置、组装 Pipeline，实时打印事件并输出最终答案。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use rewoo::config::load_config;
use rewoo::core::{cancel_on_ctrl_c, PipelineEvent};
use rewoo::observability::{self, UsageTracker};
use rewoo::PipelineBuilder;

#[derive(Parser, Debug)]
#[command(name = "rewoo", version, about = "Plan, execute tools, then solve a task")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 以 JSON 输出最终状态
    #[arg(long)]
    json: bool,

    /// 要解决的任务
    #[arg(required = true, num_args = 1..)]
    task: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();
    let task = cli.task.join(" ");

    let cfg = load_config(cli.config).context("Failed to load config")?;
    tracing::info!(app = %cfg.app.name, provider = %cfg.llm.provider, "starting");

    let mut pipeline = PipelineBuilder::new(cfg).build();
    cancel_on_ctrl_c(pipeline.cancel_scope());

    let usage = UsageTracker::new();
    let usage_task = usage.attach(pipeline.events());
    let logger = observability::spawn_event_logger(pipeline.events());
    let printer = spawn_printer(pipeline.events().subscribe(), cli.json);

    let state = pipeline.process(&task).await;
    pipeline.tools().cleanup_all().await;

    // 所有 EventBus 句柄都在 pipeline 内，drop 后订阅任务读完剩余事件即退出
    drop(pipeline);
    let _ = printer.await;
    let _ = usage_task.await;
    let _ = logger.await;

    if cli.json {
        let out = serde_json::to_string_pretty(&state).context("Failed to serialize state")?;
        println!("{out}");
    } else {
        println!();
        match &state.result {
            Some(answer) => println!("{answer}"),
            None => println!("(no answer)"),
        }
        let total = usage.total();
        if total.total_tokens > 0 {
            eprintln!(
                "tokens: prompt={} completion={} total={}",
                total.prompt_tokens, total.completion_tokens, total.total_tokens
            );
        }
    }

    if state.result.is_none() {
        anyhow::bail!("pipeline finished without an answer: {}", state.errors.join("; "));
    }
    Ok(())
}

/// 把事件打印到 stderr（--json 时静默，避免混入输出）
fn spawn_printer(
    mut rx: tokio::sync::broadcast::Receiver<PipelineEvent>,
    quiet: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            if quiet {
                continue;
            }
            match event {
                PipelineEvent::PlanCreated { steps, .. } => {
                    eprintln!("[plan] {} step(s)", steps.len());
                    for step in &steps {
                        eprintln!("  {}", step.to_plan_line());
                    }
                }
                PipelineEvent::ToolStart { tool, args, step: Some(step) } => {
                    eprintln!("[{step}] {tool}[{args}]");
                }
                PipelineEvent::ToolComplete {
                    step: Some(step),
                    preview,
                    fallback,
                    ..
                } => {
                    let tag = if fallback { " (fallback)" } else { "" };
                    eprintln!("[{step}]{tag} => {preview}");
                }
                PipelineEvent::Retry { caller, attempt, max_retries, backoff_ms, error } => {
                    eprintln!("[retry] {caller} {attempt}/{max_retries} in {backoff_ms}ms: {error}");
                }
                PipelineEvent::Error { error, context, .. } => {
                    eprintln!("[error] {context}: {error}");
                }
                PipelineEvent::Info { message } => eprintln!("[info] {message}"),
                _ => {}
            }
        }
    })
}
