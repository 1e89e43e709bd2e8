//! Intake - 终端交互入口
//!
//! 初始化日志、创建编排器，从 stdin 读取用户消息并流式打印回复。
//! 命令：/progress 查看进度，/finalize 生成需求摘要，/events 查看事件日志，/quit 退出。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use intake::conversation::TurnEvent;
use intake::core::create_orchestrator;
use intake::store::EventQuery;
use intake::{IntakeError, Orchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    intake::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let orchestrator = create_orchestrator(config_path).context("Failed to create orchestrator")?;
    let session_id = uuid::Uuid::new_v4().to_string();

    println!("会话 {} 已开始。输入 /progress /finalize /events /quit", session_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" => break,
            "/progress" => {
                let progress = orchestrator.progress(&session_id).await?;
                println!("{}", serde_json::to_string_pretty(&progress)?);
            }
            "/events" => {
                let events = orchestrator.events(&session_id, &EventQuery::default()).await?;
                for event in events {
                    println!(
                        "{} [{}] {} {}",
                        event.timestamp.format("%H:%M:%S"),
                        event.severity.as_str(),
                        event.kind,
                        event.description
                    );
                }
            }
            "/finalize" => match orchestrator.finalize(&session_id).await {
                Ok(brief) => println!("{}", serde_json::to_string_pretty(&brief)?),
                Err(IntakeError::Validation(e)) => {
                    let labels: Vec<&str> = e.missing.iter().map(|m| m.label.as_str()).collect();
                    println!("还缺少：{}", labels.join("、"));
                }
                Err(e) => return Err(e.into()),
            },
            message => run_turn(&orchestrator, &session_id, message).await,
        }
    }

    orchestrator.shutdown();
    Ok(())
}

async fn run_turn(orchestrator: &Orchestrator, session_id: &str, message: &str) {
    let mut handle = orchestrator.submit(session_id, message);
    while let Some(event) = handle.next().await {
        match event {
            TurnEvent::Chunk(chunk) if chunk.is_complete => {
                if let Some(meta) = chunk.metadata {
                    println!("\n[{} {}%]", meta.stage, meta.progress);
                }
            }
            TurnEvent::Chunk(chunk) => {
                print!("{}", chunk.chunk);
                std::io::stdout().flush().ok();
            }
            TurnEvent::Asset { description, url } => println!("\n[图片] {} {}", description, url),
            TurnEvent::Error { reason, message } => println!("\n{} ({})", message, reason.as_str()),
        }
    }
    if let Ok(Err(e)) = handle.join.await {
        tracing::debug!(error = %e, "turn ended with error");
    }
}
