//! Accident Alert Monitor CLI
//!
//! 运行告警引擎，或从另一个进程查看/操作共享的告警状态
//! （快照、已读集合都是跨进程文件，status/ack 不需要引擎在跑）。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use accident_alert_monitor::{
    AlertEngine, AlertStore, ChangeSignal, EngineConfig, ReadStateTracker,
};

#[derive(Parser)]
#[command(name = "aam")]
#[command(about = "Accident Alert Monitor - 事故告警聚合与实时通知引擎")]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 ~/.config/accident-alert-monitor/config.json）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行告警引擎（Ctrl+C 停止）
    Run,
    /// 查看当前告警快照与未读数
    Status {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        /// 显示最近 N 条
        #[arg(long, short, default_value = "20")]
        limit: usize,
    },
    /// 确认一条告警已读
    Ack {
        /// 告警 id
        alert_id: String,
    },
    /// 清空全部告警（已读集合保留）
    Clear,
    /// 请求运行中的引擎立刻重试推送通道
    RetryPush,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化 tracing 日志系统
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    // 例如: RUST_LOG=debug aam run
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("accident_alert_monitor=info,aam=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => {
            let engine = AlertEngine::new(config)?;
            engine.start();
            info!("引擎已启动，Ctrl+C 停止");

            tokio::signal::ctrl_c().await?;
            engine.stop().await;
        }
        Commands::Status { json, limit } => {
            // 直接读共享文件，不需要引擎进程
            let mut records = AlertStore::read_snapshot(&config.snapshot_path());
            let tracker = ReadStateTracker::open(config.read_state_path());
            for record in records.iter_mut() {
                tracker.merge_into(record);
            }
            let unread = records.iter().filter(|r| !r.acknowledged).count();
            records.truncate(limit);

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "unread": unread,
                        "alerts": records,
                    }))?
                );
            } else {
                println!("未读告警: {}\n", unread);
                for record in &records {
                    let mark = if record.acknowledged { " " } else { "●" };
                    println!(
                        "{} [{}] {} | {} | 置信度 {:.0}% | {}",
                        mark,
                        record.severity,
                        record.timestamp.format("%m-%d %H:%M:%S"),
                        record.location.as_deref().unwrap_or("-"),
                        record.confidence * 100.0,
                        record.id,
                    );
                }
            }
        }
        Commands::Ack { alert_id } => {
            let engine = AlertEngine::new(config)?;
            if engine.acknowledge(&alert_id).await? {
                println!("已确认: {}", alert_id);
            } else {
                println!("未找到告警: {}", alert_id);
            }
        }
        Commands::Clear => {
            let engine = AlertEngine::new(config)?;
            engine.clear_all();
            println!("已清空全部告警");
        }
        Commands::RetryPush => {
            ChangeSignal::new(config.retry_signal_path()).notify();
            println!("已请求重试推送通道");
        }
    }

    Ok(())
}
