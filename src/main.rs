use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use traffic_saver::model::raw::{RawHttpMessage, ToolCatalog};
use traffic_saver::{Config, ToolId, TrafficLogger};

#[derive(Parser, Debug)]
#[command(name = "traffic-saver", version, about = "流量日志采集与导出")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 重放抓包文件（每行一个 JSON 对象），结束时执行退出备份
    Replay {
        /// 抓包文件
        input: PathBuf,
        /// 重放完成后手动导出到该路径
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// 修改并保存配置
    Config {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// 自动备份间隔（秒，10-3600）
        #[arg(long)]
        interval: Option<u64>,
        /// 备份目录
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

/// 抓包文件中的一次请求/响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapturedExchange {
    tool: u32,
    #[serde(default)]
    secure: bool,
    request: String,
    #[serde(default)]
    response: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(Config::default_config_path()));
    let config = Config::load(&config_path)?;

    match cli.command {
        Command::Replay { input, export } => replay(config, &input, export).await,
        Command::Config {
            enable,
            disable,
            interval,
            dir,
        } => {
            let mut config = config;
            if enable {
                config.auto_backup_enabled = true;
            }
            if disable {
                config.auto_backup_enabled = false;
            }
            if let Some(interval) = interval {
                config.backup_interval_secs = interval;
            }
            if let Some(dir) = dir {
                config.backup_dir = dir;
            }
            let config = config.normalized();
            config.save()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn replay(config: Config, input: &Path, export: Option<PathBuf>) -> anyhow::Result<()> {
    let file = std::fs::File::open(input)
        .with_context(|| format!("打开抓包文件失败: {}", input.display()))?;
    let logger = TrafficLogger::start(config, Arc::new(ToolCatalog::default()));

    let mut replayed = 0usize;
    for (index, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("读取抓包文件失败: {}", input.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let exchange: CapturedExchange = match serde_json::from_str(&line) {
            Ok(exchange) => exchange,
            Err(e) => {
                tracing::warn!(line = index + 1, "跳过无效的抓包记录: {}", e);
                continue;
            }
        };

        let message = Arc::new(RawHttpMessage::new(
            exchange.request,
            exchange.response.map(Into::into),
            exchange.secure,
        ));
        logger.on_traffic_event(ToolId(exchange.tool), true, message.clone());
        logger.on_traffic_event(ToolId(exchange.tool), false, message);
        replayed += 1;
    }
    tracing::info!(replayed, "抓包重放完成");

    if let Some(path) = export {
        // 导出前先让处理任务追上队列；无法解析的记录不会入库，等待有上限
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while logger.len() < replayed && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        match logger.export_to(path).await {
            Ok(report) => tracing::info!(
                records = report.records,
                path = %report.path.display(),
                "导出完成"
            ),
            Err(e) => tracing::error!("导出失败: {}", e),
        }
    }

    logger.teardown().await;
    Ok(())
}
