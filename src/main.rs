//! Pilot 命令行入口
//!
//! 有参数时把全部参数拼成一条指令执行一次；否则逐行读取 stdin，每行一条指令。
//! 最终回复写 stdout，心跳与日志写 stderr。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use pilot::config::load_config;
use pilot::integrations::{ConsoleTransport, Transport};
use pilot::{create_agent_components, observability, process_instruction};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::var_os("PILOT_CONFIG").map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let transport: Arc<dyn Transport> = Arc::new(ConsoleTransport);
    let components =
        create_agent_components(&cfg, Arc::clone(&transport)).context("Failed to create agent")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        let reply = process_instruction(&components, &args.join(" ")).await;
        transport.send_text(&reply).await.context("Failed to write reply")?;
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = process_instruction(&components, &line).await;
        transport.send_text(&reply).await.context("Failed to write reply")?;
    }
    Ok(())
}
