//! 监控通道：追加式、带时间戳的一行摘要
//!
//! 每行格式为 `[HH:MM:SS] label detail`，detail 最多 400 字符。投递失败只记 warn，不向调用方传播。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// detail 截断上限（字符）
pub const MONITOR_DETAIL_MAX_CHARS: usize = 400;

/// 监控输出目标
#[async_trait]
pub trait MonitorSink: Send + Sync {
    async fn post(&self, line: &str) -> Result<(), String>;
}

/// 追加写入文件
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MonitorSink for FileSink {
    async fn post(&self, line: &str) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| e.to_string())?;
        f.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| e.to_string())
    }
}

/// 写入 tracing 日志（target = "monitor"）
pub struct TracingSink;

#[async_trait]
impl MonitorSink for TracingSink {
    async fn post(&self, line: &str) -> Result<(), String> {
        tracing::info!(target: "monitor", "{}", line);
        Ok(())
    }
}

/// 发送到 channel，供测试或外部通道消费
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MonitorSink for ChannelSink {
    async fn post(&self, line: &str) -> Result<(), String> {
        self.tx
            .send(line.to_string())
            .map_err(|_| "monitor channel closed".to_string())
    }
}

pub struct NullSink;

#[async_trait]
impl MonitorSink for NullSink {
    async fn post(&self, _line: &str) -> Result<(), String> {
        Ok(())
    }
}

/// 监控句柄：格式化 + 尽力投递
#[derive(Clone)]
pub struct Monitor {
    sink: Arc<dyn MonitorSink>,
}

impl Monitor {
    pub fn new(sink: impl MonitorSink + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn null() -> Self {
        Self::new(NullSink)
    }

    /// 有 path 则写文件，否则写 tracing
    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::new(FileSink::new(p)),
            None => Self::new(TracingSink),
        }
    }

    /// 记录一行；失败被吞掉
    pub async fn record(&self, label: &str, detail: &str) {
        let line = format_line(&chrono::Local::now().format("%H:%M:%S").to_string(), label, detail);
        if let Err(e) = self.sink.post(&line).await {
            tracing::warn!(error = %e, "monitor delivery failed");
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor").finish_non_exhaustive()
    }
}

fn format_line(ts: &str, label: &str, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        format!("[{}] {}", ts, label)
    } else {
        let detail: String = detail.chars().take(MONITOR_DETAIL_MAX_CHARS).collect();
        format!("[{}] {} {}", ts, label, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_caps_detail() {
        assert_eq!(format_line("10:00:00", "start", ""), "[10:00:00] start");
        let long = "x".repeat(1000);
        let line = format_line("10:00:00", "tool", &long);
        assert_eq!(line.len(), "[10:00:00] tool ".len() + MONITOR_DETAIL_MAX_CHARS);
    }

    #[tokio::test]
    async fn test_closed_channel_is_swallowed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let monitor = Monitor::new(ChannelSink::new(tx));
        monitor.record("start", "task").await;
    }

    #[tokio::test]
    async fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/monitor.log");
        let monitor = Monitor::from_path(Some(&path));
        monitor.record("a", "1").await;
        monitor.record("b", "2").await;
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] a 1"));
        assert!(lines[1].ends_with("] b 2"));
    }
}
