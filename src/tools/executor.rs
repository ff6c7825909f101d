//! 工具执行器
//!
//! 持有 ToolRegistry 与监控通道，dispatch(name, args) 接收已归一化的参数并调用 registry.try_execute，
//! 任何失败都转为结果文本；每次调用输出结构化审计日志（JSON）并写一行监控摘要。
//! 不设全局超时：需要截止时间的工具（脚本、Shell、git）自行监管子进程。

use std::sync::Arc;
use std::time::Instant;

use crate::memory::ArgMap;
use crate::observability::Monitor;
use crate::tools::registry::DispatchError;
use crate::tools::{ToolDescriptor, ToolOutput, ToolRegistry};

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_MAX_CHARS: usize = 200;

/// 工具执行器：分发 + 审计 + 监控
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    monitor: Monitor,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, monitor: Monitor) -> Self {
        Self { registry, monitor }
    }

    /// 执行一次调用；结果总是文本，不会中止任务
    pub async fn dispatch(&self, name: &str, args: ArgMap) -> ToolOutput {
        let preview = args_preview(&args);
        self.monitor.record(&format!("tool: {}", name), &preview).await;

        let start = Instant::now();
        let result = self.registry.try_execute(name, args).await;
        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(DispatchError::UnknownTool(_)) => (false, "unknown_tool"),
            Err(DispatchError::Failed(_)) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result.unwrap_or_else(|e| ToolOutput::text(e.to_string()))
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }
}

fn args_preview(args: &ArgMap) -> String {
    let s = serde_json::Value::Object(args.clone()).to_string();
    if s.chars().count() > ARGS_PREVIEW_MAX_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_MAX_CHARS).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::ChannelSink;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn test_args_preview_truncates() {
        let mut args = ArgMap::new();
        args.insert("content".into(), json!("x".repeat(500)));
        let preview = args_preview(&args);
        assert_eq!(preview.chars().count(), ARGS_PREVIEW_MAX_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[tokio::test]
    async fn test_dispatch_records_monitor_line() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()), Monitor::new(ChannelSink::new(tx)));
        let mut args = ArgMap::new();
        args.insert("a".into(), json!(1));
        let out = executor.dispatch("missing", args).await;
        assert_eq!(out.text, "Unknown tool: missing");
        let line = rx.try_recv().unwrap();
        assert!(line.ends_with("tool: missing {\"a\":1}"), "{line}");
    }
}
