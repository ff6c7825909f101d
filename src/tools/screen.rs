//! 桌面截图：脚本执行完成后拍一张当前屏幕，作为旁路产物发给通道
//!
//! 只有 macOS 提供实现（`screencapture -x -t png`）；其它平台或任何失败都返回 None，不影响任务。

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::tools::process::run_blocking;
use crate::tools::Artifact;

/// 截图的说明文字
pub const SCREEN_CAPTION: &str = "Screen at run time";

const CAPTURE_LIMIT: Duration = Duration::from_secs(10);

/// 截图来源；失败一律返回 None
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> Option<Artifact>;
}

/// 系统截图（仅 macOS）
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopCapture;

/// 不截图
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

fn capture_path() -> PathBuf {
    std::env::temp_dir().join(format!("pilot_screen_{}.png", uuid::Uuid::new_v4()))
}

#[async_trait]
impl ScreenCapture for DesktopCapture {
    async fn capture(&self) -> Option<Artifact> {
        if !cfg!(target_os = "macos") {
            return None;
        }
        let path = capture_path();
        let mut cmd = Command::new("screencapture");
        cmd.args(["-x", "-t", "png"]).arg(&path);
        match run_blocking(cmd, CAPTURE_LIMIT).await {
            Ok(outcome) if outcome.success() && path.exists() => Some(Artifact {
                path,
                caption: SCREEN_CAPTION.to_string(),
            }),
            Ok(outcome) => {
                tracing::debug!(status = ?outcome.status, "screen capture failed");
                let _ = tokio::fs::remove_file(&path).await;
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "screen capture unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl ScreenCapture for NoCapture {
    async fn capture(&self) -> Option<Artifact> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_capture() {
        assert!(NoCapture.capture().await.is_none());
    }

    #[cfg(not(target_os = "macos"))]
    #[tokio::test]
    async fn test_desktop_capture_is_skipped_off_macos() {
        assert!(DesktopCapture.capture().await.is_none());
    }
}
