//! 存活指示：模型调用期间按固定间隔向通道发送心跳
//!
//! LivenessGuard 持有 CancellationToken 与后台任务句柄。正常路径调用 `stop().await`
//! 取消并等待后台任务结束；其它路径（? 提前返回、外层 future 被丢弃）由 Drop 取消并 abort，
//! 保证心跳不会比发起它的任务活得更久。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::integrations::Transport;

pub struct LivenessGuard {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LivenessGuard {
    /// 启动心跳；第一次心跳立即发送
    pub fn start(transport: Arc<dyn Transport>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            biased;
                            _ = child.cancelled() => break,
                            sent = transport.pulse() => {
                                if let Err(e) = sent {
                                    tracing::debug!(error = %e, "pulse failed");
                                }
                            }
                        }
                    }
                }
            }
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// 取消并等待后台任务退出
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::warn!("liveness task panicked");
                }
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::RecordingTransport;

    #[tokio::test]
    async fn test_pulses_until_stopped() {
        let transport = Arc::new(RecordingTransport::new());
        let guard = LivenessGuard::start(transport.clone(), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(180)).await;
        guard.stop().await;
        let count = transport.pulse_count();
        assert!(count >= 2, "pulses: {count}");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.pulse_count(), count);
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let transport = Arc::new(RecordingTransport::new());
        {
            let guard = LivenessGuard::start(transport.clone(), Duration::from_millis(20));
            tokio::time::sleep(Duration::from_millis(70)).await;
            assert!(!guard.is_cancelled());
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        let count = transport.pulse_count();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(transport.pulse_count(), count);
    }
}
