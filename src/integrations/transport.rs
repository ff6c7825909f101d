//! 聊天通道抽象：心跳、文本消息、产物（如截图）

use async_trait::async_trait;
use thiserror::Error;

use crate::tools::Artifact;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// 外部通道；所有发送都是尽力而为，调用方只记录失败不中止任务
#[async_trait]
pub trait Transport: Send + Sync {
    /// 处理中心跳（如 "正在输入" 指示）
    async fn pulse(&self) -> Result<(), TransportError>;

    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    async fn send_artifact(&self, artifact: &Artifact) -> Result<(), TransportError>;
}
