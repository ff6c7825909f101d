//! LLM 客户端抽象
//!
//! 所有后端（Gemini / Mock）实现 LlmClient：接收已编码的请求，返回供应商回复的单个 Content。
//! 解码回规范消息由协议适配器负责，客户端不关心对话日志。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::protocol::{Content, GenerateRequest};

/// 供应商层错误（对一次任务是致命的）
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Missing API key (set {0})")]
    MissingApiKey(String),

    #[error("Request failed: {0}")]
    Http(String),

    #[error("API error {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

/// LLM 客户端 trait：一次非流式生成
///
/// 请求按值传入，便于调用方把调用放进独立任务执行。
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<Content, LlmError>;

    /// 用于日志的模型名
    fn model_name(&self) -> &str {
        "unknown"
    }
}
