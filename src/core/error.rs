//! Agent 错误类型
//!
//! 只有供应商层错误与意外失败会中止一次任务；工具层失败一律降级为工具结果文本回填给模型，
//! 因此这里不包含任何工具错误变体。

use thiserror::Error;

use crate::llm::LlmError;

/// 意外失败信息的最大字符数
const UNEXPECTED_DETAIL_CHARS: usize = 500;

/// 任务级（致命）错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 单次模型调用超过截止时间，不重试
    #[error("Model call timed out after {0}s")]
    ProviderTimeout(u64),

    #[error("LLM error: {0}")]
    Provider(#[from] LlmError),

    /// 最外层捕获的意外失败（如模型调用任务 panic），信息已截断
    #[error("Unexpected failure: {0}")]
    Unexpected(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    pub fn unexpected(detail: impl AsRef<str>) -> Self {
        let detail = detail.as_ref().trim();
        let truncated: String = detail.chars().take(UNEXPECTED_DETAIL_CHARS).collect();
        AgentError::Unexpected(truncated)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::ProviderTimeout(_))
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_is_truncated() {
        let long = "x".repeat(2000);
        match AgentError::unexpected(&long) {
            AgentError::Unexpected(msg) => assert_eq!(msg.chars().count(), UNEXPECTED_DETAIL_CHARS),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_timeout_display() {
        let err = AgentError::ProviderTimeout(300);
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Model call timed out after 300s");
    }
}
