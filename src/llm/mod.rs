//! LLM 层：客户端抽象、协议适配器与实现（Gemini / Mock）

pub mod gemini;
pub mod mock;
pub mod protocol;
pub mod traits;

use std::sync::Arc;

pub use gemini::{GeminiClient, TokenUsage};
pub use mock::ScriptedLlmClient;
pub use protocol::{decode_reply, encode_request, Content, ContentRole, GenerateRequest, Part};
pub use traits::{LlmClient, LlmError};

use crate::config::LlmSection;

/// 根据 [llm].provider 创建客户端；mock 仅回显一条固定文本，便于本地跑通流程
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, LlmError> {
    match cfg.provider.to_lowercase().as_str() {
        "mock" => Ok(Arc::new(ScriptedLlmClient::new(Vec::new()))),
        _ => Ok(Arc::new(GeminiClient::from_config(cfg)?)),
    }
}
