//! Gemini generateContent 客户端
//!
//! 通过 reqwest 直接调用 REST 端点（`{base_url}/v1beta/models/{model}:generateContent`），
//! 请求体由协议适配器产出的 contents + system_instruction + 工具声明拼成。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::LlmSection;
use crate::llm::protocol::{Content, GenerateRequest};
use crate::llm::{LlmClient, LlmError};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

/// 取第一个候选；没有候选（如被安全策略拦截）时返回空的 model turn，由循环按无回答处理
fn first_candidate(parsed: GenerateResponse) -> Content {
    parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .unwrap_or_else(|| Content::model(Vec::new()))
}

/// Gemini 客户端：持有 HTTP Client、模型名、API Key 与生成参数
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
    pub usage: TokenUsage,
}

impl GeminiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url
                .unwrap_or(GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key: api_key.into(),
            temperature: 0.2,
            max_output_tokens: 8192,
            usage: TokenUsage::default(),
        }
    }

    /// 从 [llm] 配置创建；API Key 从 `api_key_env` 指定的环境变量读取
    pub fn from_config(cfg: &LlmSection) -> Result<Self, LlmError> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::MissingApiKey(cfg.api_key_env.clone()))?;
        let mut client = Self::new(cfg.base_url.as_deref(), &cfg.model, api_key);
        client.temperature = cfg.temperature;
        client.max_output_tokens = cfg.max_output_tokens;
        Ok(client)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn build_body(&self, request: &GenerateRequest) -> Value {
        let mut body = json!({
            "contents": request.contents,
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
            },
        });
        if let Some(system) = &request.system_instruction {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, request: GenerateRequest) -> Result<Content, LlmError> {
        let body = self.build_body(&request);
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        if let Some(usage) = &parsed.usage_metadata {
            self.usage
                .add(usage.prompt_token_count, usage.candidates_token_count);
            tracing::debug!(
                prompt = usage.prompt_token_count,
                completion = usage.candidates_token_count,
                "gemini token usage"
            );
        }

        Ok(first_candidate(parsed))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ConversationLog;
    use crate::tools::ToolDescriptor;

    #[test]
    fn test_body_shape() {
        let client = GeminiClient::new(None, "gemini-test", "key");
        let log = ConversationLog::start("be brief", "hi");
        let tools = vec![ToolDescriptor::new(
            "list_files",
            "List files",
            json!({"type": "object", "properties": {}}),
        )];
        let req = crate::llm::protocol::encode_request(&log, &tools);
        let body = client.build_body(&req);

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "list_files");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
        assert!(client.endpoint().ends_with("/v1beta/models/gemini-test:generateContent"));
    }

    #[test]
    fn test_blocked_reply_is_empty_model_turn() {
        let parsed: GenerateResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        let content = first_candidate(parsed);
        assert_eq!(content, Content::model(Vec::new()));
        let message = crate::llm::protocol::decode_reply(&content);
        assert!(message.content.is_empty());
        assert!(message.tool_calls.is_empty());

        let parsed: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "hi"}]}}]
        }))
        .unwrap();
        assert_eq!(first_candidate(parsed).parts[0].text.as_deref(), Some("hi"));
    }

    #[test]
    fn test_no_tools_key_when_empty() {
        let client = GeminiClient::new(Some("http://localhost:9/"), "m", "key");
        let body = client.build_body(&GenerateRequest::default());
        assert!(body.get("tools").is_none());
        assert!(body.get("systemInstruction").is_none());
        assert_eq!(client.endpoint(), "http://localhost:9/v1beta/models/m:generateContent");
    }
}
