//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置的回复；脚本耗尽后返回 fallback（默认是一条无工具调用的文本回复）。
//! 同时记录收到的每个请求，便于断言编码结果。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::protocol::{Content, GenerateRequest, Part};
use crate::llm::{LlmClient, LlmError};

/// 预置脚本的 Mock 客户端
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<Content, LlmError>>>,
    fallback: Content,
    delay: Option<Duration>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(replies: Vec<Content>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            fallback: Self::text("done"),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一回复（如永远请求工具的模型）
    pub fn repeating(reply: Content) -> Self {
        let mut client = Self::new(Vec::new());
        client.fallback = reply;
        client
    }

    /// 第一次调用即返回错误
    pub fn failing(err: LlmError) -> Self {
        let client = Self::new(Vec::new());
        if let Ok(mut q) = client.replies.lock() {
            q.push_back(Err(err));
        }
        client
    }

    /// 每次调用前等待（用于超时测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 纯文本回复
    pub fn text(text: &str) -> Content {
        Content::model(vec![Part::text(text)])
    }

    /// 带函数调用的回复：(工具名, 参数对象)
    pub fn calls(text: &str, calls: &[(&str, Value)]) -> Content {
        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
        for (name, args) in calls {
            let args = match args {
                Value::Object(map) => map.clone(),
                _ => Default::default(),
            };
            parts.push(Part::function_call(*name, args));
        }
        Content::model(parts)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate(&self, request: GenerateRequest) -> Result<Content, LlmError> {
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(request);
        }
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
