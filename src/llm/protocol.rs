//! 协议适配器：规范对话日志 <-> 供应商结构化 contents（Gemini generateContent 形状）
//!
//! - System 消息不进入 contents，单独走 system_instruction
//! - User 消息 -> 一个 user turn（单个 text part；空白消息用占位文本替换）
//! - Assistant 消息 -> 一个 model turn（可选 text part + 每个调用一个 functionCall part）
//! - 紧随其后的一串 Tool 消息 -> 合并为一个 user turn，每个结果一个 functionResponse part，
//!   与 tool_calls 按位置配对；数量不一致时只配对较短的一侧
//!
//! 解码：拼接并 trim 所有 text part；每个 functionCall part 变为一个 ToolInvocation，参数重新序列化为 Raw 文本。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::memory::{ArgMap, ConversationLog, Message, Role, ToolArgs, ToolInvocation};
use crate::tools::ToolDescriptor;

/// 空 user 消息的占位文本
pub const EMPTY_USER_PLACEHOLDER: &str = "(empty message)";
/// 既无文本也无调用的 assistant 消息占位文本
pub const EMPTY_MODEL_PLACEHOLDER: &str = "(continuing)";

/// Turn 角色（供应商侧只有 user / model）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentRole {
    User,
    #[default]
    Model,
}

/// 函数调用 part 的负载
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// 期望为对象；缺失或其他类型在解码时视为空映射
    #[serde(default)]
    pub args: Value,
}

/// 函数结果 part 的负载
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

/// 单个 part：text / functionCall / functionResponse 三选一（未知字段忽略）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn function_call(name: impl Into<String>, args: ArgMap) -> Self {
        Self {
            function_call: Some(FunctionCall {
                name: name.into(),
                args: Value::Object(args),
            }),
            ..Default::default()
        }
    }

    pub fn function_response(name: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                name: name.into(),
                response: json!({ "result": result.into() }),
            }),
            ..Default::default()
        }
    }
}

/// 一个 turn：角色 + 有序 parts
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: ContentRole,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: ContentRole::User,
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: ContentRole::Model,
            parts,
        }
    }
}

/// 一次模型调用的完整请求（与具体 HTTP 客户端无关）
#[derive(Clone, Debug, Default)]
pub struct GenerateRequest {
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    pub tools: Vec<ToolDescriptor>,
}

/// 将整个日志与工具描述编码为请求
pub fn encode_request(log: &ConversationLog, tools: &[ToolDescriptor]) -> GenerateRequest {
    GenerateRequest {
        system_instruction: log.system_instruction(),
        contents: encode_contents(log.messages()),
        tools: tools.to_vec(),
    }
}

/// 将消息序列编码为 contents
pub fn encode_contents(messages: &[Message]) -> Vec<Content> {
    let mut contents = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let msg = &messages[i];
        i += 1;
        match msg.role {
            // system 走单独通道；孤立的 tool 消息（前面没有 assistant）直接跳过
            Role::System | Role::Tool => {}
            Role::User => {
                let text = msg.content.trim();
                let text = if text.is_empty() { EMPTY_USER_PLACEHOLDER } else { text };
                contents.push(Content::user(vec![Part::text(text)]));
            }
            Role::Assistant => {
                contents.push(encode_assistant(msg));

                let start = i;
                while i < messages.len() && messages[i].role == Role::Tool {
                    i += 1;
                }
                let results = &messages[start..i];
                if let Some(turn) = encode_tool_results(msg, results) {
                    contents.push(turn);
                }
            }
        }
    }
    contents
}

fn encode_assistant(msg: &Message) -> Content {
    let mut parts = Vec::with_capacity(msg.tool_calls.len() + 1);
    let text = msg.content.trim();
    if !text.is_empty() {
        parts.push(Part::text(text));
    }
    for call in &msg.tool_calls {
        parts.push(Part::function_call(call.name.clone(), call.arguments.normalize()));
    }
    if parts.is_empty() {
        parts.push(Part::text(EMPTY_MODEL_PLACEHOLDER));
    }
    Content::model(parts)
}

fn encode_tool_results(assistant: &Message, results: &[Message]) -> Option<Content> {
    if results.is_empty() {
        return None;
    }
    if assistant.tool_calls.is_empty() {
        tracing::warn!(results = results.len(), "tool results without tool calls dropped");
        return None;
    }
    if results.len() != assistant.tool_calls.len() {
        tracing::warn!(
            calls = assistant.tool_calls.len(),
            results = results.len(),
            "tool call/result count mismatch, pairing the shorter side"
        );
    }
    let parts = assistant
        .tool_calls
        .iter()
        .zip(results)
        .map(|(call, result)| Part::function_response(call.name.clone(), result.content.clone()))
        .collect();
    Some(Content::user(parts))
}

/// 将供应商回复解码为 assistant 消息
pub fn decode_reply(content: &Content) -> Message {
    let mut text = String::new();
    let mut calls = Vec::new();
    for part in &content.parts {
        if let Some(t) = &part.text {
            text.push_str(t);
        }
        if let Some(fc) = &part.function_call {
            let args = match &fc.args {
                Value::Object(map) => map.clone(),
                _ => ArgMap::new(),
            };
            calls.push(ToolInvocation::new(
                fc.name.clone(),
                ToolArgs::Raw(Value::Object(args).to_string()),
            ));
        }
    }
    Message::assistant_with_calls(text.trim(), calls)
}
