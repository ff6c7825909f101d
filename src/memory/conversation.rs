//! 规范对话日志（Canonical Message Log）
//!
//! 单次任务内的有序、只追加消息序列；与具体模型供应商无关，由协议适配器（llm::protocol）翻译为线上格式。
//! Tool 消息与前一条 Assistant 消息的 tool_calls 按位置一一对应，不携带调用 ID。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 参数映射：参数名 -> JSON 值
pub type ArgMap = Map<String, Value>;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 工具参数：模型可能给出原始 JSON 文本，也可能已是结构化映射
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolArgs {
    Raw(String),
    Structured(ArgMap),
}

impl ToolArgs {
    /// 归一化为映射；非法 JSON 或非对象一律退化为空映射，不报错
    pub fn normalize(&self) -> ArgMap {
        match self {
            ToolArgs::Structured(map) => map.clone(),
            ToolArgs::Raw(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                _ => ArgMap::new(),
            },
        }
    }

    /// 序列化为原始文本（解码供应商回复时使用，保持与 Raw 路径对称）
    pub fn to_raw(&self) -> String {
        match self {
            ToolArgs::Raw(text) => text.clone(),
            ToolArgs::Structured(map) => Value::Object(map.clone()).to_string(),
        }
    }
}

impl Default for ToolArgs {
    fn default() -> Self {
        ToolArgs::Structured(ArgMap::new())
    }
}

/// 一次工具调用：名称 + 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: ToolArgs,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: ToolArgs) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn raw(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::new(name, ToolArgs::Raw(arguments.into()))
    }
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 仅 Assistant 消息可能非空
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// 只追加的对话日志：不提供删除、修改或重排接口
#[derive(Clone, Debug, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 system + user 开启一次任务
    pub fn start(system: impl Into<String>, instruction: impl Into<String>) -> Self {
        let mut log = Self::new();
        log.push(Message::system(system));
        log.push(Message::user(instruction));
        log
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// System 消息内容（多条时按顺序拼接）
    pub fn system_instruction(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// 最后一条非空的 Assistant 文本（步数耗尽时返回给用户）
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.trim())
            .find(|c| !c.is_empty())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_args_normalize() {
        let args = ToolArgs::Raw(r#"{"filename": "a.py"}"#.to_string());
        let map = args.normalize();
        assert_eq!(map.get("filename").and_then(|v| v.as_str()), Some("a.py"));
    }

    #[test]
    fn test_malformed_args_degrade_to_empty() {
        assert!(ToolArgs::Raw("{not json".to_string()).normalize().is_empty());
        assert!(ToolArgs::Raw("[1, 2]".to_string()).normalize().is_empty());
        assert!(ToolArgs::Raw(String::new()).normalize().is_empty());
    }

    #[test]
    fn test_system_instruction_and_last_text() {
        let mut log = ConversationLog::start("be helpful", "hi");
        log.push(Message::assistant("first"));
        log.push(Message::assistant_with_calls("", vec![ToolInvocation::raw("list_files", "{}")]));
        log.push(Message::tool("Files: a.py"));
        assert_eq!(log.system_instruction().as_deref(), Some("be helpful"));
        assert_eq!(log.last_assistant_text(), Some("first"));
        assert_eq!(log.len(), 5);
    }
}
