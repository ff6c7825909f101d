//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按注册顺序保存，
//! 并提供按名分发。未知工具名返回哨兵文本而不是错误，工具返回的 Err 统一降级为 "Error: ..." 文本。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::memory::ArgMap;

/// 未知工具的哨兵文本前缀
pub const UNKNOWN_TOOL: &str = "Unknown tool";

/// 分发失败；Display 即写入对话的工具结果文本
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Error: {0}")]
    Failed(String),
}

/// 工具描述：供模型选择工具的 name / description / 参数 schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// 旁路产物（如截图），由调用方决定是否转发给外部通道
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub caption: String,
}

/// 工具输出：文本（必有）+ 可选产物
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub artifact: Option<Artifact>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>, caption: impl Into<String>) -> Self {
        self.artifact = Some(Artifact {
            path: path.into(),
            caption: caption.into(),
        });
        self
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::text(text)
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为已归一化的映射）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（函数声明中的 name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(self.name(), self.description(), self.parameters_schema())
    }

    /// 执行工具；Err 为给模型看的错误说明
    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String>;
}

/// 工具注册表：按注册顺序保存 Arc<dyn Tool>，支持 register / get / execute / descriptors
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具后注册者覆盖先注册者（位置不变）
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        let tool: Arc<dyn Tool> = Arc::new(tool);
        match self.index.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub async fn execute(&self, name: &str, args: ArgMap) -> ToolOutput {
        self.try_execute(name, args)
            .await
            .unwrap_or_else(|e| ToolOutput::text(e.to_string()))
    }

    /// 保留失败类别的执行，供审计使用
    pub async fn try_execute(&self, name: &str, args: ArgMap) -> Result<ToolOutput, DispatchError> {
        let tool = self
            .get(name)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;
        tool.execute(args).await.map_err(DispatchError::Failed)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// 按注册顺序返回全部工具描述
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolArgs;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo text"
        }

        async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
            args.get("text")
                .and_then(|v| v.as_str())
                .map(ToolOutput::from)
                .ok_or_else(|| "text is required".to_string())
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_sentinel() {
        let registry = ToolRegistry::new();
        let out = registry.execute("nope", ArgMap::new()).await;
        assert_eq!(out.text, "Unknown tool: nope");
    }

    #[tokio::test]
    async fn test_error_downgraded_to_text() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let out = registry.execute("echo", ToolArgs::Raw("not json".into()).normalize()).await;
        assert_eq!(out.text, "Error: text is required");

        let out = registry
            .execute("echo", ToolArgs::Raw(r#"{"text":"hi"}"#.into()).normalize())
            .await;
        assert_eq!(out.text, "hi");
    }

    #[test]
    fn test_descriptors_keep_registration_order() {
        struct Named(&'static str);

        #[async_trait]
        impl Tool for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                "x"
            }
            async fn execute(&self, _args: ArgMap) -> Result<ToolOutput, String> {
                Ok(ToolOutput::text(self.0))
            }
        }

        let mut registry = ToolRegistry::new();
        for n in ["c", "a", "b", "a"] {
            registry.register(Named(n));
        }
        assert_eq!(registry.tool_names(), vec!["c", "a", "b"]);
        assert_eq!(registry.descriptors()[0].parameters["type"], "object");
    }
}
