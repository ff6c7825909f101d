//! 记忆层：单次任务内的规范对话日志（任务结束即丢弃，不做持久化）

pub mod conversation;

pub use conversation::{ArgMap, ConversationLog, Message, Role, ToolArgs, ToolInvocation};
