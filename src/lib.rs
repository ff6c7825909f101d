//! Pilot - Rust 工具调用智能体
//!
//! 一条自然语言指令驱动一个有界循环：模型（Gemini）在每一步选择工具，工具在沙箱中执行，
//! 结果逐条回填给模型，直到模型给出最终回复或步数耗尽。
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（组件装配、系统提示词、单条指令处理）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排循环、存活心跳、任务级错误
//! - **integrations**: 外部通道抽象（终端 / 记录）
//! - **llm**: 模型客户端抽象、Gemini 协议适配与 Mock
//! - **memory**: 单次任务的对话记录
//! - **observability**: tracing 初始化与监控通道
//! - **tools**: 沙箱文件、脚本 / Shell、Web、浏览器、技能库、git 等工具与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use agent::{create_agent_components, process_instruction, AgentComponents};
