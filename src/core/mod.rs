//! 核心编排层：任务级错误、存活指示、编排循环

pub mod error;
pub mod liveness;
pub mod orchestrator;

pub use error::AgentError;
pub use liveness::LivenessGuard;
pub use orchestrator::{
    render_outcome, Orchestrator, RunReport, RunSettings, StopReason, TaskRun, ANSWER_MAX_CHARS, NO_ANSWER,
};
