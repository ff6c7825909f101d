//! 编排循环：一条指令驱动的有界模型调用 / 工具分发循环
//!
//! 每一步：编码完整对话 -> 在截止时间内调用一次模型（独立任务 + 心跳守卫）-> 追加回复；
//! 回复没有工具调用即结束，否则按顺序逐个分发，每个调用恰好追加一条 tool 消息，再进入下一步。
//! 步数上限耗尽为非致命停止；模型超时 / 供应商错误 / 模型或工具任务 panic 为致命错误，不重试。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::task::AbortOnDropHandle;

use crate::config::AppConfig;
use crate::core::liveness::LivenessGuard;
use crate::core::AgentError;
use crate::integrations::Transport;
use crate::llm::{decode_reply, encode_request, Content, GenerateRequest, LlmClient};
use crate::memory::{ConversationLog, Message, ToolInvocation};
use crate::tools::{Artifact, DesktopCapture, ScreenCapture, ToolExecutor, ToolOutput};

/// 最终回复为空时的占位文本
pub const NO_ANSWER: &str = "(no answer)";

/// 最终回复的最大字符数
pub const ANSWER_MAX_CHARS: usize = 2000;

/// 需要向通道发送开始 / 完成通知的工具
const SCRIPT_TOOL: &str = "run_script";

/// 完成通知中结果预览的最大字符数
const SCRIPT_PREVIEW_CHARS: usize = 250;

/// 循环参数
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub max_steps: usize,
    pub call_timeout: Duration,
    pub pulse_interval: Duration,
}

impl RunSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_steps: cfg.agent.max_steps.max(1),
            call_timeout: cfg.llm.request_timeout(),
            pulse_interval: cfg.agent.pulse_interval(),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 模型给出不含工具调用的回复
    Completed,
    /// 达到步数上限
    StepLimit,
}

/// 一次任务的结果
#[derive(Debug, Clone)]
pub struct RunReport {
    pub answer: String,
    pub stop: StopReason,
    pub steps: usize,
    pub log: ConversationLog,
}

/// 一次任务的状态：对话记录与步数；任务结束即丢弃
#[derive(Debug)]
pub struct TaskRun {
    pub log: ConversationLog,
    pub steps: usize,
}

impl TaskRun {
    pub fn new(system_prompt: &str, instruction: &str) -> Self {
        Self {
            log: ConversationLog::start(system_prompt, instruction.trim()),
            steps: 0,
        }
    }

    fn finish(self, stop: StopReason) -> RunReport {
        let answer = match stop {
            StopReason::Completed => self
                .log
                .last()
                .map(|m| m.content.trim().to_string())
                .unwrap_or_default(),
            StopReason::StepLimit => self.log.last_assistant_text().unwrap_or("").to_string(),
        };
        RunReport {
            answer: if answer.is_empty() { NO_ANSWER.to_string() } else { answer },
            stop,
            steps: self.steps,
            log: self.log,
        }
    }
}

/// 编排器：共享的模型客户端、工具执行器、通道与参数，可并发服务多次 run
#[derive(Clone)]
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    transport: Arc<dyn Transport>,
    capture: Arc<dyn ScreenCapture>,
    system_prompt: String,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        transport: Arc<dyn Transport>,
        system_prompt: impl Into<String>,
        settings: RunSettings,
    ) -> Self {
        Self {
            llm,
            executor,
            transport,
            capture: Arc::new(DesktopCapture),
            system_prompt: system_prompt.into(),
            settings,
        }
    }

    /// 替换脚本执行后的截图来源
    pub fn with_capture(mut self, capture: Arc<dyn ScreenCapture>) -> Self {
        self.capture = capture;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 运行一条指令直到完成、步数耗尽或致命错误
    pub async fn run(&self, instruction: &str) -> Result<RunReport, AgentError> {
        self.run_with_prompt(&self.system_prompt, instruction).await
    }

    /// 使用本次任务专属的系统提示词运行（如附加了代理档案）
    pub async fn run_with_prompt(&self, system_prompt: &str, instruction: &str) -> Result<RunReport, AgentError> {
        let preview: String = instruction.trim().chars().take(150).collect();
        self.executor.monitor().record("task start", &preview).await;

        let mut run = TaskRun::new(system_prompt, instruction);
        let descriptors = self.executor.descriptors();

        while run.steps < self.settings.max_steps {
            run.steps += 1;
            tracing::debug!(step = run.steps, messages = run.log.len(), "model call");

            let request = encode_request(&run.log, &descriptors);
            let reply = self.call_model(request).await?;
            let message = decode_reply(&reply);
            let calls = message.tool_calls.clone();
            run.log.push(message);

            if calls.is_empty() {
                tracing::info!(steps = run.steps, "task completed");
                return Ok(run.finish(StopReason::Completed));
            }

            for call in &calls {
                let output = self.dispatch(call).await?;
                run.log.push(Message::tool(output.text));
            }
        }

        tracing::warn!(max_steps = self.settings.max_steps, "step limit reached");
        Ok(run.finish(StopReason::StepLimit))
    }

    /// 单次模型调用：在独立任务中执行，整段等待期间保持心跳；守卫在任何出口都会被取消
    async fn call_model(&self, request: GenerateRequest) -> Result<Content, AgentError> {
        let guard = LivenessGuard::start(Arc::clone(&self.transport), self.settings.pulse_interval);
        let llm = Arc::clone(&self.llm);
        let handle = tokio::spawn(async move { llm.generate(request).await });
        let abort = handle.abort_handle();

        let result = tokio::time::timeout(self.settings.call_timeout, handle).await;
        guard.stop().await;

        match result {
            Err(_) => {
                abort.abort();
                tracing::error!(timeout_secs = self.settings.call_timeout.as_secs(), "model call timed out");
                Err(AgentError::ProviderTimeout(self.settings.call_timeout.as_secs()))
            }
            Ok(Err(join_err)) => {
                let detail = join_failure(join_err);
                tracing::error!(detail = %detail, "model call task failed");
                Err(AgentError::unexpected(detail))
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, "model call failed");
                Err(AgentError::Provider(e))
            }
            Ok(Ok(Ok(content))) => Ok(content),
        }
    }

    /// 分发一个调用：参数在这里归一化一次，处理函数在独立任务中执行，panic 转为致命错误。
    /// 脚本执行额外发送开始 / 完成通知与执行后的截图；产物转发到通道
    async fn dispatch(&self, call: &ToolInvocation) -> Result<ToolOutput, AgentError> {
        let args = call.arguments.normalize();
        let script = (call.name == SCRIPT_TOOL).then(|| {
            args.get("filename")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        });

        if let Some(filename) = &script {
            self.notify(&format!("▶ Running: {}", filename)).await;
        }

        let executor = self.executor.clone();
        let name = call.name.clone();
        let handle = AbortOnDropHandle::new(tokio::spawn(async move { executor.dispatch(&name, args).await }));
        let output = match handle.await {
            Ok(output) => output,
            Err(join_err) => {
                let detail = join_failure(join_err);
                tracing::error!(tool = %call.name, detail = %detail, "tool task failed");
                return Err(AgentError::unexpected(detail));
            }
        };

        if let Some(filename) = &script {
            self.notify(&format!("✅ Finished: {}", filename)).await;
            let preview: String = output.text.chars().take(SCRIPT_PREVIEW_CHARS).collect();
            self.executor
                .monitor()
                .record(&format!("run_script done: {}", filename), &preview)
                .await;
            if let Some(shot) = self.capture.capture().await {
                self.forward(&shot).await;
                if let Err(e) = tokio::fs::remove_file(&shot.path).await {
                    tracing::debug!(error = %e, path = %shot.path.display(), "screenshot cleanup failed");
                }
            }
        }

        if let Some(artifact) = &output.artifact {
            self.forward(artifact).await;
        }
        Ok(output)
    }

    async fn forward(&self, artifact: &Artifact) {
        if let Err(e) = self.transport.send_artifact(artifact).await {
            tracing::warn!(error = %e, path = %artifact.path.display(), "artifact delivery failed");
        }
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.transport.send_text(text).await {
            tracing::warn!(error = %e, "notification failed");
        }
    }
}

fn join_failure(join_err: JoinError) -> String {
    if join_err.is_panic() {
        panic_message(join_err.into_panic())
    } else {
        join_err.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// 把任务结果渲染为发给用户的最终文本
pub fn render_outcome(result: &Result<RunReport, AgentError>) -> String {
    match result {
        Ok(report) => {
            let answer = report.answer.trim();
            if answer.chars().count() > ANSWER_MAX_CHARS {
                format!("{}…", answer.chars().take(ANSWER_MAX_CHARS).collect::<String>())
            } else if answer.is_empty() {
                NO_ANSWER.to_string()
            } else {
                answer.to_string()
            }
        }
        Err(AgentError::ProviderTimeout(secs)) => format!(
            "Timed out ({}s). The model is responding slowly or the connection has a problem.",
            secs
        ),
        Err(AgentError::Provider(e)) => {
            let detail: String = e.to_string().chars().take(500).collect();
            format!("Model error: {}", detail)
        }
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    fn report(answer: &str) -> Result<RunReport, AgentError> {
        Ok(RunReport {
            answer: answer.to_string(),
            stop: StopReason::Completed,
            steps: 1,
            log: ConversationLog::new(),
        })
    }

    #[test]
    fn test_render_truncates_long_answers() {
        let rendered = render_outcome(&report(&"a".repeat(2500)));
        assert_eq!(rendered.chars().count(), ANSWER_MAX_CHARS + 1);
        assert!(rendered.ends_with('…'));
        assert_eq!(render_outcome(&report("hi")), "hi");
        assert_eq!(render_outcome(&report("  ")), NO_ANSWER);
    }

    #[test]
    fn test_render_errors() {
        let timeout = render_outcome(&Err(AgentError::ProviderTimeout(300)));
        assert!(timeout.starts_with("Timed out (300s)"));
        let provider = render_outcome(&Err(AgentError::Provider(LlmError::Http("reset".into()))));
        assert!(provider.starts_with("Model error:"));
        assert!(provider.contains("reset"));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "task panicked");
    }

    #[test]
    fn test_finish_uses_placeholder() {
        let mut run = TaskRun::new("sys", "do it");
        run.log.push(Message::assistant(""));
        let report = run.finish(StopReason::Completed);
        assert_eq!(report.answer, NO_ANSWER);

        let mut run = TaskRun::new("sys", "do it");
        run.log.push(Message::assistant_with_calls("working on it", vec![ToolInvocation::raw("x", "{}")]));
        run.log.push(Message::tool("ok"));
        let report = run.finish(StopReason::StepLimit);
        assert_eq!(report.answer, "working on it");
    }
}
