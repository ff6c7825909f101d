//! 端到端流程测试：Mock 模型 + 记录型通道 + 临时沙箱

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pilot::agent::{create_agent_components_with_llm, process_instruction, AgentComponents, EMPTY_INSTRUCTION_REPLY};
use pilot::config::AppConfig;
use pilot::core::{render_outcome, AgentError, Orchestrator, RunSettings, StopReason, NO_ANSWER};
use pilot::integrations::RecordingTransport;
use pilot::llm::{Content, GenerateRequest, LlmClient, LlmError, ScriptedLlmClient};
use pilot::memory::{ArgMap, Role};
use pilot::observability::Monitor;
use pilot::tools::{Artifact, ScreenCapture, Tool, ToolExecutor, ToolOutput, ToolRegistry, SCREEN_CAPTION};
use serde_json::json;
use tempfile::TempDir;

fn config_for(dir: &TempDir) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.app.workspace_root = dir.path().join("workspace");
    cfg.app.repo_root = dir.path().to_path_buf();
    cfg.tools.script_interpreter = "sh".to_string();
    cfg.tools.script_extension = "sh".to_string();
    cfg.tools.script_timeout_secs = 5;
    cfg
}

fn components(
    dir: &TempDir,
    llm: Arc<ScriptedLlmClient>,
    transport: Arc<RecordingTransport>,
) -> AgentComponents {
    create_agent_components_with_llm(&config_for(dir), llm, transport).unwrap()
}

/// 第 n 个请求中最后一个 turn 的全部函数结果文本
fn tool_results(request: &GenerateRequest) -> Vec<(String, String)> {
    request
        .contents
        .last()
        .map(|c| {
            c.parts
                .iter()
                .filter_map(|p| p.function_response.as_ref())
                .map(|r| {
                    (
                        r.name.clone(),
                        r.response["result"].as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_write_then_run_script() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        ScriptedLlmClient::calls(
            "",
            &[("write_file", json!({"filename": "hello.sh", "content": "echo hello"}))],
        ),
        ScriptedLlmClient::calls("", &[("run_script", json!({"filename": "hello.sh"}))]),
        ScriptedLlmClient::text("It printed hello."),
    ]));
    let transport = Arc::new(RecordingTransport::new());
    let agent = components(&dir, llm.clone(), transport.clone());

    let reply = process_instruction(&agent, "write and run a greeting script").await;
    assert_eq!(reply, "It printed hello.");
    assert_eq!(llm.call_count(), 3);

    let requests = llm.requests();
    let written = tool_results(&requests[1]);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0, "write_file");
    assert!(written[0].1.starts_with("Saved hello.sh"), "{}", written[0].1);

    let ran = tool_results(&requests[2]);
    assert_eq!(ran[0].0, "run_script");
    assert!(ran[0].1.starts_with("stdout:\nhello"), "{}", ran[0].1);

    assert_eq!(
        transport.texts(),
        vec!["▶ Running: hello.sh".to_string(), "✅ Finished: hello.sh".to_string()]
    );
    assert!(dir.path().join("workspace/hello.sh").exists());
}

#[tokio::test]
async fn test_calls_in_one_reply_are_answered_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        ScriptedLlmClient::calls(
            "checking",
            &[
                ("list_files", json!({})),
                ("read_file", json!({"filename": "missing.txt"})),
                ("list_skills", json!({})),
            ],
        ),
        ScriptedLlmClient::text("Nothing here yet."),
    ]));
    let agent = components(&dir, llm.clone(), Arc::new(RecordingTransport::new()));

    let reply = process_instruction(&agent, "what do we have?").await;
    assert_eq!(reply, "Nothing here yet.");

    let results = tool_results(&llm.requests()[1]);
    let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["list_files", "read_file", "list_skills"]);
    assert_eq!(results[0].1, "Files: (none)");
    assert!(results[1].1.starts_with("Error:"), "{}", results[1].1);
    assert_eq!(results[2].1, "No skills registered yet.");
}

#[tokio::test]
async fn test_unknown_tool_keeps_its_result_slot() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        ScriptedLlmClient::calls(
            "",
            &[("list_files", json!({})), ("teleport", json!({"to": "mars"}))],
        ),
        ScriptedLlmClient::text("I cannot do that."),
    ]));
    let agent = components(&dir, llm.clone(), Arc::new(RecordingTransport::new()));

    let report = agent.orchestrator.run("go to mars").await.unwrap();
    assert_eq!(report.answer, "I cannot do that.");

    let tool_messages: Vec<&str> = report
        .log
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(tool_messages, vec!["Files: (none)", "Unknown tool: teleport"]);

    let results = tool_results(&llm.requests()[1]);
    assert_eq!(results[1], ("teleport".to_string(), "Unknown tool: teleport".to_string()));
}

#[tokio::test]
async fn test_python_script_prints_42() {
    let python = std::process::Command::new("python3").arg("--version").output();
    if !python.map(|o| o.status.success()).unwrap_or(false) {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::default();
    cfg.app.workspace_root = dir.path().join("workspace");
    cfg.app.repo_root = dir.path().to_path_buf();
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        ScriptedLlmClient::calls(
            "",
            &[("write_file", json!({"filename": "hello.py", "content": "print(42)\n"}))],
        ),
        ScriptedLlmClient::calls("", &[("run_script", json!({"filename": "hello.py"}))]),
        ScriptedLlmClient::text("It prints 42."),
    ]));
    let agent = create_agent_components_with_llm(&cfg, llm.clone(), Arc::new(RecordingTransport::new())).unwrap();

    let reply = process_instruction(&agent, "create hello.py that prints 42").await;
    assert_eq!(reply, "It prints 42.");
    let ran = tool_results(&llm.requests()[2]);
    assert_eq!(ran[0].1.trim_end(), "stdout:\n42");
}

#[tokio::test]
async fn test_sandbox_escape_is_a_tool_error() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        ScriptedLlmClient::calls(
            "",
            &[("write_file", json!({"filename": "../../etc/passwd", "content": "x"}))],
        ),
        ScriptedLlmClient::text("Refused."),
    ]));
    let agent = components(&dir, llm.clone(), Arc::new(RecordingTransport::new()));

    assert_eq!(process_instruction(&agent, "escape").await, "Refused.");
    let results = tool_results(&llm.requests()[1]);
    assert!(results[0].1.starts_with("Error:"), "{}", results[0].1);
    assert!(!dir.path().join("etc").exists());
}

#[tokio::test]
async fn test_empty_instruction_skips_model() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(Vec::new()));
    let agent = components(&dir, llm.clone(), Arc::new(RecordingTransport::new()));

    assert_eq!(process_instruction(&agent, "   ").await, EMPTY_INSTRUCTION_REPLY);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_profile_is_appended_to_system_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(vec![ScriptedLlmClient::text("Hi, I am Kai.")]));
    let agent = components(&dir, llm.clone(), Arc::new(RecordingTransport::new()));
    agent.knowledge.append_profile("name: Kai").unwrap();

    process_instruction(&agent, "who are you?").await;
    let system = llm.requests()[0].system_instruction.clone().unwrap_or_default();
    assert!(system.ends_with("[Current self]\nname: Kai"), "{}", system);
}

#[tokio::test]
async fn test_step_limit_stops_without_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config_for(&dir);
    cfg.agent.max_steps = 3;
    let llm = Arc::new(ScriptedLlmClient::repeating(ScriptedLlmClient::calls(
        "still looking",
        &[("list_files", json!({}))],
    )));
    let agent = create_agent_components_with_llm(&cfg, llm.clone(), Arc::new(RecordingTransport::new())).unwrap();

    let report = agent.orchestrator.run("loop forever").await.unwrap();
    assert_eq!(report.stop, StopReason::StepLimit);
    assert_eq!(report.steps, 3);
    assert_eq!(report.answer, "still looking");
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn test_provider_error_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::failing(LlmError::Http("connection reset".into())));
    let agent = components(&dir, llm.clone(), Arc::new(RecordingTransport::new()));

    let reply = process_instruction(&agent, "hello").await;
    assert_eq!(reply, "Model error: Request failed: connection reset");
    assert_eq!(llm.call_count(), 1);
}

fn bare_orchestrator(llm: Arc<dyn LlmClient>, transport: Arc<RecordingTransport>, registry: ToolRegistry) -> Orchestrator {
    let executor = ToolExecutor::new(Arc::new(registry), Monitor::null());
    let settings = RunSettings {
        max_steps: 5,
        call_timeout: Duration::from_millis(300),
        pulse_interval: Duration::from_millis(50),
    };
    Orchestrator::new(llm, executor, transport, "system", settings)
}

#[tokio::test]
async fn test_provider_timeout_stops_pulses() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![ScriptedLlmClient::text("late")]).with_delay(Duration::from_secs(5)));
    let transport = Arc::new(RecordingTransport::new());
    let orchestrator = bare_orchestrator(llm, transport.clone(), ToolRegistry::new());

    let result = orchestrator.run("slow").await;
    assert!(matches!(result, Err(AgentError::ProviderTimeout(_))));

    let pulses = transport.pulse_count();
    assert!(pulses >= 2, "pulses: {pulses}");
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(transport.pulse_count(), pulses);
}

struct PanickingClient;

#[async_trait]
impl LlmClient for PanickingClient {
    async fn generate(&self, _request: GenerateRequest) -> Result<Content, LlmError> {
        panic!("decoder exploded");
    }
}

#[tokio::test]
async fn test_model_task_panic_is_unexpected() {
    let transport = Arc::new(RecordingTransport::new());
    let orchestrator = bare_orchestrator(Arc::new(PanickingClient), transport, ToolRegistry::new());

    match orchestrator.run("boom").await {
        Err(AgentError::Unexpected(detail)) => assert!(detail.contains("decoder exploded")),
        other => panic!("unexpected result: {other:?}"),
    }
}

struct SnapshotTool;

#[async_trait]
impl Tool for SnapshotTool {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn description(&self) -> &str {
        "Produce an image"
    }

    async fn execute(&self, _args: ArgMap) -> Result<ToolOutput, String> {
        Ok(ToolOutput::text("Saved snapshot").with_artifact("/tmp/snapshot.png", "snapshot"))
    }
}

#[tokio::test]
async fn test_artifacts_are_forwarded() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        ScriptedLlmClient::calls("", &[("snapshot", json!({}))]),
        ScriptedLlmClient::text(""),
    ]));
    let transport = Arc::new(RecordingTransport::new());
    let mut registry = ToolRegistry::new();
    registry.register(SnapshotTool);
    let orchestrator = bare_orchestrator(llm, transport.clone(), registry);

    let report = orchestrator.run("take a picture").await.unwrap();
    assert_eq!(report.stop, StopReason::Completed);
    assert_eq!(report.answer, NO_ANSWER);

    let artifacts = transport.artifacts();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].caption, "snapshot");
}

struct ExplodingTool;

#[async_trait]
impl Tool for ExplodingTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn description(&self) -> &str {
        "Always panics"
    }

    async fn execute(&self, _args: ArgMap) -> Result<ToolOutput, String> {
        panic!("handler exploded");
    }
}

#[tokio::test]
async fn test_tool_panic_aborts_only_the_run() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![ScriptedLlmClient::calls(
        "",
        &[("explode", json!({}))],
    )]));
    let mut registry = ToolRegistry::new();
    registry.register(ExplodingTool);
    let orchestrator = bare_orchestrator(llm, Arc::new(RecordingTransport::new()), registry);

    let result = orchestrator.run("go").await;
    match &result {
        Err(AgentError::Unexpected(detail)) => assert!(detail.contains("handler exploded"), "{detail}"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(render_outcome(&result), "Unexpected failure: handler exploded");

    // 同一个编排器仍可处理下一条指令（脚本耗尽后 mock 回复 "done"）
    let next = orchestrator.run("next").await.unwrap();
    assert_eq!(next.answer, "done");
}

struct FakeScriptTool;

#[async_trait]
impl Tool for FakeScriptTool {
    fn name(&self) -> &str {
        "run_script"
    }

    fn description(&self) -> &str {
        "Pretend to run a script"
    }

    async fn execute(&self, _args: ArgMap) -> Result<ToolOutput, String> {
        Ok(ToolOutput::text("stdout:\nok"))
    }
}

struct FixedCapture(std::path::PathBuf);

#[async_trait]
impl ScreenCapture for FixedCapture {
    async fn capture(&self) -> Option<Artifact> {
        std::fs::write(&self.0, b"png").ok()?;
        Some(Artifact {
            path: self.0.clone(),
            caption: SCREEN_CAPTION.to_string(),
        })
    }
}

#[tokio::test]
async fn test_screen_capture_follows_run_script() {
    let dir = tempfile::tempdir().unwrap();
    let shot = dir.path().join("screen.png");
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        ScriptedLlmClient::calls("", &[("run_script", json!({"filename": "job.py"}))]),
        ScriptedLlmClient::calls("", &[("list_files", json!({}))]),
        ScriptedLlmClient::text("Finished."),
    ]));
    let transport = Arc::new(RecordingTransport::new());
    let mut registry = ToolRegistry::new();
    registry.register(FakeScriptTool);
    let orchestrator = bare_orchestrator(llm, transport.clone(), registry)
        .with_capture(Arc::new(FixedCapture(shot.clone())));

    let report = orchestrator.run("run the job").await.unwrap();
    assert_eq!(report.answer, "Finished.");

    let artifacts = transport.artifacts();
    assert_eq!(artifacts.len(), 1, "only run_script triggers a capture");
    assert_eq!(artifacts[0].path, shot);
    assert_eq!(artifacts[0].caption, SCREEN_CAPTION);
    assert!(!shot.exists(), "capture file is removed after delivery");
    assert_eq!(
        transport.texts(),
        vec!["▶ Running: job.py".to_string(), "✅ Finished: job.py".to_string()]
    );
}
