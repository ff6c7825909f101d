//! Headless Agent 运行时
//!
//! create_agent_components 按配置构建沙箱、监控通道、工具注册表、模型客户端与编排器；
//! process_instruction 对单条指令跑一次编排循环，返回发给用户的最终文本。
//! 代理档案（knowledge/agent_profile.md）非空时在每次任务开始时附加到系统提示词末尾。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{AgentSection, AppConfig};
use crate::core::{render_outcome, AgentError, Orchestrator, RunSettings};
use crate::integrations::Transport;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::observability::Monitor;
use crate::tools::{
    BrowserClickTool, BrowserInputTool, BrowserNavigateTool, BrowserScreenshotTool, FetchWebpageTool,
    KnowledgeBase, ListFilesTool, ListSkillsTool, OpenInBrowserTool, OpenInChromeTool, ReadFileTool,
    ReadProfileTool, ReadSkillTool, RunScriptTool, SafeFs, SaveProfileTool, SaveSkillTool, SaveToGitTool,
    ScriptSettings, ShellTool, ToolExecutor, ToolRegistry, WebSearchTool, WriteFileTool,
};

/// 内置系统提示词；可由 [agent].system_prompt_path 或 config/prompts/system.txt 覆盖
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
[Identity]
- You act as one consistent person with your own judgement. Check who you are with read_agent_profile, \
and record what the user tells you about yourself with save_agent_info.

[Answering questions]
- Do not answer from memory. Call web_search first, read pages with fetch_webpage when needed, and answer \
only from what you found. Never guess facts, numbers or dates.

[Writing programs]
- When asked to write a program, always create it with write_file and put the complete code in `content`. \
Never paste code into the reply.
- Steps: (1) write_file a .py file (2) run it with run_script (3) on error fix it and write_file again \
(4) once it works, register it with save_skill.
- Before a task, check list_skills. Reuse a matching skill with read_skill and run_script.
- Files live in the project workspace only; use relative paths such as main.py.

[Acting autonomously]
- Creating files, running scripts, web access, browser automation, shell commands and git are all allowed. \
Do not ask for confirmation.
- While work remains, keep calling tools instead of replying with a summary. Reply with final text only \
when everything is done.
- Never delete files or directories.

[Other]
- When asked to save the changes, use save_to_git.
- Open URLs with open_in_browser (default browser) or open_in_chrome (when Chrome is requested).
- run_shell_command runs any command on this machine.";

/// 档案附加到系统提示词时的标题
pub const PROFILE_HEADING: &str = "[Current self]";

/// 空指令的回复
pub const EMPTY_INSTRUCTION_REPLY: &str = "Please enter a message.";

/// 预构建的 Agent 组件，可被多条指令共享
pub struct AgentComponents {
    pub orchestrator: Orchestrator,
    pub knowledge: KnowledgeBase,
    pub monitor: Monitor,
    pub workspace: SafeFs,
}

/// 读取系统提示词：配置路径 > config/prompts/system.txt > 内置
pub fn load_system_prompt(cfg: &AgentSection) -> String {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(p) = &cfg.system_prompt_path {
        candidates.push(p.clone());
    }
    candidates.push(PathBuf::from("config/prompts/system.txt"));
    candidates.push(PathBuf::from("../config/prompts/system.txt"));
    candidates
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// 系统提示词 + 档案
pub fn compose_system_prompt(base: &str, profile: Option<&str>) -> String {
    match profile.map(str::trim).filter(|p| !p.is_empty()) {
        Some(profile) => format!("{}\n\n{}\n{}", base, PROFILE_HEADING, profile),
        None => base.to_string(),
    }
}

/// 按配置注册全部工具；注册顺序即对模型公布的顺序
pub fn build_registry(cfg: &AppConfig, fs: &SafeFs, monitor: &Monitor) -> ToolRegistry {
    let kb = KnowledgeBase::new(fs.clone());
    let shell_limit = std::time::Duration::from_secs(cfg.tools.shell_timeout_secs);

    let mut tools = ToolRegistry::new();
    tools.register(ListFilesTool::new(fs.clone()));
    tools.register(WebSearchTool::new(&cfg.tools.web));
    tools.register(FetchWebpageTool::new(&cfg.tools.web));
    tools.register(OpenInBrowserTool);
    tools.register(OpenInChromeTool);
    tools.register(ShellTool::new(cfg.app.repo_root.clone(), shell_limit));
    tools.register(BrowserNavigateTool);
    tools.register(BrowserClickTool);
    tools.register(BrowserInputTool);
    tools.register(BrowserScreenshotTool);
    tools.register(ListSkillsTool::new(kb.clone()));
    tools.register(ReadFileTool::new(fs.clone()));
    tools.register(ReadSkillTool::new(kb.clone()));
    tools.register(WriteFileTool::new(fs.clone()));
    tools.register(SaveSkillTool::new(kb.clone()));
    tools.register(RunScriptTool::new(
        fs.clone(),
        ScriptSettings::from_config(&cfg.tools),
        monitor.clone(),
    ));
    tools.register(ReadProfileTool::new(kb.clone()));
    tools.register(SaveProfileTool::new(kb));
    tools.register(SaveToGitTool::new(
        cfg.app.repo_root.clone(),
        cfg.tools.git.remote_url.clone(),
    ));
    tools
}

/// 从配置创建组件；模型客户端按 [llm].provider 选择
pub fn create_agent_components(cfg: &AppConfig, transport: Arc<dyn Transport>) -> Result<AgentComponents, AgentError> {
    let llm = create_llm_from_config(&cfg.llm)?;
    create_agent_components_with_llm(cfg, llm, transport)
}

/// 使用给定模型客户端创建组件（测试与嵌入方使用）
pub fn create_agent_components_with_llm(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    transport: Arc<dyn Transport>,
) -> Result<AgentComponents, AgentError> {
    let workspace = SafeFs::open(&cfg.app.workspace_root).map_err(|e| {
        AgentError::Config(format!(
            "workspace root {}: {}",
            cfg.app.workspace_root.display(),
            e
        ))
    })?;
    let monitor = Monitor::from_path(cfg.monitor.path.as_deref());
    let registry = build_registry(cfg, &workspace, &monitor);
    tracing::info!(
        workspace = %workspace.root().display(),
        model = %llm.model_name(),
        tools = registry.len(),
        "agent components ready"
    );

    let executor = ToolExecutor::new(Arc::new(registry), monitor.clone());
    let orchestrator = Orchestrator::new(
        llm,
        executor,
        transport,
        load_system_prompt(&cfg.agent),
        RunSettings::from_config(cfg),
    );
    Ok(AgentComponents {
        orchestrator,
        knowledge: KnowledgeBase::new(workspace.clone()),
        monitor,
        workspace,
    })
}

/// 处理一条指令，返回最终发给用户的文本（致命错误也渲染为文本）
pub async fn process_instruction(components: &AgentComponents, instruction: &str) -> String {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        return EMPTY_INSTRUCTION_REPLY.to_string();
    }
    let profile = components.knowledge.profile();
    let system_prompt = compose_system_prompt(components.orchestrator.system_prompt(), profile.as_deref());
    let result = components
        .orchestrator
        .run_with_prompt(&system_prompt, instruction)
        .await;
    if let Err(e) = &result {
        tracing::warn!(error = %e, "task aborted");
    }
    render_outcome(&result)
}
