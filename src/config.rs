//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PILOT__*` 覆盖（双下划线表示嵌套，如 `PILOT__AGENT__MAX_STEPS=40`）。
//! 配置在启动时构造一次，以引用传入各组件；组件不读取任何全局状态。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub monitor: MonitorSection,
}

/// [app] 段：沙箱根目录与仓库根目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 沙箱根目录：所有文件读写、脚本执行都限制在此目录下
    pub workspace_root: PathBuf,
    /// Shell 命令与 git 推送的工作目录
    pub repo_root: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workspace"),
            repo_root: PathBuf::from("."),
        }
    }
}

/// [llm] 段：后端、模型与单次调用截止时间
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：gemini / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// 单次模型调用截止时间（秒），超时即中止整个任务
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: crate::llm::gemini::GEMINI_DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.2,
            max_output_tokens: 8192,
            request_timeout_secs: 300,
        }
    }
}

impl LlmSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// [agent] 段：循环步数上限、心跳间隔、系统提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_steps: usize,
    pub pulse_interval_secs: u64,
    /// 覆盖内置系统提示词的文件
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 80,
            pulse_interval_secs: 8,
            system_prompt_path: None,
        }
    }
}

impl AgentSection {
    pub fn pulse_interval(&self) -> Duration {
        Duration::from_secs(self.pulse_interval_secs.max(1))
    }
}

/// [tools] 段：子进程截止时间、脚本解释器、Web 与 git
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub script_timeout_secs: u64,
    pub shell_timeout_secs: u64,
    pub script_interpreter: String,
    /// 允许执行的脚本扩展名（不含点）
    pub script_extension: String,
    /// run_script 是否逐行把输出推送到监控通道
    pub stream_script_output: bool,
    pub web: WebSection,
    pub git: GitSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            script_timeout_secs: 30,
            shell_timeout_secs: 30,
            script_interpreter: "python3".to_string(),
            script_extension: "py".to_string(),
            stream_script_output: true,
            web: WebSection::default(),
            git: GitSection::default(),
        }
    }
}

/// [tools.web] 段：抓取超时、最大字符数、搜索结果条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub max_search_results: usize,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            max_search_results: 5,
        }
    }
}

/// [tools.git] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GitSection {
    /// 仓库尚未初始化时添加为 origin 的远端
    pub remote_url: Option<String>,
}

/// [monitor] 段：监控通道
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MonitorSection {
    /// 追加写入的监控文件；未设置时只写 tracing 日志
    pub path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 PILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_steps, 80);
        assert_eq!(cfg.llm.request_timeout_secs, 300);
        assert_eq!(cfg.tools.script_timeout_secs, 30);
        assert_eq!(cfg.agent.pulse_interval(), Duration::from_secs(8));
        assert_eq!(cfg.app.workspace_root, PathBuf::from("workspace"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pilot.toml");
        std::fs::write(&path, "[agent]\nmax_steps = 5\n\n[tools]\nscript_interpreter = \"sh\"\n").unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_steps, 5);
        assert_eq!(cfg.agent.pulse_interval_secs, 8);
        assert_eq!(cfg.tools.script_interpreter, "sh");
        assert_eq!(cfg.tools.script_extension, "py");
    }
}
