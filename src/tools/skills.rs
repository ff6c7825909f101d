//! 知识库工具：技能目录与代理档案
//!
//! 技能保存为沙箱内 `knowledge/<skill>.md`，格式为 `script: <file>\n\n<description>`；
//! 代理档案为 `knowledge/agent_profile.md`，每次追加一行。所有读写都经过 SafeFs。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::memory::ArgMap;
use crate::tools::filesystem::{FsError, SafeFs};
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolOutput};

pub const KNOWLEDGE_DIR: &str = "knowledge";
pub const PROFILE_FILE: &str = "agent_profile.md";

/// 未记录档案时的占位文本
pub const PROFILE_PLACEHOLDER: &str = "(nothing recorded yet)";

/// 技能名清洗：去掉 `..` 与 `/`；保存时空格替换为下划线
fn sanitize_skill_name(name: &str, underscore_spaces: bool) -> String {
    let safe = name.trim().replace("..", "").replace(['/', '\\'], "");
    if underscore_spaces {
        safe.replace(' ', "_")
    } else {
        safe
    }
}

/// 沙箱内的知识库目录
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    fs: SafeFs,
}

impl KnowledgeBase {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }

    fn skill_path(name: &str) -> String {
        format!("{}/{}.md", KNOWLEDGE_DIR, name)
    }

    fn profile_path() -> String {
        format!("{}/{}", KNOWLEDGE_DIR, PROFILE_FILE)
    }

    /// 技能列表：(名称, 一行摘要)，按文件名排序；档案文件不算技能
    pub fn skills(&self) -> Vec<(String, String)> {
        let Ok(entries) = self.fs.list(KNOWLEDGE_DIR) else {
            return Vec::new();
        };
        entries
            .into_iter()
            .filter(|f| f.ends_with(".md") && f != PROFILE_FILE)
            .map(|f| {
                let name = f.trim_end_matches(".md").to_string();
                let summary = match self.fs.read(&format!("{}/{}", KNOWLEDGE_DIR, f)) {
                    Ok(text) => summarize(&text),
                    Err(_) => "(unreadable)".to_string(),
                };
                (name, summary)
            })
            .collect()
    }

    pub fn read_skill(&self, skill_name: &str) -> Result<String, String> {
        let safe = sanitize_skill_name(skill_name, false);
        if safe.is_empty() {
            return Err("specify a skill name.".to_string());
        }
        self.fs.read(&Self::skill_path(&safe)).map_err(|e| match e {
            FsError::NotFound(_) => format!(
                "skill '{}' not found. Check the list with list_skills.",
                skill_name.trim()
            ),
            other => other.to_string(),
        })
    }

    /// 保存技能，返回清洗后的名称
    pub fn save_skill(&self, skill_name: &str, description: &str, script_filename: &str) -> Result<String, String> {
        let safe = sanitize_skill_name(skill_name, true);
        if safe.is_empty() {
            return Err("specify a skill name.".to_string());
        }
        let content = format!("script: {}\n\n{}", script_filename.trim(), description.trim());
        self.fs
            .write(&Self::skill_path(&safe), &content)
            .map_err(|e| e.to_string())?;
        Ok(safe)
    }

    /// 档案内容；不存在或为空时返回 None
    pub fn profile(&self) -> Option<String> {
        let text = self.fs.read(&Self::profile_path()).ok()?;
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// 追加一行档案（读出后整文件覆盖写入）
    pub fn append_profile(&self, content: &str) -> Result<(), String> {
        let line = content.trim();
        if line.is_empty() {
            return Err("specify the content to record.".to_string());
        }
        let mut text = match self.fs.read(&Self::profile_path()) {
            Ok(t) => t,
            Err(FsError::NotFound(_)) => String::new(),
            Err(e) => return Err(e.to_string()),
        };
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(line);
        text.push('\n');
        self.fs
            .write(&Self::profile_path(), &text)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// 摘要：首行为 `script:` 时取第二个非空行，否则取首行前 80 字符
fn summarize(text: &str) -> String {
    let mut lines = text.lines().map(str::trim);
    let first = lines.next().unwrap_or("");
    if first.starts_with("script:") {
        let rest = lines.find(|l| !l.is_empty()).unwrap_or(first);
        rest.to_string()
    } else if first.is_empty() {
        "(no description)".to_string()
    } else {
        first.chars().take(80).collect()
    }
}

/// list_skills
pub struct ListSkillsTool {
    kb: KnowledgeBase,
}

impl ListSkillsTool {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for ListSkillsTool {
    fn name(&self) -> &str {
        "list_skills"
    }

    fn description(&self) -> &str {
        "List the skills registered in the knowledge folder. Check first whether an existing skill fits the task."
    }

    async fn execute(&self, _args: ArgMap) -> Result<ToolOutput, String> {
        let skills = self.kb.skills();
        if skills.is_empty() {
            return Ok("No skills registered yet.".into());
        }
        let lines: Vec<String> = skills
            .iter()
            .map(|(name, summary)| format!("- {}: {}", name, summary))
            .collect();
        Ok(format!("Registered skills:\n{}", lines.join("\n")).into())
    }
}

#[derive(Deserialize, JsonSchema)]
struct ReadSkillArgs {
    /// Skill name as shown by list_skills
    skill_name: String,
}

/// read_skill
pub struct ReadSkillTool {
    kb: KnowledgeBase,
}

impl ReadSkillTool {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for ReadSkillTool {
    fn name(&self) -> &str {
        "read_skill"
    }

    fn description(&self) -> &str {
        "Read a skill description from the knowledge folder. The `script:` line names the file to run."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ReadSkillArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: ReadSkillArgs = parse_args(args)?;
        self.kb.read_skill(&args.skill_name).map(ToolOutput::from)
    }
}

#[derive(Deserialize, JsonSchema)]
struct SaveSkillArgs {
    /// Skill name
    skill_name: String,
    /// What the skill does and when to use it
    description: String,
    /// Script to run, relative to the workspace
    script_filename: String,
}

/// save_skill
pub struct SaveSkillTool {
    kb: KnowledgeBase,
}

impl SaveSkillTool {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for SaveSkillTool {
    fn name(&self) -> &str {
        "save_skill"
    }

    fn description(&self) -> &str {
        "Register a program you wrote as a skill in the knowledge folder so it can be found later with \
         list_skills and read_skill."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<SaveSkillArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: SaveSkillArgs = parse_args(args)?;
        tracing::info!(skill = %args.skill_name, "save_skill tool execute");
        let name = self
            .kb
            .save_skill(&args.skill_name, &args.description, &args.script_filename)?;
        Ok(format!(
            "Skill '{}' registered in the knowledge folder. script: {}",
            name,
            args.script_filename.trim()
        )
        .into())
    }
}

/// read_agent_profile
pub struct ReadProfileTool {
    kb: KnowledgeBase,
}

impl ReadProfileTool {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for ReadProfileTool {
    fn name(&self) -> &str {
        "read_agent_profile"
    }

    fn description(&self) -> &str {
        "Read the file that records information about yourself (the assistant): name, role, preferences, rules."
    }

    async fn execute(&self, _args: ArgMap) -> Result<ToolOutput, String> {
        Ok(self
            .kb
            .profile()
            .unwrap_or_else(|| PROFILE_PLACEHOLDER.to_string())
            .into())
    }
}

#[derive(Deserialize, JsonSchema)]
struct SaveInfoArgs {
    /// One piece of information about yourself to remember
    content: String,
}

/// save_agent_info
pub struct SaveProfileTool {
    kb: KnowledgeBase,
}

impl SaveProfileTool {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for SaveProfileTool {
    fn name(&self) -> &str {
        "save_agent_info"
    }

    fn description(&self) -> &str {
        "Record information the user told you about yourself (name, role, preferences, rules) in your profile file. \
         Always call it when such information is given."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<SaveInfoArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: SaveInfoArgs = parse_args(args)?;
        self.kb.append_profile(&args.content)?;
        Ok("Recorded in the profile file.".into())
    }
}
