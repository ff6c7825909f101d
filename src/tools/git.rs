//! save_to_git：提交仓库根目录的全部变更并推送
//!
//! 仓库未初始化时先 git init，配置了 remote_url 则添加为 origin；然后 git add -A、git commit，
//! 有 origin 时推送 main，失败再尝试 master。每条 git 命令都经过进程监管，带各自的截止时间。

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::memory::ArgMap;
use crate::tools::process::{run_blocking, ProcessOutcome};
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolOutput};

const DEFAULT_COMMIT_MESSAGE: &str = "Update from pilot";
const COMMIT_MESSAGE_MAX_CHARS: usize = 200;

const SHORT_GIT_TIMEOUT: Duration = Duration::from_secs(10);
const ADD_TIMEOUT: Duration = Duration::from_secs(30);
const PUSH_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SaveToGitTool {
    repo_root: PathBuf,
    remote_url: Option<String>,
}

impl SaveToGitTool {
    pub fn new(repo_root: impl Into<PathBuf>, remote_url: Option<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            remote_url,
        }
    }

    async fn git(&self, args: &[&str], limit: Duration) -> Result<ProcessOutcome, String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.repo_root);
        let outcome = run_blocking(cmd, limit).await.map_err(|e| match e {
            crate::tools::process::ProcessError::Spawn(_) => "git command not found.".to_string(),
            other => other.to_string(),
        })?;
        if outcome.timed_out() {
            return Err(format!("git {} timed out.", args.first().copied().unwrap_or("")));
        }
        Ok(outcome)
    }

    /// 需要成功的 git 命令；失败时返回 "git <cmd> failed: ..."
    async fn git_ok(&self, args: &[&str], limit: Duration) -> Result<ProcessOutcome, String> {
        let outcome = self.git(args, limit).await?;
        if outcome.success() {
            Ok(outcome)
        } else {
            Err(format!("git {} failed: {}", args[0], failure_text(&outcome)))
        }
    }

    async fn save(&self, message: &str) -> Result<String, String> {
        if !self.repo_root.join(".git").exists() {
            self.git_ok(&["init"], SHORT_GIT_TIMEOUT).await?;
            if let Some(url) = &self.remote_url {
                let added = self.git(&["remote", "add", "origin", url], SHORT_GIT_TIMEOUT).await?;
                if !added.success() && !added.stderr.contains("already exists") {
                    return Err(format!("git remote add failed: {}", failure_text(&added)));
                }
            }
        }

        self.git_ok(&["add", "-A"], ADD_TIMEOUT).await?;

        let commit = self.git(&["commit", "-m", message], SHORT_GIT_TIMEOUT).await?;
        if !commit.success() {
            if commit.stdout.contains("nothing to commit") || commit.stderr.contains("nothing to commit") {
                return Ok("No changes to commit; already up to date.".to_string());
            }
            return Err(format!("git commit failed: {}", failure_text(&commit)));
        }

        let remotes = self.git_ok(&["remote"], SHORT_GIT_TIMEOUT).await?;
        if !remotes.stdout.lines().any(|r| r.trim() == "origin") {
            return Ok(format!("Committed locally (no origin remote configured). commit: {}", message));
        }

        let pushed = self.git(&["push", "-u", "origin", "main"], PUSH_TIMEOUT).await?;
        if !pushed.success() {
            tracing::warn!(stderr = %pushed.stderr, "push to main failed, trying master");
            self.git_ok(&["push", "-u", "origin", "master"], PUSH_TIMEOUT).await?;
        }
        let target = self.remote_url.as_deref().unwrap_or("origin");
        Ok(format!("Saved to {} (commit: {})", target, message))
    }
}

fn failure_text(outcome: &ProcessOutcome) -> String {
    if outcome.stderr.trim().is_empty() {
        outcome.stdout.trim().to_string()
    } else {
        outcome.stderr.trim().to_string()
    }
}

/// 空消息使用默认值，超长截断
fn commit_message(input: Option<&str>) -> String {
    let msg = input.map(str::trim).filter(|m| !m.is_empty()).unwrap_or(DEFAULT_COMMIT_MESSAGE);
    msg.chars().take(COMMIT_MESSAGE_MAX_CHARS).collect()
}

#[derive(Deserialize, JsonSchema)]
struct SaveToGitArgs {
    /// Optional commit message
    commit_message: Option<String>,
}

#[async_trait]
impl Tool for SaveToGitTool {
    fn name(&self) -> &str {
        "save_to_git"
    }

    fn description(&self) -> &str {
        "Commit all changes in the repository and push them to the remote. Use it when the user asks to save \
         the changes. commit_message is optional."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<SaveToGitArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: SaveToGitArgs = parse_args(args)?;
        let message = commit_message(args.commit_message.as_deref());
        tracing::info!(repo = %self.repo_root.display(), message = %message, "save_to_git tool execute");
        self.save(&message).await.map(ToolOutput::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_message_defaults_and_truncates() {
        assert_eq!(commit_message(None), DEFAULT_COMMIT_MESSAGE);
        assert_eq!(commit_message(Some("  ")), DEFAULT_COMMIT_MESSAGE);
        assert_eq!(commit_message(Some(" fix ")), "fix");
        assert_eq!(commit_message(Some(&"a".repeat(300))).len(), COMMIT_MESSAGE_MAX_CHARS);
    }

    #[tokio::test]
    async fn test_empty_repo_has_nothing_to_commit() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SaveToGitTool::new(dir.path(), None);
        match tool.execute(ArgMap::new()).await {
            Ok(out) => {
                assert_eq!(out.text, "No changes to commit; already up to date.");
                assert!(dir.path().join(".git").exists());
            }
            // 没有安装 git 的环境
            Err(e) => assert_eq!(e, "git command not found."),
        }
    }
}
