//! 进程监管：带截止时间的子进程执行
//!
//! - 阻塞模式：运行到结束或截止时间，分别捕获 stdout / stderr
//! - 流式模式：逐行读取输出，立即转发到监控通道（尽力而为），同时缓存全部行
//! - 截止时间对整个操作计算（绝对时间点），不会因为持续有输出而被重置
//! - 子进程在 Unix 上独占一个进程组；超时后向整个组发送 SIGKILL 并 await 子进程，
//!   派生出的孙进程一并终止，返回超时结果与已收到的部分输出
//! - 流式转发到监控通道同样受截止时间约束，慢的 sink 不会拖长整个操作
//!
//! RunScriptTool 只执行沙箱根目录下、指定扩展名的脚本；ShellTool（run_shell_command）不做任何沙箱限制，
//! 只应注册给受信任的调用方。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout_at;

use crate::memory::ArgMap;
use crate::observability::Monitor;
use crate::tools::filesystem::{FsError, SafeFs};
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolOutput};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to start process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 进程结束方式；Exited(None) 表示被信号终止
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Exited(Option<i32>),
    TimedOut,
}

/// 一次受监管执行的结果
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub stdout: String,
    pub stderr: String,
    pub pid: Option<u32>,
    pub limit: Duration,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.status == ProcessStatus::Exited(Some(0))
    }

    pub fn timed_out(&self) -> bool {
        self.status == ProcessStatus::TimedOut
    }

    fn exit_code_text(code: Option<i32>) -> String {
        match code {
            Some(c) => c.to_string(),
            None => "terminated by signal".to_string(),
        }
    }

    fn partial_output(&self) -> String {
        let mut parts = Vec::new();
        if !self.stdout.trim().is_empty() {
            parts.push(self.stdout.trim_end().to_string());
        }
        if !self.stderr.trim().is_empty() {
            parts.push(self.stderr.trim_end().to_string());
        }
        parts.join("\n")
    }

    /// 脚本执行结果文本：非零退出码作为普通结果返回，供模型检查后继续
    pub fn render_script(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match self.status {
            ProcessStatus::Exited(Some(0)) => {
                let mut text = format!("stdout:\n{}", out);
                if !err.is_empty() {
                    text.push_str(&format!("\nstderr:\n{}", err));
                }
                text
            }
            ProcessStatus::Exited(code) => format!(
                "Exit code: {}\nstdout:\n{}\nstderr:\n{}",
                Self::exit_code_text(code),
                out,
                err
            ),
            ProcessStatus::TimedOut => format!(
                "Error: execution timed out after {}s.\n{}",
                self.limit.as_secs(),
                self.partial_output()
            )
            .trim_end()
            .to_string(),
        }
    }

    /// Shell 命令结果文本
    pub fn render_shell(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match self.status {
            ProcessStatus::Exited(Some(0)) => {
                if out.is_empty() && err.is_empty() {
                    "Command finished.".to_string()
                } else if err.is_empty() {
                    format!("Command finished.\nstdout:\n{}", out)
                } else {
                    format!("Command finished.\nstdout:\n{}\nstderr:\n{}", out, err)
                }
            }
            ProcessStatus::Exited(code) => format!("Exit code {}\n{}\n{}", Self::exit_code_text(code), err, out)
                .trim()
                .to_string(),
            ProcessStatus::TimedOut => format!(
                "Error: command timed out after {}s.\n{}",
                self.limit.as_secs(),
                self.partial_output()
            )
            .trim_end()
            .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// 阻塞模式：不转发输出
pub async fn run_blocking(cmd: Command, limit: Duration) -> Result<ProcessOutcome, ProcessError> {
    supervise(cmd, limit, None).await
}

/// 流式模式：每行输出立即写入 monitor
pub async fn run_streaming(
    cmd: Command,
    limit: Duration,
    monitor: &Monitor,
) -> Result<ProcessOutcome, ProcessError> {
    supervise(cmd, limit, Some(monitor)).await
}

/// 通过 `sh -c`（Windows 为 `cmd /C`）执行任意命令行。
///
/// 不做路径或参数的沙箱检查，只能暴露给受信任的调用方。
pub async fn run_shell(command: &str, cwd: &Path, limit: Duration) -> Result<ProcessOutcome, ProcessError> {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    };
    cmd.current_dir(cwd);
    run_blocking(cmd, limit).await
}

async fn supervise(
    mut cmd: Command,
    limit: Duration,
    monitor: Option<&Monitor>,
) -> Result<ProcessOutcome, ProcessError> {
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + limit;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    let mut child = cmd.spawn().map_err(ProcessError::Spawn)?;
    let pid = child.id();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut readers = Vec::new();
    if let Some(out) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(out, Stream::Stdout, tx.clone())));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(err, Stream::Stderr, tx.clone())));
    }
    drop(tx);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut expired = false;
    loop {
        match timeout_at(deadline, rx.recv()).await {
            Ok(Some((stream, line))) => {
                let label = if stream == Stream::Stdout { "stdout" } else { "stderr" };
                let forwarded = match monitor {
                    Some(m) => timeout_at(deadline, m.record(label, &line)).await.is_ok(),
                    None => true,
                };
                match stream {
                    Stream::Stdout => stdout.push(line),
                    Stream::Stderr => stderr.push(line),
                }
                if !forwarded {
                    expired = true;
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => {
                expired = true;
                break;
            }
        }
    }

    let mut exit = None;
    if !expired {
        if let Ok(status) = timeout_at(deadline, child.wait()).await {
            exit = Some(status?);
        }
    }

    let status = match exit {
        Some(s) => ProcessStatus::Exited(s.code()),
        None => {
            terminate(&mut child, pid).await;
            while let Ok((stream, line)) = rx.try_recv() {
                match stream {
                    Stream::Stdout => stdout.push(line),
                    Stream::Stderr => stderr.push(line),
                }
            }
            ProcessStatus::TimedOut
        }
    };
    for r in readers {
        r.abort();
    }

    Ok(ProcessOutcome {
        status,
        stdout: stdout.join("\n"),
        stderr: stderr.join("\n"),
        pid,
        limit,
        elapsed: started.elapsed(),
    })
}

/// 终止整个进程组，再 kill 并等待回收直接子进程
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pid {
        kill_group(pgid);
    }
    if let Err(e) = child.kill().await {
        tracing::warn!(pid = ?pid, error = %e, "kill failed");
        let _ = child.wait().await;
    }
    tracing::warn!(pid = ?pid, "process killed after deadline");
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg 只发送信号，不触碰本进程内存；pgid 是自己 spawn 的进程组
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(pgid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: Stream,
    tx: mpsc::UnboundedSender<(Stream, String)>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
        }
    }
}

/// run_script 的配置
#[derive(Debug, Clone)]
pub struct ScriptSettings {
    pub interpreter: String,
    /// 不含点
    pub extension: String,
    pub limit: Duration,
    pub stream: bool,
}

impl ScriptSettings {
    pub fn from_config(cfg: &crate::config::ToolsSection) -> Self {
        Self {
            interpreter: cfg.script_interpreter.clone(),
            extension: cfg.script_extension.trim_start_matches('.').to_string(),
            limit: Duration::from_secs(cfg.script_timeout_secs),
            stream: cfg.stream_script_output,
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct RunScriptArgs {
    /// Script path relative to the workspace, e.g. main.py
    filename: String,
}

/// run_script：在沙箱根目录执行脚本
pub struct RunScriptTool {
    fs: SafeFs,
    settings: ScriptSettings,
    monitor: Monitor,
    description: String,
}

impl RunScriptTool {
    pub fn new(fs: SafeFs, settings: ScriptSettings, monitor: Monitor) -> Self {
        let description = format!(
            "Run a .{} file in the project workspace and return its stdout and stderr. Use it to verify code after \
             write_file. Times out after {} seconds.",
            settings.extension,
            settings.limit.as_secs()
        );
        Self {
            fs,
            settings,
            monitor,
            description,
        }
    }

    /// 解析并校验脚本路径：必须在根目录内、为已存在的文件、扩展名匹配
    fn script_path(&self, filename: &str) -> Result<PathBuf, String> {
        let name = filename.trim();
        if name.is_empty() {
            return Err("filename is empty".to_string());
        }
        if name.contains("..") || Path::new(name).is_absolute() {
            return Err("scripts outside the workspace cannot be run.".to_string());
        }
        let ext_ok = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case(&self.settings.extension))
            .unwrap_or(false);
        if !ext_ok {
            return Err(format!("only .{} files can be run.", self.settings.extension));
        }
        let path = self.fs.resolve(name).map_err(|e| match e {
            FsError::NotFound(_) => format!("file not found: {}", name),
            FsError::SandboxViolation(_) => "scripts outside the workspace cannot be run.".to_string(),
            other => other.to_string(),
        })?;
        if !path.is_file() {
            return Err(format!("file not found: {}", name));
        }
        Ok(path)
    }
}

#[async_trait]
impl Tool for RunScriptTool {
    fn name(&self) -> &str {
        "run_script"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<RunScriptArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: RunScriptArgs = parse_args(args)?;
        let path = self.script_path(&args.filename)?;
        tracing::info!(script = %path.display(), stream = self.settings.stream, "run_script tool execute");

        let mut cmd = Command::new(&self.settings.interpreter);
        cmd.arg(&path)
            .current_dir(self.fs.root())
            .env("PYTHONUNBUFFERED", "1");

        let outcome = if self.settings.stream {
            run_streaming(cmd, self.settings.limit, &self.monitor).await
        } else {
            run_blocking(cmd, self.settings.limit).await
        }
        .map_err(|e| e.to_string())?;

        Ok(outcome.render_script().into())
    }
}

#[derive(Deserialize, JsonSchema)]
struct ShellArgs {
    /// Command line to execute, e.g. `open -a Safari`
    command: String,
}

/// run_shell_command：在仓库根目录执行任意命令，无沙箱，仅限受信任调用方
pub struct ShellTool {
    cwd: PathBuf,
    limit: Duration,
}

impl ShellTool {
    pub fn new(cwd: impl Into<PathBuf>, limit: Duration) -> Self {
        Self {
            cwd: cwd.into(),
            limit,
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn description(&self) -> &str {
        "Run a shell command on this machine (launch applications, open URLs, terminal operations). \
         Returns stdout and stderr."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ShellArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: ShellArgs = parse_args(args)?;
        let command = args.command.trim();
        if command.is_empty() {
            return Err("specify the command to run.".to_string());
        }
        tracing::info!(command = %command, "run_shell_command tool execute");
        let outcome = run_shell(command, &self.cwd, self.limit)
            .await
            .map_err(|e| e.to_string())?;
        Ok(outcome.render_shell().into())
    }
}
