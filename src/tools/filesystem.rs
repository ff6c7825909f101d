//! 沙箱文件系统网关
//!
//! SafeFs 绑定一个根目录，read / write / list 都必须解析到根目录之下；
//! write 在任何解析之前先拒绝空路径、含 `..` 的路径与绝对路径，再做规范化前缀校验（防符号链接逃逸），
//! 拒绝空白内容，自动创建父目录后整文件覆盖写入。本网关不提供删除操作。
//! ListFilesTool / ReadFileTool / WriteFileTool 基于 SafeFs 暴露给模型。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::memory::ArgMap;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolOutput};

/// 沙箱文件操作错误；Display 文本直接作为工具结果返回给模型
#[derive(Error, Debug)]
pub enum FsError {
    #[error("Sandbox violation: '{0}' is outside the workspace. Use a relative path inside it (e.g. main.py, src/hello.py).")]
    SandboxViolation(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("content is empty. Put the complete file content into `content` and call write_file again.")]
    EmptyContent,

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 沙箱文件系统：绑定根目录，所有路径经解析校验必须位于根目录下
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    /// 打开（必要时创建）根目录并规范化
    pub fn open(root_dir: impl AsRef<Path>) -> Result<Self, FsError> {
        let root = root_dir.as_ref();
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root_dir: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析已存在的路径；空路径或 "." 表示根目录本身
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let path = path.trim();
        let rel = path.trim_start_matches("./");
        if rel.is_empty() || rel == "." {
            return Ok(self.root_dir.clone());
        }
        let canonical = self.root_dir.join(rel).canonicalize().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::NotFound(path.to_string())
            } else {
                FsError::Io(e)
            }
        })?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(FsError::SandboxViolation(path.to_string()))
        }
    }

    /// write 的前置检查：不做任何解析与 I/O
    fn check_write_path(path: &str) -> Result<&str, FsError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(FsError::InvalidPath("filename is empty".to_string()));
        }
        if trimmed.contains("..")
            || trimmed.starts_with('/')
            || trimmed.starts_with('\\')
            || Path::new(trimmed).is_absolute()
        {
            return Err(FsError::SandboxViolation(path.to_string()));
        }
        Ok(trimmed.trim_start_matches("./"))
    }

    /// 解析（可能尚不存在的）写入目标：取最深的已存在祖先做规范化，再拼回剩余部分，
    /// 结果必须严格位于根目录之下
    fn resolve_for_write(&self, rel: &str) -> Result<PathBuf, FsError> {
        let full = self.root_dir.join(rel);
        let existing = full
            .ancestors()
            .find(|p| p.exists())
            .ok_or_else(|| FsError::SandboxViolation(rel.to_string()))?;
        let suffix = full
            .strip_prefix(existing)
            .map_err(|_| FsError::SandboxViolation(rel.to_string()))?
            .to_path_buf();
        let resolved = existing.canonicalize()?.join(suffix);
        if resolved.starts_with(&self.root_dir) && resolved != self.root_dir {
            Ok(resolved)
        } else {
            Err(FsError::SandboxViolation(rel.to_string()))
        }
    }

    pub fn read(&self, path: &str) -> Result<String, FsError> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(FsError::InvalidPath(format!("'{}' is a directory", path.trim())));
        }
        Ok(std::fs::read_to_string(&resolved)?)
    }

    /// 整文件覆盖写入，返回写入的字节数
    pub fn write(&self, path: &str, content: &str) -> Result<usize, FsError> {
        let rel = Self::check_write_path(path)?;
        let target = self.resolve_for_write(rel)?;
        if content.trim().is_empty() {
            return Err(FsError::EmptyContent);
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
            // 创建目录后再校验一次，防止中途被替换为指向外部的链接
            if !parent.canonicalize()?.starts_with(&self.root_dir) {
                return Err(FsError::SandboxViolation(path.to_string()));
            }
        }
        if target.is_dir() {
            return Err(FsError::InvalidPath(format!("'{}' is a directory", rel)));
        }
        std::fs::write(&target, content)?;
        Ok(content.len())
    }

    /// 列出目录（不含隐藏文件），子目录以 "/" 结尾，按名称排序
    pub fn list(&self, path: &str) -> Result<Vec<String>, FsError> {
        let base = self.resolve(path)?;
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)? {
            let e = e?;
            let name = e.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let suffix = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                "/"
            } else {
                ""
            };
            entries.push(format!("{}{}", name, suffix));
        }
        entries.sort();
        Ok(entries)
    }
}

#[derive(Deserialize, JsonSchema)]
struct ListFilesArgs {
    /// Directory relative to the workspace; defaults to the workspace root
    path: Option<String>,
}

/// list_files：列出沙箱目录
pub struct ListFilesTool {
    fs: SafeFs,
}

impl ListFilesTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the files in the project workspace."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ListFilesArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: ListFilesArgs = parse_args(args)?;
        let path = args.path.unwrap_or_default();
        tracing::info!(path = %path, "list_files tool execute");
        let entries = self.fs.list(&path).map_err(|e| e.to_string())?;
        if entries.is_empty() {
            Ok("Files: (none)".into())
        } else {
            Ok(format!("Files: {}", entries.join(", ")).into())
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct ReadFileArgs {
    /// File path relative to the workspace
    filename: String,
}

/// read_file：读取沙箱内文件
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the project workspace."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ReadFileArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: ReadFileArgs = parse_args(args)?;
        tracing::info!(filename = %args.filename, "read_file tool execute");
        self.fs
            .read(&args.filename)
            .map(ToolOutput::from)
            .map_err(|e| e.to_string())
    }
}

#[derive(Deserialize, JsonSchema)]
struct WriteFileArgs {
    /// Relative path inside the workspace, e.g. main.py
    filename: String,
    /// The complete file content
    content: String,
}

/// write_file：在沙箱内新建或覆盖文件
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a program or text file in the project workspace. Always pass the complete code in `content` \
         instead of writing it in the reply. filename is a relative path such as main.py. After writing a script, run it \
         with run_script to verify it."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<WriteFileArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: WriteFileArgs = parse_args(args)?;
        tracing::info!(filename = %args.filename, bytes = args.content.len(), "write_file tool execute");
        let bytes = self
            .fs
            .write(&args.filename, &args.content)
            .map_err(|e| e.to_string())?;
        Ok(format!("Saved {} to the workspace ({} bytes).", args.filename.trim(), bytes).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sandbox() -> (tempfile::TempDir, SafeFs) {
        let dir = tempfile::tempdir().unwrap();
        let fs = SafeFs::open(dir.path().join("root")).unwrap();
        (dir, fs)
    }

    fn args(v: Value) -> ArgMap {
        match v {
            Value::Object(m) => m,
            _ => ArgMap::new(),
        }
    }

    #[test]
    fn test_write_rejects_escaping_paths() {
        let (dir, fs) = sandbox();
        for bad in [
            "../../etc/passwd",
            "../outside.txt",
            "src/../../x.txt",
            "..",
            "/etc/passwd",
            "/tmp/x.txt",
            "a/..b",
        ] {
            let err = fs.write(bad, "x").unwrap_err();
            assert!(matches!(err, FsError::SandboxViolation(_)), "{bad}: {err:?}");
        }
        assert!(!dir.path().join("outside.txt").exists());
        assert!(!dir.path().join("x.txt").exists());
        assert!(fs.list("").unwrap().is_empty());
    }

    #[test]
    fn test_write_rejects_empty_path_and_content() {
        let (_dir, fs) = sandbox();
        assert!(matches!(fs.write("", "x").unwrap_err(), FsError::InvalidPath(_)));
        assert!(matches!(fs.write("a.py", "").unwrap_err(), FsError::EmptyContent));
        assert!(matches!(fs.write("a.py", "   \n\t").unwrap_err(), FsError::EmptyContent));
        assert!(matches!(fs.write("new/dir/a.py", "  ").unwrap_err(), FsError::EmptyContent));
        assert!(!fs.root().join("a.py").exists());
        assert!(!fs.root().join("new").exists());
    }

    #[test]
    fn test_write_creates_dirs_and_overwrites() {
        let (_dir, fs) = sandbox();
        fs.write("src/hello.py", "print(1)").unwrap();
        fs.write("./src/hello.py", "print(2)").unwrap();
        assert_eq!(fs.read("src/hello.py").unwrap(), "print(2)");
        assert_eq!(fs.list("").unwrap(), vec!["src/"]);
        assert_eq!(fs.list("src").unwrap(), vec!["hello.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let (dir, fs) = sandbox();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, fs.root().join("link")).unwrap();

        let err = fs.write("link/evil.txt", "x").unwrap_err();
        assert!(matches!(err, FsError::SandboxViolation(_)));
        assert!(!outside.join("evil.txt").exists());

        std::fs::write(outside.join("secret.txt"), "s").unwrap();
        assert!(matches!(fs.read("link/secret.txt").unwrap_err(), FsError::SandboxViolation(_)));
        assert!(matches!(fs.list("link").unwrap_err(), FsError::SandboxViolation(_)));
    }

    #[test]
    fn test_read_outside_root_is_rejected() {
        let (dir, fs) = sandbox();
        std::fs::write(dir.path().join("secret.txt"), "s").unwrap();
        assert!(matches!(fs.read("../secret.txt").unwrap_err(), FsError::SandboxViolation(_)));
        assert!(matches!(fs.read("missing.txt").unwrap_err(), FsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_write_tool_texts() {
        let (_dir, fs) = sandbox();
        let tool = WriteFileTool::new(fs.clone());

        let ok = tool
            .execute(args(json!({"filename": "hello.py", "content": "print(42)"})))
            .await
            .unwrap();
        assert!(ok.text.starts_with("Saved hello.py"));

        let empty = tool
            .execute(args(json!({"filename": "blank.py", "content": "  "})))
            .await
            .unwrap_err();
        assert!(empty.contains("content is empty"));
        assert_ne!(empty, ok.text);

        let missing = tool.execute(args(json!({"filename": "x.py"}))).await.unwrap_err();
        assert!(missing.contains("content"));

        let list = ListFilesTool::new(fs).execute(ArgMap::new()).await.unwrap();
        assert_eq!(list.text, "Files: hello.py");
    }
}
