pub mod browser;
pub mod executor;
pub mod filesystem;
pub mod git;
pub mod open_url;
pub mod process;
pub mod registry;
pub mod schema;
pub mod screen;
pub mod search;
pub mod skills;

pub use browser::{BrowserClickTool, BrowserInputTool, BrowserNavigateTool, BrowserScreenshotTool};
pub use executor::ToolExecutor;
pub use filesystem::{FsError, ListFilesTool, ReadFileTool, SafeFs, WriteFileTool};
pub use git::SaveToGitTool;
pub use open_url::{OpenInBrowserTool, OpenInChromeTool};
pub use process::{
    run_blocking, run_shell, run_streaming, ProcessError, ProcessOutcome, ProcessStatus, RunScriptTool,
    ScriptSettings, ShellTool,
};
pub use registry::{Artifact, DispatchError, Tool, ToolDescriptor, ToolOutput, ToolRegistry, UNKNOWN_TOOL};
pub use schema::{parameters_for, parse_args};
pub use screen::{DesktopCapture, NoCapture, ScreenCapture, SCREEN_CAPTION};
pub use search::{FetchWebpageTool, WebSearchTool};
pub use skills::{
    KnowledgeBase, ListSkillsTool, ReadProfileTool, ReadSkillTool, SaveProfileTool, SaveSkillTool,
};
