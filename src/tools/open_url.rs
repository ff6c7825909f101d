//! 在本机浏览器中打开 URL：open_in_browser（系统默认浏览器）与 open_in_chrome

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::memory::ArgMap;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolOutput};

/// 启动器在此时间内未退出即视为已启动（浏览器进程可能常驻）
const LAUNCH_GRACE: Duration = Duration::from_secs(8);

const SITE_SHORTHANDS: &[(&str, &str)] = &[
    ("youtube", "https://www.youtube.com"),
    ("yt", "https://www.youtube.com"),
    ("google", "https://www.google.com"),
    ("github", "https://github.com"),
];

/// 启动外部程序；进程非零退出或无法启动时返回错误
async fn launch(program: &str, args: &[&str]) -> Result<(), String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("{}: {}", program, e))?;
    match tokio::time::timeout(LAUNCH_GRACE, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(format!("{} exited with {}", program, status)),
        Ok(Err(e)) => Err(format!("{}: {}", program, e)),
        Err(_) => Ok(()),
    }
}

/// 依次尝试候选命令，返回第一个成功的；全部失败时返回最后一个错误
async fn launch_first(candidates: &[(&str, Vec<&str>)]) -> Result<(), String> {
    let mut last_err = "no launcher available".to_string();
    for (program, args) in candidates {
        match launch(program, args).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(program = %program, error = %e, "launcher failed");
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// 站点简称展开为完整 URL，裸域名补 https://，空串打开 Google
pub fn normalize_chrome_url(input: &str) -> String {
    let u = input.trim();
    if u.starts_with("http://") || u.starts_with("https://") {
        return u.to_string();
    }
    let key = u.to_lowercase().replace(' ', "");
    if let Some((_, url)) = SITE_SHORTHANDS.iter().find(|(name, _)| *name == key) {
        return url.to_string();
    }
    if u.is_empty() {
        "https://www.google.com".to_string()
    } else {
        format!("https://{}", u)
    }
}

#[derive(Deserialize, JsonSchema)]
struct OpenArgs {
    /// URL to open (http:// or https://)
    url: String,
}

/// open_in_browser：用系统默认浏览器打开
pub struct OpenInBrowserTool;

#[async_trait]
impl Tool for OpenInBrowserTool {
    fn name(&self) -> &str {
        "open_in_browser"
    }

    fn description(&self) -> &str {
        "Open a URL in the default browser on this machine."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<OpenArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: OpenArgs = parse_args(args)?;
        let url = args.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err("specify a valid URL (http:// or https://).".to_string());
        }
        tracing::info!(url = %url, "open_in_browser tool execute");
        let candidates: Vec<(&str, Vec<&str>)> = if cfg!(target_os = "macos") {
            vec![("open", vec![url])]
        } else if cfg!(target_os = "windows") {
            vec![("cmd", vec!["/C", "start", "", url])]
        } else {
            vec![("xdg-open", vec![url])]
        };
        launch_first(&candidates).await?;
        Ok(format!("Opened in the browser: {}", url).into())
    }
}

#[derive(Deserialize, JsonSchema)]
struct ChromeArgs {
    /// URL, bare host, or a site name such as youtube or github
    url: String,
}

/// open_in_chrome：用 Google Chrome 打开
pub struct OpenInChromeTool;

#[async_trait]
impl Tool for OpenInChromeTool {
    fn name(&self) -> &str {
        "open_in_chrome"
    }

    fn description(&self) -> &str {
        "Open a URL in Google Chrome on this machine. Accepts site names such as youtube, google or github."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ChromeArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: ChromeArgs = parse_args(args)?;
        let url = normalize_chrome_url(&args.url);
        tracing::info!(url = %url, "open_in_chrome tool execute");
        let u = url.as_str();
        let candidates: Vec<(&str, Vec<&str>)> = if cfg!(target_os = "macos") {
            vec![("open", vec!["-a", "Google Chrome", u])]
        } else if cfg!(target_os = "windows") {
            vec![("cmd", vec!["/C", "start", "", "chrome", u])]
        } else {
            vec![
                ("google-chrome", vec![u]),
                ("google-chrome-stable", vec![u]),
                ("chromium", vec![u]),
                ("chromium-browser", vec![u]),
            ]
        };
        launch_first(&candidates)
            .await
            .map_err(|e| format!("could not open Chrome: {}", e))?;
        Ok(format!("Opened in Chrome: {}", url).into())
    }
}
