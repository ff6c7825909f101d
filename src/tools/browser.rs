//! 浏览器自动化工具：browser_navigate / browser_click / browser_input / browser_screenshot
//!
//! 每次调用启动一个 Headless Chrome，打开 URL 执行一个动作后关闭（headless_chrome 为同步 API，
//! 放在 spawn_blocking 中执行）。需启用 feature "browser" 且系统已安装 Chrome/Chromium；
//! 未启用时四个工具仍然注册，调用返回说明文本。截图保存在临时目录，作为产物交给调用方转发。

use std::path::PathBuf;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::memory::ArgMap;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolOutput};

/// navigate 返回正文的最大字符数
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
const PAGE_TEXT_MAX_CHARS: usize = 6000;

/// 单次浏览器动作
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserAction {
    Navigate,
    Click { selector: String },
    Input { selector: String, text: String },
    Screenshot,
}

fn check_url(url: &str) -> Result<String, String> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Err("specify a valid URL (http:// or https://).".to_string())
    }
}

fn check_selector(selector: &str) -> Result<String, String> {
    let selector = selector.trim();
    if selector.is_empty() {
        Err("specify a CSS selector (e.g. button.submit, #login).".to_string())
    } else {
        Ok(selector.to_string())
    }
}

/// 截图文件路径：临时目录下唯一文件名
pub fn screenshot_path() -> PathBuf {
    std::env::temp_dir().join(format!("pilot_screenshot_{}.png", uuid::Uuid::new_v4()))
}

async fn perform(url: String, action: BrowserAction) -> Result<ToolOutput, String> {
    tracing::info!(url = %url, action = ?action, "browser tool execute");
    tokio::task::spawn_blocking(move || driver::perform_blocking(&url, action))
        .await
        .map_err(|e| format!("browser task failed: {}", e))?
}

#[cfg(feature = "browser")]
mod driver {
    use std::sync::Arc;
    use std::time::Duration;

    use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
    use headless_chrome::{Browser, LaunchOptions, Tab};

    use super::{screenshot_path, BrowserAction, PAGE_TEXT_MAX_CHARS};
    use crate::tools::ToolOutput;

    fn open(url: &str) -> Result<(Browser, Arc<Tab>), String> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .build()
            .map_err(|e| format!("Chrome launch failed: {}", e))?;
        let browser = Browser::new(options).map_err(|e| format!("Chrome launch failed: {}. Install Chrome/Chromium.", e))?;
        let tab = browser.new_tab().map_err(|e| format!("browser tab failed: {}", e))?;
        tab.navigate_to(url)
            .map_err(|e| format!("navigate failed: {}", e))?
            .wait_until_navigated()
            .map_err(|e| format!("page load failed: {}", e))?;
        tab.wait_for_element("body")
            .map_err(|e| format!("page load failed: {}", e))?;
        Ok((browser, tab))
    }

    pub(super) fn perform_blocking(url: &str, action: BrowserAction) -> Result<ToolOutput, String> {
        // browser 在函数结束时 drop，Chrome 进程随之退出
        let (_browser, tab) = open(url)?;
        match action {
            BrowserAction::Navigate => {
                let title = tab.get_title().unwrap_or_default();
                let body = tab
                    .find_element("body")
                    .and_then(|el| el.get_inner_text())
                    .map_err(|e| format!("read page failed: {}", e))?;
                let mut text: String = body.chars().take(PAGE_TEXT_MAX_CHARS).collect();
                if body.chars().count() > PAGE_TEXT_MAX_CHARS {
                    text.push_str("\n…(truncated)");
                }
                Ok(if !title.is_empty() {
                    format!("Title: {}\n\n{}", title, text).into()
                } else if text.trim().is_empty() {
                    "(no body text)".into()
                } else {
                    text.into()
                })
            }
            BrowserAction::Click { selector } => {
                tab.wait_for_element(&selector)
                    .map_err(|e| format!("element not found: {}", e))?
                    .click()
                    .map_err(|e| format!("click failed: {}", e))?;
                std::thread::sleep(Duration::from_secs(1));
                let title = tab.get_title().unwrap_or_default();
                Ok(format!("Clicked. Current title: {}", title).into())
            }
            BrowserAction::Input { selector, text } => {
                let el = tab
                    .wait_for_element(&selector)
                    .map_err(|e| format!("element not found: {}", e))?;
                el.call_js_fn("function() { this.value = ''; }", vec![], false)
                    .map_err(|e| format!("clear failed: {}", e))?;
                el.click().map_err(|e| format!("focus failed: {}", e))?;
                el.type_into(&text).map_err(|e| format!("input failed: {}", e))?;
                Ok("Text entered.".into())
            }
            BrowserAction::Screenshot => {
                let png = tab
                    .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                    .map_err(|e| format!("screenshot failed: {}", e))?;
                let path = screenshot_path();
                std::fs::write(&path, png).map_err(|e| format!("save screenshot failed: {}", e))?;
                Ok(ToolOutput::text(format!("Screenshot taken: {}", path.display()))
                    .with_artifact(path, format!("Screenshot of {}", url)))
            }
        }
    }
}

#[cfg(not(feature = "browser"))]
mod driver {
    use super::BrowserAction;
    use crate::tools::ToolOutput;

    pub(super) fn perform_blocking(_url: &str, _action: BrowserAction) -> Result<ToolOutput, String> {
        Err("browser automation is unavailable: this build was compiled without the `browser` feature.".to_string())
    }
}

#[derive(Deserialize, JsonSchema)]
struct NavigateArgs {
    /// Page URL
    url: String,
}

pub struct BrowserNavigateTool;

#[async_trait]
impl Tool for BrowserNavigateTool {
    fn name(&self) -> &str {
        "browser_navigate"
    }

    fn description(&self) -> &str {
        "Open a URL in a headless browser and return the page title and body text after JavaScript rendering. \
         Use it for dynamic pages that fetch_webpage cannot read."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<NavigateArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: NavigateArgs = parse_args(args)?;
        perform(check_url(&args.url)?, BrowserAction::Navigate).await
    }
}

#[derive(Deserialize, JsonSchema)]
struct ClickArgs {
    /// Page URL
    url: String,
    /// CSS selector of the element to click, e.g. button.submit or #login
    selector: String,
}

pub struct BrowserClickTool;

#[async_trait]
impl Tool for BrowserClickTool {
    fn name(&self) -> &str {
        "browser_click"
    }

    fn description(&self) -> &str {
        "Open a URL in a headless browser and click the element matching a CSS selector."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ClickArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: ClickArgs = parse_args(args)?;
        let url = check_url(&args.url)?;
        let selector = check_selector(&args.selector)?;
        perform(url, BrowserAction::Click { selector }).await
    }
}

#[derive(Deserialize, JsonSchema)]
struct InputArgs {
    /// Page URL
    url: String,
    /// CSS selector of the input element
    selector: String,
    /// Text to enter
    text: String,
}

pub struct BrowserInputTool;

#[async_trait]
impl Tool for BrowserInputTool {
    fn name(&self) -> &str {
        "browser_input"
    }

    fn description(&self) -> &str {
        "Open a URL in a headless browser and type text into the element matching a CSS selector."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<InputArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: InputArgs = parse_args(args)?;
        let url = check_url(&args.url)?;
        let selector = check_selector(&args.selector)?;
        perform(url, BrowserAction::Input { selector, text: args.text }).await
    }
}

pub struct BrowserScreenshotTool;

#[async_trait]
impl Tool for BrowserScreenshotTool {
    fn name(&self) -> &str {
        "browser_screenshot"
    }

    fn description(&self) -> &str {
        "Open a URL in a headless browser and take a screenshot. The image is sent to the user."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<NavigateArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: NavigateArgs = parse_args(args)?;
        perform(check_url(&args.url)?, BrowserAction::Screenshot).await
    }
}
