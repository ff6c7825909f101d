//! Web 工具：fetch_webpage 与 web_search
//!
//! fetch_webpage 只接受 http/https，GET 带超时与 User-Agent；HTML 用 html2text 提取可读文本，
//! 超过 max_result_chars 时截断并追加 "\n…(truncated)"。
//! web_search 请求 DuckDuckGo 的 HTML 端点，用正则提取标题 / 链接 / 摘要，返回编号列表。

use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::{Client, Url};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::config::WebSection;
use crate::memory::ArgMap;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolOutput};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const DUCKDUCKGO_HTML: &str = "https://html.duckduckgo.com/html/";

/// 摘要最长字符数
const SNIPPET_MAX_CHARS: usize = 180;

fn build_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!") || head.starts_with("<html") || head.contains("<head") || head.contains("<body")
}

fn html_to_text(html: &str) -> String {
    match from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    }
}

/// 按字符截断并追加标记
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n…(truncated)"
    } else {
        text.to_string()
    }
}

#[derive(Deserialize, JsonSchema)]
struct FetchArgs {
    /// Page URL starting with http:// or https://
    url: String,
}

/// fetch_webpage：抓取网页正文
pub struct FetchWebpageTool {
    client: Client,
    max_result_chars: usize,
}

impl FetchWebpageTool {
    pub fn new(cfg: &WebSection) -> Self {
        Self {
            client: build_client(cfg.timeout_secs),
            max_result_chars: cfg.max_result_chars,
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("connection failed: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP error: {}", status));
        }
        let body = resp.text().await.map_err(|e| format!("read body: {}", e))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            html_to_text(body)
        } else {
            body.to_string()
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok("(no text could be extracted)".to_string());
        }
        Ok(truncate_chars(text, self.max_result_chars))
    }
}

#[async_trait]
impl Tool for FetchWebpageTool {
    fn name(&self) -> &str {
        "fetch_webpage"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its text content. Use it to read the pages found by web_search."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<FetchArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: FetchArgs = parse_args(args)?;
        let url = args.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err("specify a valid URL (http:// or https://).".to_string());
        }
        tracing::info!(url = %url, "fetch_webpage tool execute");
        self.fetch(url).await.map(ToolOutput::from)
    }
}

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// DuckDuckGo 结果链接形如 `//duckduckgo.com/l/?uddg=<编码后的目标>`，取出真实地址
fn resolve_result_url(href: &str) -> String {
    let href = decode_entities(href);
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.clone()
    };
    if let Ok(url) = Url::parse(&absolute) {
        if let Some((_, target)) = url.query_pairs().find(|(k, _)| k == "uddg") {
            return target.into_owned();
        }
    }
    absolute
}

fn clean_fragment(fragment: &str) -> String {
    decode_entities(&strip_html_tags(fragment))
}

/// 解析 DuckDuckGo HTML 结果页
pub fn parse_search_results(html: &str, max_results: usize) -> Result<Vec<SearchHit>, String> {
    let link_re = Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)
        .map_err(|e| e.to_string())?;
    let snippet_re =
        Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#).map_err(|e| e.to_string())?;

    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .map(|c| clean_fragment(&c[1]))
        .collect();

    let hits = link_re
        .captures_iter(html)
        .take(max_results)
        .enumerate()
        .map(|(i, c)| SearchHit {
            title: clean_fragment(&c[2]),
            url: resolve_result_url(&c[1]),
            snippet: snippets
                .get(i)
                .map(|s| s.chars().take(SNIPPET_MAX_CHARS).collect())
                .unwrap_or_default(),
        })
        .collect();
    Ok(hits)
}

pub fn format_search_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found.".to_string();
    }
    hits.iter()
        .enumerate()
        .map(|(i, h)| format!("{}. {}\n   {}\n   {}", i + 1, h.title, h.url, h.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Deserialize, JsonSchema)]
struct SearchArgs {
    /// Search keywords
    query: String,
}

/// web_search：DuckDuckGo 网页搜索
pub struct WebSearchTool {
    client: Client,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(cfg: &WebSection) -> Self {
        Self {
            client: build_client(cfg.timeout_secs),
            max_results: cfg.max_search_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs and snippets. Use fetch_webpage to read a result in detail."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<SearchArgs>()
    }

    async fn execute(&self, args: ArgMap) -> Result<ToolOutput, String> {
        let args: SearchArgs = parse_args(args)?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err("specify a search query.".to_string());
        }
        tracing::info!(query = %query, "web_search tool execute");
        let resp = self
            .client
            .get(DUCKDUCKGO_HTML)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| format!("search failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("search failed: HTTP {}", resp.status()));
        }
        let html = resp.text().await.map_err(|e| format!("search failed: {}", e))?;
        let hits = parse_search_results(&html, self.max_results)?;
        Ok(format_search_results(&hits).into())
    }
}
