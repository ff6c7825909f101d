//! 终端通道：回复写 stdout，心跳与产物提示写 stderr

use std::io::Write;

use async_trait::async_trait;

use crate::integrations::{Transport, TransportError};
use crate::tools::Artifact;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleTransport;

#[async_trait]
impl Transport for ConsoleTransport {
    async fn pulse(&self) -> Result<(), TransportError> {
        let mut err = std::io::stderr();
        write!(err, ".").and_then(|_| err.flush()).map_err(|e| TransportError(e.to_string()))
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        let mut out = std::io::stdout();
        writeln!(out, "{}", text)
            .and_then(|_| out.flush())
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn send_artifact(&self, artifact: &Artifact) -> Result<(), TransportError> {
        eprintln!("[{}] {}", artifact.caption, artifact.path.display());
        Ok(())
    }
}
