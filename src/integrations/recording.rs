//! 记录型通道：保存所有心跳、文本与产物，用于测试与嵌入方检查交互

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::integrations::{Transport, TransportError};
use crate::tools::Artifact;

#[derive(Debug, Default)]
pub struct RecordingTransport {
    pulses: AtomicUsize,
    texts: Mutex<Vec<String>>,
    artifacts: Mutex<Vec<Artifact>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulse_count(&self) -> usize {
        self.pulses.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn pulse(&self) -> Result<(), TransportError> {
        self.pulses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.texts
            .lock()
            .map_err(|e| TransportError(e.to_string()))?
            .push(text.to_string());
        Ok(())
    }

    async fn send_artifact(&self, artifact: &Artifact) -> Result<(), TransportError> {
        self.artifacts
            .lock()
            .map_err(|e| TransportError(e.to_string()))?
            .push(artifact.clone());
        Ok(())
    }
}
