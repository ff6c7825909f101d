//! 外部通道：Transport 抽象与终端 / 记录实现

pub mod console;
pub mod recording;
pub mod transport;

pub use console::ConsoleTransport;
pub use recording::RecordingTransport;
pub use transport::{Transport, TransportError};
