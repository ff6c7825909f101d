//! 可观测性：tracing 初始化与监控通道

pub mod monitor;

pub use monitor::{ChannelSink, FileSink, Monitor, MonitorSink, NullSink, TracingSink};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅者；RUST_LOG 未设置时默认 info
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
