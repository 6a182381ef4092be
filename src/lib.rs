pub mod api;
pub mod broker;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;
pub mod tasks;
pub mod util;
pub mod ws;

// 对外导出常用类型 / Re-export commonly used types
pub use crate::domain::message::{ChatMessage, Envelope, InboundFrame, MessageType};
pub use crate::registry::ConnectionHandle;
pub use crate::server::RelayImServer;

use chrono::{Datelike, Timelike};
use tracing_subscriber::{fmt, EnvFilter};

struct LogTimer;

impl fmt::time::FormatTime for LogTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        let cs = now.timestamp_subsec_millis() / 10;
        let s = format!(
            "{:04}-{:02}-{:02}:{:02}:{:02}:{:02}:{:02}",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            cs
        );
        w.write_str(&s)
    }
}

/// 初始化日志，RUST_LOG可覆盖级别 / Initialize logging, RUST_LOG overrides the level
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_timer(LogTimer)
        .compact()
        .with_target(false)
        .try_init()
        .ok();
}
