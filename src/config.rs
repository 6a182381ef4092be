use anyhow::Result;
use serde::Deserialize;

/// 服务监听配置 / Listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub ws_port: u16,
    pub http_port: u16,
    pub node_id: u16,
    pub heartbeat_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ws_port: 5300,
            http_port: 8081,
            node_id: 1,
            heartbeat_timeout_ms: 60_000,
        }
    }
}

/// 鉴权配置 / Auth configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub secret: String,
    pub token_ttl_ms: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: "relay-im-dev-secret".to_string(),
            token_ttl_ms: 86_400_000,
        }
    }
}

/// 消息引擎配置 / Message engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImConfig {
    /// 单账号最大设备数 / Max concurrent devices per account
    pub device_limit: usize,
    /// 单连接最小发送间隔 / Minimum interval between sends per connection
    pub send_interval_ms: i64,
    pub dedup_shards: usize,
    pub dedup_shard_bits: usize,
    pub dedup_rotate_secs: u64,
    pub flush_interval_secs: u64,
    /// 重连补偿回溯天数 / Recovery window lookback on reconnect
    pub backlog_lookback_days: i64,
    /// 房间解散后延迟清理秒数，必须大于刷盘间隔
    /// Deferred teardown delay, must exceed the flush interval
    pub teardown_delay_secs: u64,
    pub offline_max_per_account: usize,
    pub offline_cleanup_batch: usize,
    pub stranger_throttle_enabled: bool,
    pub sensitive_words: Vec<String>,
    pub graph_snapshot_path: String,
    pub graph_snapshot_secs: u64,
    pub data_dir: String,
}

impl Default for ImConfig {
    fn default() -> Self {
        Self {
            device_limit: 3,
            send_interval_ms: 1000,
            dedup_shards: 5,
            dedup_shard_bits: 4 * 1024 * 1024,
            dedup_rotate_secs: 3600,
            flush_interval_secs: 3600,
            backlog_lookback_days: 15,
            teardown_delay_secs: 7200,
            offline_max_per_account: 500,
            offline_cleanup_batch: 50,
            stranger_throttle_enabled: false,
            sensitive_words: Vec::new(),
            graph_snapshot_path: "data/graph.snapshot".to_string(),
            graph_snapshot_secs: 300,
            data_dir: "data/relay-im".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub im: ImConfig,
}

/// 加载配置文件与环境变量覆盖 / Load config file with env overrides
pub fn load(path: Option<&str>) -> Result<AppConfig> {
    let mut builder = config::Config::builder();
    if let Some(p) = path {
        builder = builder.add_source(config::File::with_name(p).required(false));
    }
    let cfg = builder
        .add_source(config::Environment::with_prefix("RELAY_IM").separator("__"))
        .build()?;
    Ok(cfg.try_deserialize()?)
}
