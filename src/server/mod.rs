use anyhow::Result;
use std::sync::Arc;

use crate::broker::{self, Broker, BrokerReceivers};
use crate::config::AppConfig;
use crate::dedup::DedupRing;
use crate::graph::{SocialGraph, StrangerPolicy};
use crate::registry::ConnectionRegistry;
use crate::service::moderation::WordFilter;
use crate::service::room::RoomService;
use crate::store::durable::{DurableStore, FileStore};
use crate::store::HotStore;
use crate::util::IdGenerator;

/// 服务端全局状态 / Server global state
///
/// 进程级单例，启动时构建、周期性落盘、停机时收尾，所有后台任务
/// 与连接任务共享同一份
/// Process-scoped singleton: built at startup, snapshotted periodically,
/// torn down on shutdown; shared by every connection and background task
#[derive(Clone)]
pub struct RelayImServer {
    pub config: AppConfig,
    pub ids: Arc<IdGenerator>,
    pub hot: Arc<HotStore>,
    pub durable: Arc<dyn DurableStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub graph: Arc<SocialGraph>,
    pub stranger: Arc<StrangerPolicy>,
    pub dedup: Arc<DedupRing>,
    pub rooms: Arc<RoomService>,
    pub words: Arc<WordFilter>,
    pub broker: Broker,
}

impl RelayImServer {
    /// 临时存储版本，测试与本地试跑用
    /// Temporary-storage variant for tests and throwaway runs
    pub fn new(config: AppConfig) -> Result<(Self, BrokerReceivers)> {
        let durable: Arc<dyn DurableStore> = Arc::new(FileStore::open_temporary()?);
        Self::with_storage(config, durable, SocialGraph::new())
    }

    /// 按配置打开数据目录与图快照 / Open configured data dir and graph snapshot
    pub fn open(config: AppConfig) -> Result<(Self, BrokerReceivers)> {
        let durable: Arc<dyn DurableStore> = Arc::new(FileStore::open(&config.im.data_dir)?);
        let graph = SocialGraph::load(&config.im.graph_snapshot_path)?;
        Self::with_storage(config, durable, graph)
    }

    /// 注入持久层与关系图，供嵌入与测试替换
    /// Inject the durable tier and graph, for embedding and test substitution
    pub fn with_storage(
        config: AppConfig,
        durable: Arc<dyn DurableStore>,
        graph: SocialGraph,
    ) -> Result<(Self, BrokerReceivers)> {
        let hot = Arc::new(HotStore::new());
        let ids = Arc::new(IdGenerator::new(config.server.node_id));
        let registry = Arc::new(ConnectionRegistry::new(hot.clone(), config.im.device_limit));
        let dedup = Arc::new(DedupRing::new(
            config.im.dedup_shards,
            config.im.dedup_shard_bits,
        ));
        let rooms = Arc::new(RoomService::new(
            hot.clone(),
            durable.clone(),
            ids.clone(),
            config.im.teardown_delay_secs,
        ));
        let words = Arc::new(WordFilter::new(config.im.sensitive_words.clone()));
        let stranger = Arc::new(StrangerPolicy::new(config.im.stranger_throttle_enabled));
        let (broker, receivers) = broker::channel();
        Ok((
            Self {
                config,
                ids,
                hot,
                durable,
                registry,
                graph: Arc::new(graph),
                stranger,
                dedup,
                rooms,
                words,
                broker,
            },
            receivers,
        ))
    }

    /// 清理心跳超时的连接 / Close connections whose heartbeat went stale
    pub async fn cleanup_idle_connections(&self, timeout_ms: u64) {
        let timeout = std::time::Duration::from_millis(timeout_ms);
        for account_id in self.registry.online_accounts() {
            for conn in self.registry.list(account_id) {
                let stale = conn.last_heartbeat.lock().elapsed() > timeout;
                if stale {
                    tracing::warn!(
                        "💤 Closing idle connection {} of account {}",
                        conn.client_id,
                        account_id
                    );
                    let _ = self.send_close(&conn, "heartbeat timeout");
                    self.registry.deregister(account_id, &conn.client_id);
                }
            }
        }
    }

    /// 停机收尾：末次刷盘与图快照 / Shutdown: final flush and graph snapshot
    pub fn shutdown(&self) {
        if let Err(e) = self.flush_hot_cache() {
            tracing::error!("final flush failed: {}", e);
        }
        if let Err(e) = self.graph.snapshot(&self.config.im.graph_snapshot_path) {
            tracing::error!("final graph snapshot failed: {}", e);
        }
    }
}
