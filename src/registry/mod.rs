//! 连接注册表：账号到活跃连接集合的进程内映射，带设备数上限与
//! 最旧连接驱逐
//! Connection registry: per-process account → live connections map with a
//! device limit and oldest-connection eviction

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::store::{keys, HotStore};

/// 活跃连接句柄。连接本体归网络任务所有，这里只持有发送端。
/// Live connection handle. The connection itself is owned by its network
/// task; only the sender side lives here.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub client_id: String,
    pub account_id: u64,
    pub sender: mpsc::UnboundedSender<Message>,
    pub connected_at: i64,
    /// 本连接最后接受的客户端序列号 / Last accepted client sequence
    pub watermark: Arc<AtomicI64>,
    /// 最后放行发送的毫秒时间 / Millisecond stamp of the last accepted send
    pub last_send_at: Arc<AtomicI64>,
    pub last_heartbeat: Arc<Mutex<Instant>>,
}

impl ConnectionHandle {
    pub fn new(account_id: u64, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            account_id,
            sender,
            connected_at: chrono::Utc::now().timestamp_millis(),
            watermark: Arc::new(AtomicI64::new(0)),
            last_send_at: Arc::new(AtomicI64::new(0)),
            last_heartbeat: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

pub struct ConnectionRegistry {
    accounts: DashMap<u64, Vec<ConnectionHandle>>,
    hot: Arc<HotStore>,
    device_limit: usize,
}

impl ConnectionRegistry {
    pub fn new(hot: Arc<HotStore>, device_limit: usize) -> Self {
        Self {
            accounts: DashMap::new(),
            hot,
            device_limit: device_limit.max(1),
        }
    }

    /// 注册连接；超出设备上限时返回被驱逐的最旧连接，调用方负责关闭。
    /// 空转非空时在同一临界区写入全局在线标记。
    /// Registers a connection; returns the evicted oldest handles beyond
    /// the device limit for the caller to close. The empty→non-empty
    /// transition writes the global online marker in the same critical
    /// section.
    pub fn register(&self, handle: ConnectionHandle) -> Vec<ConnectionHandle> {
        let account_id = handle.account_id;
        let mut evicted = Vec::new();
        let mut entry = self.accounts.entry(account_id).or_default();
        let was_empty = entry.is_empty();
        entry.push(handle);
        while entry.len() > self.device_limit {
            evicted.push(entry.remove(0));
        }
        if was_empty {
            self.hot.sadd(keys::ONLINE_SET, &account_id.to_string());
        }
        evicted
    }

    /// 注销连接；集合清空时连带清除在线标记，避免消息在拆除中途
    /// 误判为在线
    /// Deregisters a connection; clearing the online marker happens with
    /// the removal so a mid-teardown message cannot be misrouted as online
    pub fn deregister(&self, account_id: u64, client_id: &str) {
        let mut emptied = false;
        if let Some(mut entry) = self.accounts.get_mut(&account_id) {
            entry.retain(|c| c.client_id != client_id);
            if entry.is_empty() {
                self.hot.srem(keys::ONLINE_SET, &account_id.to_string());
                emptied = true;
            }
        }
        if emptied {
            self.accounts.remove_if(&account_id, |_, v| v.is_empty());
        }
    }

    pub fn list(&self, account_id: u64) -> Vec<ConnectionHandle> {
        self.accounts
            .get(&account_id)
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn is_online(&self, account_id: u64) -> bool {
        self.accounts
            .get(&account_id)
            .map_or(false, |e| !e.is_empty())
    }

    pub fn connection_count(&self) -> usize {
        self.accounts.iter().map(|e| e.len()).sum()
    }

    pub fn online_accounts(&self) -> Vec<u64> {
        self.accounts
            .iter()
            .filter(|e| !e.is_empty())
            .map(|e| *e.key())
            .collect()
    }
}
