use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::server::RelayImServer;

/// 定期把热缓存落盘 / Periodically drain the hot cache to durable storage
pub fn spawn_flush_task(
    server: RelayImServer,
    interval_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut flush_interval = interval(Duration::from_secs(interval_secs.max(1)));
        // 首次tick立即触发, 跳过它 / The first tick fires immediately, skip it
        flush_interval.tick().await;
        loop {
            tokio::select! {
                _ = flush_interval.tick() => {
                    if let Err(e) = server.flush_hot_cache() {
                        tracing::error!("Hot cache flush failed, will retry: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
    });
}
