use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::server::RelayImServer;

/// 定期轮换去重分片 / Periodically rotate the dedup shards
pub fn spawn_rotate_task(
    server: RelayImServer,
    rotate_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut rotate_interval = interval(Duration::from_secs(rotate_secs.max(1)));
        rotate_interval.tick().await;
        loop {
            tokio::select! {
                _ = rotate_interval.tick() => {
                    server.dedup.rotate();
                    tracing::debug!("🔄 Dedup shard rotated ({} shards live)", server.dedup.shard_count());
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
    });
}
