use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::server::RelayImServer;

/// 定期快照社交关系图 / Periodically snapshot the social graph
pub fn spawn_graph_persist_task(
    server: RelayImServer,
    snapshot_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut snapshot_interval = interval(Duration::from_secs(snapshot_secs.max(1)));
        snapshot_interval.tick().await;
        loop {
            tokio::select! {
                _ = snapshot_interval.tick() => {
                    let path = server.config.im.graph_snapshot_path.clone();
                    if let Err(e) = server.graph.snapshot(&path) {
                        tracing::error!("Graph snapshot failed: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                }
            }
        }
    });
}
