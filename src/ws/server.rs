use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use crate::server::RelayImServer;

/// 启动WS监听 / Start the WS listener
impl RelayImServer {
    pub async fn run_ws(&self, host: &str, port: u16) -> Result<()> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("🚀 relay-im WebSocket server starting on {}", addr);
        info!("📡 Waiting for connections...");

        while let Ok((stream, peer_addr)) = listener.accept().await {
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    crate::ws::connection::handle_connection(stream, peer_addr, server).await
                {
                    tracing::error!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }

        Ok(())
    }
}
