use actix_web::{web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use relay_im::service::delivery::spawn_fanout_consumer;
use relay_im::service::reminder::spawn_reminder_consumer;
use relay_im::service::room::spawn_room_workflow;
use relay_im::{api, config, init_tracing, tasks, RelayImServer};

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "relay-im WebSocket & HTTP message delivery server", long_about = None)]
struct Args {
    /// 指定配置文件路径 / Specify config file path
    #[arg(short = 'c', long = "config", default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志 / Initialize logging
    init_tracing();

    let args = Args::parse();

    info!("🎯 Starting relay-im Hybrid Server (WebSocket + HTTP)...");

    let cfg = config::load(Some(&args.config))?;
    info!("🔧 Loaded config file: {}", args.config);

    let (server, receivers) = RelayImServer::open(cfg)?;

    // 停机信号，所有后台任务共用 / Shutdown signal shared by all background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 管道消费者 / Pipeline consumers
    spawn_fanout_consumer(server.clone(), receivers.messages, shutdown_rx.clone());
    spawn_room_workflow(server.clone(), receivers.rooms, shutdown_rx.clone());
    spawn_reminder_consumer(server.clone(), receivers.reminders, shutdown_rx.clone());

    // 后台维护任务 / Background maintenance tasks
    tasks::heartbeat::spawn_cleanup_task(
        server.clone(),
        server.config.server.heartbeat_timeout_ms,
        shutdown_rx.clone(),
    );
    tasks::flush::spawn_flush_task(
        server.clone(),
        server.config.im.flush_interval_secs,
        shutdown_rx.clone(),
    );
    tasks::rotate::spawn_rotate_task(
        server.clone(),
        server.config.im.dedup_rotate_secs,
        shutdown_rx.clone(),
    );
    tasks::graph_persist::spawn_graph_persist_task(
        server.clone(),
        server.config.im.graph_snapshot_secs,
        shutdown_rx,
    );

    let host = server.config.server.host.clone();
    let ws_port = server.config.server.ws_port;
    let http_port = server.config.server.http_port;

    // 启动WebSocket服务器 / Start WebSocket server
    let ws_server = server.clone();
    let ws_host = host.clone();
    let ws_future = async move {
        if let Err(e) = ws_server.run_ws(&ws_host, ws_port).await {
            error!("❌ WebSocket server error: {}", e);
        }
    };

    // 启动HTTP服务器 / Start HTTP server
    let http_server = server.clone();
    let http_host = host.clone();
    let http_future = async move {
        info!("🌐 Starting HTTP server on {}:{}", http_host, http_port);
        let data = web::Data::new(http_server);
        let result = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .configure(api::configure)
        })
        .bind((http_host.as_str(), http_port));
        match result {
            Ok(srv) => {
                if let Err(e) = srv.run().await {
                    error!("❌ HTTP server error: {}", e);
                }
            }
            Err(e) => error!("❌ HTTP bind error: {}", e),
        }
    };

    tokio::select! {
        _ = ws_future => {
            info!("WebSocket server stopped");
        }
        _ = http_future => {
            info!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    server.shutdown();

    info!("✅ Server shutdown successfully");

    Ok(())
}
