use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::server::RelayImServer;
use crate::service::auth;

#[derive(Deserialize)]
pub struct BootstrapQuery {
    pub uid: u64,
}

// 路由注册入口（GET）
// Route registration entry (GET)
pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(bootstrap_handle)));
}

// 连接引导：返回带令牌的传输地址
// Connection bootstrap: returns the transport URL with a bearer token
pub async fn bootstrap_handle(
    server: web::Data<RelayImServer>,
    query: web::Query<BootstrapQuery>,
) -> impl Responder {
    match auth::issue_token(
        &server.config.auth.secret,
        query.uid,
        server.config.auth.token_ttl_ms,
    ) {
        Ok(token) => HttpResponse::Ok().json(serde_json::json!({
            "code": 200,
            "data": {
                "url": format!(
                    "ws://{}:{}/?token={}",
                    server.config.server.host, server.config.server.ws_port, token
                )
            },
            "message": "ok"
        })),
        Err(e) => HttpResponse::Ok().json(serde_json::json!({
            "code": 401,
            "data": null,
            "message": e.to_string()
        })),
    }
}
