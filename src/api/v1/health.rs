use actix_web::{web, HttpResponse, Responder};

use crate::server::RelayImServer;

// 路由注册入口（GET）
// Route registration entry (GET)
pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(health_handle)));
}

// 基础健康检查
// Basic health check
pub async fn health_handle(server: web::Data<RelayImServer>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "code": 200,
        "data": {
            "status": "ok",
            "connections": server.registry.connection_count(),
            "onlineAccounts": server.registry.online_accounts().len(),
        },
        "message": "ok"
    }))
}
