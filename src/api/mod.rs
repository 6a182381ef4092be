pub mod v1;

use actix_web::web;

/// 路由配置包装 / Route configuration wrapper
pub fn configure(cfg: &mut web::ServiceConfig) {
    v1::health::register(cfg, "/v1/health");
    v1::connect::register(cfg, "/v1/connect/bootstrap");
    v1::rooms::register(cfg, "/v1/rooms/moderate");
}
