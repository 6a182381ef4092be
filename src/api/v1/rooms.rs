use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::error::{ImError, CODE_OK, CODE_PUBLISH};
use crate::server::RelayImServer;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerateRequest {
    pub session_id: String,
    pub actor: u64,
    pub target: Option<u64>,
    pub action: String,
}

// 路由注册入口（POST）
// Route registration entry (POST)
pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(moderate_handle)));
}

// 房间管理：角色调整同步执行，系统通知进消息管线
// Room moderation: role changes run synchronously, the system notice
// enters the message pipeline
pub async fn moderate_handle(
    server: web::Data<RelayImServer>,
    req: web::Json<ModerateRequest>,
) -> impl Responder {
    let session = req.session_id.as_str();
    let result = match (req.action.as_str(), req.target) {
        ("promote", Some(t)) => server.moderate(server.rooms.promote(session, req.actor, t)),
        ("demote", Some(t)) => server.moderate(server.rooms.demote(session, req.actor, t)),
        ("mute", Some(t)) => server.moderate(server.rooms.mute(session, req.actor, t)),
        ("unmute", Some(t)) => server.moderate(server.rooms.unmute(session, req.actor, t)),
        ("kick", Some(t)) => server.moderate(server.rooms.kick(session, req.actor, t)),
        ("dismiss", _) => server.rooms.dismiss(session, req.actor),
        _ => Err(ImError::RoomWorkflow(
            "unknown action or missing target".to_string(),
        )),
    };
    match result {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "code": CODE_OK,
            "data": { "sessionId": session },
            "message": "ok"
        })),
        Err(e) => HttpResponse::Ok().json(serde_json::json!({
            "code": CODE_PUBLISH,
            "data": null,
            "message": e.to_string()
        })),
    }
}
