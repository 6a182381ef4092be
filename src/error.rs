use thiserror::Error;

/// 消息被拒绝的具体原因，逐一回显给客户端
/// Specific message rejection reasons, echoed back to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("sequence not monotonic")]
    SequenceNotMonotonic,
    #[error("not a participant")]
    NotParticipant,
    #[error("muted")]
    Muted,
    #[error("blocked")]
    Blocked,
    #[error("rate limited")]
    RateLimited,
    #[error("await reply")]
    StrangerThrottled,
    #[error("malformed frame")]
    Malformed,
}

impl RejectReason {
    /// 结构化错误码 / Structured error code
    pub fn code(&self) -> i32 {
        match self {
            RejectReason::SequenceNotMonotonic => 40001,
            RejectReason::NotParticipant => 40002,
            RejectReason::Muted => 40003,
            RejectReason::Blocked => 40004,
            RejectReason::RateLimited => 40005,
            RejectReason::StrangerThrottled => 40006,
            RejectReason::Malformed => 40000,
        }
    }
}

/// 子系统错误分类 / Subsystem error taxonomy
#[derive(Debug, Error)]
pub enum ImError {
    /// 令牌缺失/非法/过期，连接直接拒绝 / Token missing/invalid/expired, connection rejected
    #[error("auth failed: {0}")]
    Auth(String),
    #[error(transparent)]
    Validation(#[from] RejectReason),
    /// 瞬时发布失败，本次消息丢弃，依赖客户端重发
    /// Transient publish failure, message dropped for this attempt
    #[error("broker publish failed: {0}")]
    BrokerPublish(String),
    /// 刷盘失败，条目留在热缓存等待下轮 / Flush failure, entries stay hot for the next run
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("graph persistence failure: {0}")]
    GraphPersistence(String),
    /// 异步建群/邀请失败，通知在线的发起者 / Async room workflow failure
    #[error("room workflow failure: {0}")]
    RoomWorkflow(String),
}

pub const CODE_OK: i32 = 200;
pub const CODE_AUTH: i32 = 401;
pub const CODE_PUBLISH: i32 = 500;
