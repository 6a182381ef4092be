//! 连接握手管线：升级 → 鉴权 → 在线登记 → 积压重放 → 稳态。
//! 显式状态机替代可拆卸的处理器链，进入稳态后不可逆。
//! Connection handshake pipeline: upgrade → auth → presence → backlog
//! replay → steady state. An explicit state machine instead of a removable
//! handler chain; reaching steady state is irreversible.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingUpgrade,
    AwaitingAuth,
    Authenticated,
    ReplayingBacklog,
    SteadyState,
    Rejected,
}

pub struct HandshakePipeline {
    state: HandshakeState,
    upgrade_complete: bool,
    account_id: Option<u64>,
}

impl HandshakePipeline {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::AwaitingUpgrade,
            upgrade_complete: false,
            account_id: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn account_id(&self) -> Option<u64> {
        self.account_id
    }

    pub fn is_steady(&self) -> bool {
        self.state == HandshakeState::SteadyState
    }

    /// 收到协议升级请求 / Transport upgrade request arrived
    pub fn on_upgrade_request(&mut self) {
        if self.state == HandshakeState::AwaitingUpgrade {
            self.state = HandshakeState::AwaitingAuth;
        }
    }

    /// 升级握手完成，此后才能向客户端写帧
    /// Upgrade finished; frames can only be written to the client after this
    pub fn on_upgrade_complete(&mut self) {
        if self.state != HandshakeState::Rejected {
            self.upgrade_complete = true;
        }
    }

    /// 令牌校验通过 / Token validated
    pub fn on_authenticated(&mut self, account_id: u64) {
        if self.state == HandshakeState::AwaitingAuth {
            self.account_id = Some(account_id);
            self.state = HandshakeState::Authenticated;
        }
    }

    /// 令牌缺失/非法/过期，立即终止 / Bad token, terminal
    pub fn on_rejected(&mut self) {
        self.state = HandshakeState::Rejected;
        self.account_id = None;
    }

    /// 鉴权与升级完成两个事件都到齐才允许开始重放——账号要等鉴权
    /// 才知道，而写帧要等升级收尾；先到的一方在这里被缓冲。
    /// Replay starts only once BOTH the auth and the upgrade-complete
    /// events have fired; whichever arrives first is buffered here.
    pub fn try_begin_replay(&mut self) -> bool {
        if self.state == HandshakeState::Authenticated
            && self.upgrade_complete
            && self.account_id.is_some()
        {
            self.state = HandshakeState::ReplayingBacklog;
            return true;
        }
        false
    }

    pub fn on_replay_complete(&mut self) {
        if self.state == HandshakeState::ReplayingBacklog {
            self.state = HandshakeState::SteadyState;
        }
    }
}

impl Default for HandshakePipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_before_upgrade_complete_is_buffered() {
        let mut p = HandshakePipeline::new();
        p.on_upgrade_request();
        p.on_authenticated(11);
        assert!(!p.try_begin_replay(), "must wait for upgrade completion");
        p.on_upgrade_complete();
        assert!(p.try_begin_replay());
        assert_eq!(p.state(), HandshakeState::ReplayingBacklog);
    }

    #[test]
    fn upgrade_complete_before_auth_is_buffered() {
        let mut p = HandshakePipeline::new();
        p.on_upgrade_request();
        p.on_upgrade_complete();
        assert!(!p.try_begin_replay(), "must wait for authentication");
        p.on_authenticated(11);
        assert!(p.try_begin_replay());
    }

    #[test]
    fn rejection_is_terminal() {
        let mut p = HandshakePipeline::new();
        p.on_upgrade_request();
        p.on_rejected();
        p.on_authenticated(11);
        p.on_upgrade_complete();
        assert!(!p.try_begin_replay());
        assert_eq!(p.state(), HandshakeState::Rejected);
        assert_eq!(p.account_id(), None);
    }

    #[test]
    fn steady_state_is_irreversible() {
        let mut p = HandshakePipeline::new();
        p.on_upgrade_request();
        p.on_authenticated(5);
        p.on_upgrade_complete();
        assert!(p.try_begin_replay());
        p.on_replay_complete();
        assert!(p.is_steady());
        // 重复事件不再改变状态 / Repeated events no longer change state
        p.on_upgrade_request();
        p.on_authenticated(6);
        assert!(p.is_steady());
        assert_eq!(p.account_id(), Some(5));
    }

    #[test]
    fn replay_cannot_start_before_auth_stage() {
        let mut p = HandshakePipeline::new();
        p.on_upgrade_complete();
        assert!(!p.try_begin_replay());
        assert_eq!(p.state(), HandshakeState::AwaitingUpgrade);
    }
}
