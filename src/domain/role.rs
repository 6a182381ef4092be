/// 房间成员角色 / Room member role
///
/// owner(2) > admin(1) > member(0) > muted(-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Admin,
    Member,
    Muted,
}

impl Role {
    pub fn level(&self) -> i8 {
        match self {
            Role::Owner => 2,
            Role::Admin => 1,
            Role::Member => 0,
            Role::Muted => -1,
        }
    }

    pub fn from_level(level: i8) -> Option<Role> {
        match level {
            2 => Some(Role::Owner),
            1 => Some(Role::Admin),
            0 => Some(Role::Member),
            -1 => Some(Role::Muted),
            _ => None,
        }
    }

    pub fn can_moderate(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

/// 快存中的角色条目，禁言时保留原角色以便恢复
/// Role entry in the fast store; mute retains the prior role for unmute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleEntry {
    pub role: Role,
    pub prior: Option<Role>,
}

impl RoleEntry {
    pub fn of(role: Role) -> Self {
        Self { role, prior: None }
    }

    pub fn muted(prior: Role) -> Self {
        Self {
            role: Role::Muted,
            prior: Some(prior),
        }
    }

    /// 编码成快存哈希值，如 "2" 或 "-1:0"
    /// Encoded fast-store hash value, e.g. "2" or "-1:0"
    pub fn encode(&self) -> String {
        match self.prior {
            Some(p) => format!("{}:{}", self.role.level(), p.level()),
            None => self.role.level().to_string(),
        }
    }

    pub fn decode(raw: &str) -> Option<RoleEntry> {
        let mut parts = raw.splitn(2, ':');
        let role = Role::from_level(parts.next()?.parse().ok()?)?;
        let prior = match parts.next() {
            Some(p) => Some(Role::from_level(p.parse().ok()?)?),
            None => None,
        };
        Some(RoleEntry { role, prior })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_order() {
        assert!(Role::Owner.level() > Role::Admin.level());
        assert!(Role::Admin.level() > Role::Member.level());
        assert!(Role::Member.level() > Role::Muted.level());
    }

    #[test]
    fn entry_encode_decode() {
        let plain = RoleEntry::of(Role::Admin);
        assert_eq!(RoleEntry::decode(&plain.encode()), Some(plain));
        let muted = RoleEntry::muted(Role::Member);
        let decoded = RoleEntry::decode(&muted.encode()).unwrap();
        assert_eq!(decoded.role, Role::Muted);
        assert_eq!(decoded.prior, Some(Role::Member));
    }
}
