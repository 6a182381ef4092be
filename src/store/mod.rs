//! 热存储：进程内共享快存，承载在线标记、角色表、热消息缓存、
//! 离线积压索引与提醒队列
//! Hot store: in-process fast shared store for presence markers, role maps,
//! the hot message cache, offline backlog indexes and reminder queues

pub mod durable;

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Default)]
struct ZSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl ZSet {
    fn add(&mut self, member: String, score: i64) {
        if let Some(old) = self.scores.insert(member.clone(), score) {
            self.ordered.remove(&(old, member.clone()));
        }
        self.ordered.insert((score, member));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.ordered.remove(&(old, member.to_string()));
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, ZSet>,
    sets: HashMap<String, HashSet<String>>,
}

/// 所有操作都在同一把锁下完成，这让“读索引再取值”天然原子，
/// 避免刷盘任务在两步之间抽走条目
/// Every operation runs under one lock, which makes index-then-fetch
/// naturally atomic against the concurrent flush job
#[derive(Default)]
pub struct HotStore {
    inner: RwLock<Inner>,
}

impl HotStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- hash ----

    pub fn hset(&self, key: &str, field: &str, value: &str) {
        self.inner
            .write()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        self.inner.read().hashes.get(key)?.get(field).cloned()
    }

    pub fn hget_many(&self, key: &str, fields: &[String]) -> Vec<Option<String>> {
        let inner = self.inner.read();
        let hash = inner.hashes.get(key);
        fields
            .iter()
            .map(|f| hash.and_then(|h| h.get(f).cloned()))
            .collect()
    }

    pub fn hdel(&self, key: &str, field: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.hashes.get_mut(key) {
            Some(h) => {
                let removed = h.remove(field).is_some();
                if h.is_empty() {
                    inner.hashes.remove(key);
                }
                removed
            }
            None => false,
        }
    }

    pub fn hgetall(&self, key: &str) -> Vec<(String, String)> {
        self.inner
            .read()
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn hlen(&self, key: &str) -> usize {
        self.inner.read().hashes.get(key).map_or(0, |h| h.len())
    }

    pub fn hclear(&self, key: &str) -> usize {
        self.inner
            .write()
            .hashes
            .remove(key)
            .map_or(0, |h| h.len())
    }

    // ---- sorted set ----

    pub fn zadd(&self, key: &str, member: &str, score: i64) {
        self.inner
            .write()
            .zsets
            .entry(key.to_string())
            .or_default()
            .add(member.to_string(), score);
    }

    pub fn zrem(&self, key: &str, member: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.zsets.get_mut(key) {
            Some(z) => {
                let removed = z.remove(member);
                if z.scores.is_empty() {
                    inner.zsets.remove(key);
                }
                removed
            }
            None => false,
        }
    }

    pub fn zcard(&self, key: &str) -> usize {
        self.inner.read().zsets.get(key).map_or(0, |z| z.scores.len())
    }

    /// 闭区间按分值升序取成员 / Ascending members within [min, max]
    pub fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Vec<(String, i64)> {
        let inner = self.inner.read();
        match inner.zsets.get(key) {
            Some(z) => z
                .ordered
                .iter()
                .filter(|(s, _)| *s >= min && *s <= max)
                .map(|(s, m)| (m.clone(), *s))
                .collect(),
            None => Vec::new(),
        }
    }

    /// 原子取出并清空整个有序集合，升序返回
    /// Atomically drain the whole sorted set, ascending
    pub fn zdrain(&self, key: &str) -> Vec<(String, i64)> {
        let mut inner = self.inner.write();
        match inner.zsets.remove(key) {
            Some(z) => z.ordered.into_iter().map(|(s, m)| (m, s)).collect(),
            None => Vec::new(),
        }
    }

    /// 删除最旧的n个成员 / Remove the n oldest members
    pub fn zremrange_oldest(&self, key: &str, n: usize) -> usize {
        let mut inner = self.inner.write();
        let Some(z) = inner.zsets.get_mut(key) else {
            return 0;
        };
        let victims: Vec<(i64, String)> = z.ordered.iter().take(n).cloned().collect();
        for (_, m) in &victims {
            z.remove(m);
        }
        if z.scores.is_empty() {
            inner.zsets.remove(key);
        }
        victims.len()
    }

    /// 原子的“读索引区间、再逐个取哈希值”原语，供积压恢复使用
    /// Atomic "range the index, then hash-get each member" primitive
    /// used by backlog recovery
    pub fn zrange_hget(
        &self,
        zset_key: &str,
        min: i64,
        max: i64,
        hash_key: &str,
    ) -> Vec<(String, i64, Option<String>)> {
        let inner = self.inner.read();
        let hash = inner.hashes.get(hash_key);
        match inner.zsets.get(zset_key) {
            Some(z) => z
                .ordered
                .iter()
                .filter(|(s, _)| *s >= min && *s <= max)
                .map(|(s, m)| (m.clone(), *s, hash.and_then(|h| h.get(m).cloned())))
                .collect(),
            None => Vec::new(),
        }
    }

    // ---- set ----

    pub fn sadd(&self, key: &str, member: &str) -> bool {
        self.inner
            .write()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string())
    }

    pub fn srem(&self, key: &str, member: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.sets.get_mut(key) {
            Some(s) => {
                let removed = s.remove(member);
                if s.is_empty() {
                    inner.sets.remove(key);
                }
                removed
            }
            None => false,
        }
    }

    pub fn sismember(&self, key: &str, member: &str) -> bool {
        self.inner
            .read()
            .sets
            .get(key)
            .map_or(false, |s| s.contains(member))
    }

    pub fn smembers(&self, key: &str) -> Vec<String> {
        self.inner
            .read()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sclear(&self, key: &str) -> usize {
        self.inner.write().sets.remove(key).map_or(0, |s| s.len())
    }
}

/// 快存键约定 / Fast-store key conventions
pub mod keys {
    /// 全局在线账号集合，每账号一条，首连写入、末连清除
    /// Global online-accounts set, one entry per account
    pub const ONLINE_SET: &str = "im:online";
    /// 热消息缓存哈希：id → 消息体JSON / Hot message cache hash: id → body JSON
    pub const HOT_MSG: &str = "im:hot:msg";
    /// 本轮刷盘涉及的账号 / Accounts touched since the last flush
    pub const TOUCHED_SET: &str = "im:hot:touched";

    pub fn backlog(account_id: u64) -> String {
        format!("im:backlog:{account_id}")
    }

    pub fn hot_index(session_id: &str) -> String {
        format!("im:hot:idx:{session_id}")
    }

    pub fn room_roles(session_id: &str) -> String {
        format!("im:room:role:{session_id}")
    }

    pub fn account_sessions(account_id: u64) -> String {
        format!("im:acct:sessions:{account_id}")
    }

    pub fn reminders(account_id: u64) -> String {
        format!("im:reminder:{account_id}")
    }
}
