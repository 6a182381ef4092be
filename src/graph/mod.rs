//! 社交关系门禁：每账号两个压缩位图（关注/被关注）加一个拉黑位图，
//! 互相关注即为好友
//! Social graph gate: two compressed bitsets per account (following /
//! followed-by) plus a block bitset; friendship is mutual follow

use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use dashmap::DashSet;
use parking_lot::Mutex;
use roaring::RoaringTreemap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use crate::error::ImError;

#[derive(Default)]
struct AccountSets {
    following: RoaringTreemap,
    followed_by: RoaringTreemap,
    blocked: RoaringTreemap,
}

#[derive(Default)]
pub struct SocialGraph {
    accounts: DashMap<u64, Arc<Mutex<AccountSets>>>,
}

impl SocialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, account_id: u64) -> Arc<Mutex<AccountSets>> {
        self.accounts
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(AccountSets::default())))
            .clone()
    }

    /// 涉及两个账号锁的操作一律按账号ID升序加锁，杜绝环路等待
    /// Any two-account operation locks in ascending account-ID order,
    /// ruling out circular wait
    fn with_pair<R>(
        &self,
        a: u64,
        b: u64,
        f: impl FnOnce(&mut AccountSets, &mut AccountSets) -> R,
    ) -> R {
        debug_assert_ne!(a, b);
        let ha = self.handle(a);
        let hb = self.handle(b);
        if a < b {
            let mut ga = ha.lock();
            let mut gb = hb.lock();
            f(&mut ga, &mut gb)
        } else {
            let mut gb = hb.lock();
            let mut ga = ha.lock();
            f(&mut ga, &mut gb)
        }
    }

    pub fn follow(&self, follower: u64, target: u64) {
        if follower == target {
            return;
        }
        self.with_pair(follower, target, |f, t| {
            f.following.insert(target);
            t.followed_by.insert(follower);
        });
    }

    pub fn unfollow(&self, follower: u64, target: u64) {
        if follower == target {
            return;
        }
        self.with_pair(follower, target, |f, t| {
            f.following.remove(target);
            t.followed_by.remove(follower);
        });
    }

    pub fn is_following(&self, follower: u64, target: u64) -> bool {
        self.handle(follower).lock().following.contains(target)
    }

    /// 好友 = 互相关注，单账号视角即可判定，天然对称
    /// Friends = mutual follow; decidable from one account's view, symmetric
    pub fn are_friends(&self, a: u64, b: u64) -> bool {
        if a == b {
            return false;
        }
        let sets = self.handle(a);
        let guard = sets.lock();
        guard.following.contains(b) && guard.followed_by.contains(b)
    }

    pub fn block(&self, account_id: u64, target: u64) {
        if account_id == target {
            return;
        }
        self.handle(account_id).lock().blocked.insert(target);
    }

    pub fn unblock(&self, account_id: u64, target: u64) {
        self.handle(account_id).lock().blocked.remove(target);
    }

    pub fn has_blocked(&self, account_id: u64, target: u64) -> bool {
        self.handle(account_id).lock().blocked.contains(target)
    }

    // ---- snapshot ----

    const MAGIC: &'static [u8; 8] = b"RIMGRAF1";

    /// 全量快照写盘：写临时文件后原子改名
    /// Full snapshot: write to a temp file, then rename atomically
    pub fn snapshot<P: AsRef<Path>>(&self, path: P) -> Result<(), ImError> {
        self.write_snapshot(path.as_ref())
            .map_err(|e| ImError::GraphPersistence(e.to_string()))
    }

    fn write_snapshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            w.write_all(Self::MAGIC)?;
            let ids: Vec<u64> = self.accounts.iter().map(|e| *e.key()).collect();
            w.write_all(&(ids.len() as u64).to_le_bytes())?;
            for id in ids {
                let sets = self.handle(id);
                let guard = sets.lock();
                w.write_all(&id.to_le_bytes())?;
                for map in [&guard.following, &guard.followed_by, &guard.blocked] {
                    let mut buf = Vec::new();
                    map.serialize_into(&mut buf)?;
                    w.write_all(&(buf.len() as u64).to_le_bytes())?;
                    w.write_all(&buf)?;
                }
            }
            w.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// 启动时重载快照；文件不存在视为空图
    /// Reload at startup; a missing file means an empty graph
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImError> {
        Self::read_snapshot(path.as_ref()).map_err(|e| ImError::GraphPersistence(e.to_string()))
    }

    fn read_snapshot(path: &Path) -> Result<Self> {
        let graph = Self::new();
        if !path.exists() {
            return Ok(graph);
        }
        let mut r = BufReader::new(File::open(path).with_context(|| format!("open {:?}", path))?);
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != Self::MAGIC {
            bail!("unrecognized graph snapshot header");
        }
        let count = read_u64(&mut r)?;
        for _ in 0..count {
            let id = read_u64(&mut r)?;
            let mut maps = Vec::with_capacity(3);
            for _ in 0..3 {
                let len = read_u64(&mut r)? as usize;
                let mut buf = vec![0u8; len];
                r.read_exact(&mut buf)?;
                maps.push(RoaringTreemap::deserialize_from(&buf[..])?);
            }
            let blocked = maps.pop().unwrap();
            let followed_by = maps.pop().unwrap();
            let following = maps.pop().unwrap();
            graph.accounts.insert(
                id,
                Arc::new(Mutex::new(AccountSets {
                    following,
                    followed_by,
                    blocked,
                })),
            );
        }
        Ok(graph)
    }
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// 陌生人限流：未互关前对同一收件人只允许一条未回复消息。
/// 前端尚未支持，默认由开关关闭。
/// Stranger throttle: one outstanding message to a non-friend until they
/// reply. Feature-flagged off until the frontend supports it.
pub struct StrangerPolicy {
    enabled: bool,
    outstanding: DashSet<(u64, u64)>,
}

impl StrangerPolicy {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            outstanding: DashSet::new(),
        }
    }

    /// 放行则记账，拒绝返回false / Returns false when the send must be rejected
    pub fn allow_send(&self, graph: &SocialGraph, sender: u64, recipient: u64) -> bool {
        if !self.enabled || graph.are_friends(sender, recipient) {
            return true;
        }
        if self.outstanding.contains(&(sender, recipient)) {
            return false;
        }
        self.outstanding.insert((sender, recipient));
        true
    }

    /// 收件人回话即解除限制 / A reply from the recipient clears the mark
    pub fn on_reply(&self, replier: u64, original_sender: u64) {
        self.outstanding.remove(&(original_sender, replier));
    }
}
