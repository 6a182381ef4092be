//! 去重过滤：N个布隆过滤器成环，定时淘汰最旧分片，
//! 形成有界内存的近似滑动窗口
//! Dedup filter: a ring of N bloom shards; the oldest rotates out on a
//! fixed interval, giving a sliding window in bounded memory

use fastbloom::BloomFilter;
use parking_lot::RwLock;
use std::collections::VecDeque;

const SHARD_HASHES: u32 = 4;

pub struct DedupRing {
    shards: RwLock<VecDeque<BloomFilter>>,
    num_bits: usize,
}

impl DedupRing {
    pub fn new(shard_count: usize, num_bits: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = VecDeque::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push_back(Self::fresh(num_bits));
        }
        Self {
            shards: RwLock::new(shards),
            num_bits,
        }
    }

    fn fresh(num_bits: usize) -> BloomFilter {
        BloomFilter::with_num_bits(num_bits).hashes(SHARD_HASHES)
    }

    /// 首见返回true并登记；窗口内重复一律返回false。
    /// 允许误杀（假阳性），绝不放过窗口内的重复。
    /// Returns true for a first sighting and records it; duplicates within
    /// the window always return false. False positives are acceptable,
    /// false negatives within the window are not.
    pub fn check(&self, id: i64) -> bool {
        {
            let shards = self.shards.read();
            if shards.iter().any(|s| s.contains(&id)) {
                return false;
            }
        }
        let mut shards = self.shards.write();
        // 写锁下复查，两个并发首见只能有一个胜出
        // Re-check under the write lock; only one concurrent first sighting wins
        if shards.iter().any(|s| s.contains(&id)) {
            return false;
        }
        if let Some(newest) = shards.back_mut() {
            newest.insert(&id);
        }
        true
    }

    /// 淘汰最旧分片，补一个空分片 / Drop the oldest shard, append a fresh one
    pub fn rotate(&self) {
        let mut shards = self.shards.write();
        shards.pop_front();
        shards.push_back(Self::fresh(self.num_bits));
    }

    pub fn shard_count(&self) -> usize {
        self.shards.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_then_duplicate() {
        let ring = DedupRing::new(5, 1 << 16);
        assert!(ring.check(42));
        assert!(!ring.check(42));
        assert!(!ring.check(42));
    }

    #[test]
    fn full_rotation_may_forget() {
        let ring = DedupRing::new(3, 1 << 16);
        assert!(ring.check(7));
        for _ in 0..3 {
            ring.rotate();
        }
        // 窗口整体滚过后允许再次判为新 / After a full cycle the ID may read as new again
        assert!(ring.check(7));
    }

    #[test]
    fn rotation_keeps_ring_size() {
        let ring = DedupRing::new(4, 1 << 12);
        for _ in 0..10 {
            ring.rotate();
        }
        assert_eq!(ring.shard_count(), 4);
    }

    #[test]
    fn entries_survive_partial_rotation() {
        let ring = DedupRing::new(3, 1 << 16);
        assert!(ring.check(99));
        ring.rotate();
        ring.rotate();
        // 最新分片仍然持有 / Still held by the newest shard
        assert!(!ring.check(99));
    }
}
