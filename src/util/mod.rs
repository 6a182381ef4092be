use parking_lot::Mutex;

// 2020-01-01T00:00:00Z，41位毫秒可用约69年
// Custom epoch, 41 bits of milliseconds last ~69 years
const EPOCH_MS: i64 = 1_577_836_800_000;
const NODE_BITS: u8 = 10;
const SEQ_BITS: u8 = 12;
const NODE_MASK: u16 = (1 << NODE_BITS) - 1;
const SEQ_MASK: u16 = (1 << SEQ_BITS) - 1;

/// 集群唯一ID生成器：时间戳+节点+序列位拼接的64位ID
/// Cluster-unique ID generator: time + node + sequence bit-packed 64-bit IDs
pub struct IdGenerator {
    node_id: u16,
    state: Mutex<(i64, u16)>, // (last_ms, sequence)
}

impl IdGenerator {
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: node_id & NODE_MASK,
            state: Mutex::new((0, 0)),
        }
    }

    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock();
        let (last_ms, seq) = *state;
        let mut now = chrono::Utc::now().timestamp_millis();
        // 时钟回拨时沿用上次时间戳，靠序列位顶住
        // A backwards clock reuses the last timestamp and leans on the sequence
        if now < last_ms {
            now = last_ms;
        }
        let next_seq = if now == last_ms {
            let s = seq.wrapping_add(1) & SEQ_MASK;
            if s == 0 {
                // 本毫秒序列耗尽，等待下一毫秒 / Sequence exhausted, wait out the millisecond
                while now <= last_ms {
                    now = chrono::Utc::now().timestamp_millis().max(last_ms + 1);
                }
            }
            s
        } else {
            0
        };
        *state = (now, next_seq);
        ((now - EPOCH_MS) << (NODE_BITS + SEQ_BITS))
            | ((self.node_id as i64) << SEQ_BITS)
            | next_seq as i64
    }

    /// 从ID还原毫秒时间戳 / Extract the millisecond timestamp from an ID
    pub fn timestamp_of(id: i64) -> i64 {
        (id >> (NODE_BITS + SEQ_BITS)) + EPOCH_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_increasing() {
        let gen = IdGenerator::new(7);
        let mut seen = HashSet::new();
        let mut last = 0i64;
        for _ in 0..10_000 {
            let id = gen.next_id();
            assert!(id > last, "ids must be strictly increasing");
            assert!(seen.insert(id));
            last = id;
        }
    }

    #[test]
    fn timestamp_round_trips() {
        let gen = IdGenerator::new(3);
        let before = chrono::Utc::now().timestamp_millis();
        let id = gen.next_id();
        let ts = IdGenerator::timestamp_of(id);
        assert!(ts >= before && ts <= before + 1000);
    }

    #[test]
    fn node_bits_are_masked() {
        let gen = IdGenerator::new(u16::MAX);
        let id = gen.next_id();
        let node = (id >> SEQ_BITS) & NODE_MASK as i64;
        assert_eq!(node, NODE_MASK as i64);
    }
}
