//! 冷存储：刷盘任务批量写入的持久层
//! Durable store: the permanent tier fed by the batched flush job

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::domain::message::ChatMessage;

/// 持久层接口，便于测试替换 / Durable tier trait for test substitution
pub trait DurableStore: Send + Sync {
    /// 批量写入刷盘消息 / Batched insert of flushed messages
    fn insert_messages(&self, batch: &[ChatMessage]) -> Result<usize>;
    fn fetch_messages(&self, ids: &[i64]) -> Result<Vec<ChatMessage>>;
    /// 闭区间时间范围查询 / Inclusive [from_ms, to_ms] range query
    fn fetch_session_range(
        &self,
        session_id: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<ChatMessage>>;
    fn upsert_member(&self, session_id: &str, account_id: u64, level: i8) -> Result<()>;
    fn delete_member(&self, session_id: &str, account_id: u64) -> Result<()>;
    /// 房间、成员、消息整体清除 / Point deletes for room teardown
    fn delete_session(&self, session_id: &str) -> Result<()>;
    fn sessions_for(&self, account_id: u64) -> Result<Vec<String>>;
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogRecord {
    Message {
        msg: ChatMessage,
    },
    Member {
        session_id: String,
        account_id: u64,
        level: i8,
    },
    DelMember {
        session_id: String,
        account_id: u64,
    },
    DelSession {
        session_id: String,
    },
}

#[derive(Default)]
struct State {
    messages: BTreeMap<i64, ChatMessage>,
    members: HashMap<String, HashMap<u64, i8>>,
}

impl State {
    fn apply(&mut self, rec: LogRecord) {
        match rec {
            LogRecord::Message { msg } => {
                self.messages.insert(msg.id, msg);
            }
            LogRecord::Member {
                session_id,
                account_id,
                level,
            } => {
                self.members
                    .entry(session_id)
                    .or_default()
                    .insert(account_id, level);
            }
            LogRecord::DelMember {
                session_id,
                account_id,
            } => {
                if let Some(m) = self.members.get_mut(&session_id) {
                    m.remove(&account_id);
                    if m.is_empty() {
                        self.members.remove(&session_id);
                    }
                }
            }
            LogRecord::DelSession { session_id } => {
                self.members.remove(&session_id);
                self.messages.retain(|_, m| m.session_id != session_id);
            }
        }
    }
}

/// 追加日志式文件存储：启动时重放日志重建索引
/// Append-only file store; the log is replayed at open to rebuild indexes
pub struct FileStore {
    path: PathBuf,
    state: RwLock<State>,
    log: Mutex<File>,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create data dir {:?}", dir))?;
        let path = dir.join("relay-im.log");
        let mut state = State::default();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogRecord>(&line) {
                    Ok(rec) => state.apply(rec),
                    Err(e) => tracing::warn!("skipping corrupt log line: {}", e),
                }
            }
        }
        let log = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            state: RwLock::new(state),
            log: Mutex::new(log),
        })
    }

    /// 测试与临时运行用 / For tests and throwaway runs
    pub fn open_temporary() -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("relay-im-{}", uuid::Uuid::new_v4()));
        Self::open(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, records: &[LogRecord]) -> Result<()> {
        let mut log = self.log.lock();
        let mut buf = String::new();
        for rec in records {
            buf.push_str(&serde_json::to_string(rec)?);
            buf.push('\n');
        }
        log.write_all(buf.as_bytes())?;
        log.flush()?;
        Ok(())
    }
}

impl DurableStore for FileStore {
    fn insert_messages(&self, batch: &[ChatMessage]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let records: Vec<LogRecord> = batch
            .iter()
            .map(|m| LogRecord::Message { msg: m.clone() })
            .collect();
        self.append(&records)?;
        let mut state = self.state.write();
        for m in batch {
            state.messages.insert(m.id, m.clone());
        }
        Ok(batch.len())
    }

    fn fetch_messages(&self, ids: &[i64]) -> Result<Vec<ChatMessage>> {
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.messages.get(id).cloned())
            .collect())
    }

    fn fetch_session_range(
        &self,
        session_id: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<ChatMessage>> {
        let state = self.state.read();
        let mut rows: Vec<ChatMessage> = state
            .messages
            .values()
            .filter(|m| {
                m.session_id == session_id && m.created_at >= from_ms && m.created_at <= to_ms
            })
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.created_at, m.id));
        Ok(rows)
    }

    fn upsert_member(&self, session_id: &str, account_id: u64, level: i8) -> Result<()> {
        self.append(&[LogRecord::Member {
            session_id: session_id.to_string(),
            account_id,
            level,
        }])?;
        self.state
            .write()
            .members
            .entry(session_id.to_string())
            .or_default()
            .insert(account_id, level);
        Ok(())
    }

    fn delete_member(&self, session_id: &str, account_id: u64) -> Result<()> {
        self.append(&[LogRecord::DelMember {
            session_id: session_id.to_string(),
            account_id,
        }])?;
        self.state.write().apply(LogRecord::DelMember {
            session_id: session_id.to_string(),
            account_id,
        });
        Ok(())
    }

    fn delete_session(&self, session_id: &str) -> Result<()> {
        self.append(&[LogRecord::DelSession {
            session_id: session_id.to_string(),
        }])?;
        self.state.write().apply(LogRecord::DelSession {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    fn sessions_for(&self, account_id: u64) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(state
            .members
            .iter()
            .filter(|(_, members)| members.contains_key(&account_id))
            .map(|(sid, _)| sid.clone())
            .collect())
    }
}
