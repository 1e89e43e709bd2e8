//! SQLite 状态存储
//!
//! 使用 rusqlite（同步）存储会话状态、对话历史与事件日志；所有数据库操作经
//! `spawn_blocking` 执行，避免阻塞 tokio 工作线程。状态以 JSON 整体写入一行，
//! 与内存实现一样是整体替换语义。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::{EventQuery, SessionEvent, Severity, StateStore, StoreError};
use crate::memory::{Message, Role};
use crate::spec::{MissingField, SessionState};

/// SQLite 持久化存储
#[derive(Clone)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// 打开（或创建）数据库文件并初始化表结构
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Task(e.to_string()))?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Task("connection mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn init_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_state (
            session_id TEXT PRIMARY KEY,
            state_json TEXT NOT NULL DEFAULT '{}',
            missing_json TEXT NOT NULL DEFAULT '[]',
            stage TEXT,
            progress INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS session_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS session_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            severity TEXT NOT NULL,
            source TEXT NOT NULL,
            description TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_session_messages_session ON session_messages(session_id);
        CREATE INDEX IF NOT EXISTS idx_session_events_session ON session_events(session_id);",
    )?;
    Ok(())
}

/// 确保 session_state 行存在
fn ensure_row(conn: &Connection, session_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO session_state (session_id, updated_at) VALUES (?1, ?2)",
        params![session_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_current_state(&self, session_id: &str) -> Result<Arc<SessionState>, StoreError> {
        let session_id = session_id.to_string();
        self.run(move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT state_json FROM session_state WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?;
            let state = match json {
                Some(j) => serde_json::from_str(&j)?,
                None => SessionState::new(),
            };
            Ok(Arc::new(state))
        })
        .await
    }

    async fn put_state(&self, session_id: &str, state: Arc<SessionState>) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        let json = serde_json::to_string(state.as_ref())?;
        self.run(move |conn| {
            ensure_row(conn, &session_id)?;
            conn.execute(
                "UPDATE session_state SET state_json = ?1, updated_at = ?2 WHERE session_id = ?3",
                params![json, Utc::now().to_rfc3339(), session_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn put_missing_fields(
        &self,
        session_id: &str,
        missing: &[MissingField],
    ) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        let json = serde_json::to_string(missing)?;
        self.run(move |conn| {
            ensure_row(conn, &session_id)?;
            conn.execute(
                "UPDATE session_state SET missing_json = ?1, updated_at = ?2 WHERE session_id = ?3",
                params![json, Utc::now().to_rfc3339(), session_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn put_stage(&self, session_id: &str, stage: &str, progress: u8) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        let stage = stage.to_string();
        self.run(move |conn| {
            ensure_row(conn, &session_id)?;
            conn.execute(
                "UPDATE session_state SET stage = ?1, progress = ?2, updated_at = ?3 WHERE session_id = ?4",
                params![stage, progress, Utc::now().to_rfc3339(), session_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        let messages = messages.to_vec();
        self.run(move |conn| {
            let now = Utc::now().to_rfc3339();
            for m in &messages {
                conn.execute(
                    "INSERT INTO session_messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![session_id, m.role.as_str(), m.content, now],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let session_id = session_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, content FROM session_messages WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![session_id, limit as i64], |row| {
                let role: String = row.get(0)?;
                let content: String = row.get(1)?;
                Ok(Message {
                    role: Role::parse(&role),
                    content,
                })
            })?;
            let mut messages = rows.collect::<Result<Vec<_>, _>>()?;
            messages.reverse();
            Ok(messages)
        })
        .await
    }

    async fn log_event(&self, session_id: &str, event: SessionEvent) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        let payload = serde_json::to_string(&event.payload)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO session_events (session_id, kind, severity, source, description, payload_json, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session_id,
                    event.kind,
                    event.severity.as_str(),
                    event.source,
                    event.description,
                    payload,
                    event.timestamp.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn events(&self, session_id: &str, query: &EventQuery) -> Result<Vec<SessionEvent>, StoreError> {
        let session_id = session_id.to_string();
        let query = query.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, severity, source, description, payload_json, timestamp
                 FROM session_events WHERE session_id = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;

            let mut events = Vec::new();
            for row in rows {
                let (kind, severity, source, description, payload, timestamp) = row?;
                let event = SessionEvent {
                    kind,
                    severity: Severity::parse(&severity).unwrap_or(Severity::Info),
                    source,
                    description,
                    payload: serde_json::from_str(&payload)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                };
                if query.matches(&event) {
                    events.push(event);
                    if events.len() >= query.limit {
                        break;
                    }
                }
            }
            Ok(events)
        })
        .await
    }
}
