use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::mesh::{NodeInfo, NodeNum};
use crate::state::{AckState, ChannelId};

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub num: NodeNum,
    pub long_name: String,
    pub short_name: String,
    pub hw_model: String,
    pub role: String,
    pub public_key: String,
    pub chat_archived: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub channel: ChannelId,
    pub user_id: NodeNum,
    pub text: String,
    pub timestamp: i64,
    pub ack: Option<AckState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Short,
    Long,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("storage: open in-memory database")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    /// Records identity fields for a node. The archive flag is left alone.
    pub fn upsert_node(&self, node: &NodeInfo) -> Result<()> {
        let user = node.user.clone().unwrap_or_default();
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO nodes (num, long_name, short_name, hw_model, role, public_key, chat_archived, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
ON CONFLICT(num) DO UPDATE SET
  long_name = excluded.long_name,
  short_name = excluded.short_name,
  hw_model = excluded.hw_model,
  role = excluded.role,
  public_key = excluded.public_key,
  updated_at = excluded.updated_at
"#,
            params![
                node.num,
                user.long_name,
                user.short_name,
                user.hw_model,
                user.role,
                user.public_key,
                Utc::now().timestamp(),
            ],
        )
        .context("storage: upsert node")?;
        Ok(())
    }

    pub fn get_node(&self, num: NodeNum) -> Result<Option<StoredNode>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT num, long_name, short_name, hw_model, role, public_key, chat_archived
FROM nodes
WHERE num = ?1
"#,
            params![num],
            node_from_row,
        )
        .optional()
        .context("storage: query node")
    }

    pub fn display_name(&self, num: NodeNum, kind: NameKind) -> Result<Option<String>> {
        let node = self.get_node(num)?;
        Ok(node
            .map(|n| match kind {
                NameKind::Short => n.short_name,
                NameKind::Long => n.long_name,
            })
            .filter(|name| !name.is_empty()))
    }

    pub fn is_archived(&self, num: NodeNum) -> Result<bool> {
        Ok(self
            .get_node(num)?
            .map(|n| n.chat_archived)
            .unwrap_or(false))
    }

    pub fn set_archived(&self, num: NodeNum, archived: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO nodes (num, chat_archived, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(num) DO UPDATE SET
  chat_archived = excluded.chat_archived,
  updated_at = excluded.updated_at
"#,
            params![num, archived, Utc::now().timestamp()],
        )
        .context("storage: set chat archived")?;
        Ok(())
    }

    pub fn delete_node(&self, num: NodeNum) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM nodes WHERE num = ?1", params![num])
            .context("storage: delete node")?;
        Ok(())
    }

    /// Persists a message and returns its timestamp, which together with the
    /// channel and text identifies the row for later ack updates.
    pub fn save_message(
        &self,
        channel: &ChannelId,
        user_id: NodeNum,
        text: &str,
        ack: Option<AckState>,
    ) -> Result<i64> {
        self.save_message_at(channel, user_id, text, ack, Utc::now().timestamp())
    }

    pub fn save_message_at(
        &self,
        channel: &ChannelId,
        user_id: NodeNum,
        text: &str,
        ack: Option<AckState>,
        timestamp: i64,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO messages (channel_id, user_id, message_text, timestamp, ack_type)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
            params![
                channel.storage_key(),
                user_id,
                text,
                timestamp,
                ack.map(AckState::as_str),
            ],
        )
        .context("storage: save message")?;
        Ok(timestamp)
    }

    pub fn update_ack_state(
        &self,
        channel: &ChannelId,
        timestamp: i64,
        text: &str,
        ack: AckState,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
UPDATE messages SET ack_type = ?1
WHERE channel_id = ?2 AND timestamp = ?3 AND message_text = ?4
"#,
            params![ack.as_str(), channel.storage_key(), timestamp, text],
        )
        .context("storage: update ack state")?;
        Ok(())
    }

    /// All stored messages, oldest first.
    pub fn load_messages(&self) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT channel_id, user_id, message_text, timestamp, ack_type
FROM messages
ORDER BY timestamp ASC, id ASC
"#,
        )?;
        let rows = stmt
            .query_map([], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("storage: load messages")?;
        Ok(rows)
    }
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<StoredNode> {
    Ok(StoredNode {
        num: row.get(0)?,
        long_name: row.get(1)?,
        short_name: row.get(2)?,
        hw_model: row.get(3)?,
        role: row.get(4)?,
        public_key: row.get(5)?,
        chat_archived: row.get(6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let channel: String = row.get(0)?;
    let ack: Option<String> = row.get(4)?;
    Ok(StoredMessage {
        channel: ChannelId::from_storage_key(&channel),
        user_id: row.get(1)?,
        text: row.get(2)?,
        timestamp: row.get(3)?,
        ack: ack.as_deref().and_then(AckState::parse),
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .with_context(|| format!("storage: apply migration {version}"))?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![r#"
CREATE TABLE IF NOT EXISTS nodes (
  num INTEGER PRIMARY KEY,
  long_name TEXT NOT NULL DEFAULT '',
  short_name TEXT NOT NULL DEFAULT '',
  hw_model TEXT NOT NULL DEFAULT '',
  role TEXT NOT NULL DEFAULT '',
  public_key TEXT NOT NULL DEFAULT '',
  chat_archived INTEGER NOT NULL DEFAULT 0,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  channel_id TEXT NOT NULL,
  user_id INTEGER NOT NULL,
  message_text TEXT NOT NULL,
  timestamp INTEGER NOT NULL,
  ack_type TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_channel_ts ON messages(channel_id, timestamp);
"#]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("mesh-tui").join("messages.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::User;
    use tempfile::tempdir;

    fn node(num: NodeNum, long: &str, short: &str) -> NodeInfo {
        NodeInfo {
            num,
            user: Some(User {
                long_name: long.into(),
                short_name: short.into(),
                ..User::default()
            }),
            ..NodeInfo::default()
        }
    }

    #[test]
    fn open_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("messages.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn reopening_does_not_rerun_migrations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        store.upsert_node(&node(1, "Base", "BASE")).unwrap();
        store.close().unwrap();

        let store = Store::open(Options { path: Some(path) }).unwrap();
        assert_eq!(
            store.display_name(1, NameKind::Short).unwrap().as_deref(),
            Some("BASE")
        );
    }

    #[test]
    fn upsert_keeps_archive_flag() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_node(&node(9, "Hill", "HILL")).unwrap();
        store.set_archived(9, true).unwrap();
        store.upsert_node(&node(9, "Hill Top", "HT")).unwrap();

        let stored = store.get_node(9).unwrap().unwrap();
        assert!(stored.chat_archived);
        assert_eq!(stored.long_name, "Hill Top");
        assert!(!store.is_archived(10).unwrap());
    }

    #[test]
    fn ack_update_targets_matching_row() {
        let store = Store::open_in_memory().unwrap();
        let channel = ChannelId::Named("general".into());
        store
            .save_message_at(&channel, 1, "hi", Some(AckState::Pending), 100)
            .unwrap();
        store
            .save_message_at(&channel, 1, "again", Some(AckState::Pending), 100)
            .unwrap();
        store
            .update_ack_state(&channel, 100, "hi", AckState::Acked)
            .unwrap();

        let messages = store.load_messages().unwrap();
        assert_eq!(messages[0].ack, Some(AckState::Acked));
        assert_eq!(messages[1].ack, Some(AckState::Pending));
    }

    #[test]
    fn direct_channels_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let ts = store
            .save_message_at(&ChannelId::Direct(0xAABBCCDD), 0xAABBCCDD, "yo", None, 5)
            .unwrap();
        assert_eq!(ts, 5);
        let messages = store.load_messages().unwrap();
        assert_eq!(messages[0].channel, ChannelId::Direct(0xAABBCCDD));
        assert_eq!(messages[0].ack, None);
    }
}
