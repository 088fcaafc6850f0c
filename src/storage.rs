use crate::api::models::ChatMessage;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn db_path() -> Option<PathBuf> {
    crate::app::data_dir().map(|dir| dir.join("history.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn open_conn() -> rusqlite::Result<Connection> {
    let path = db_path().ok_or_else(|| rusqlite::Error::InvalidPath("no data dir".into()))?;
    let _ = ensure_dir(&path);
    Connection::open(path)
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            phone TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT,
            from_me INTEGER NOT NULL,
            timestamp INTEGER,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (phone, id)
        );
        CREATE INDEX IF NOT EXISTS messages_by_phone ON messages (phone, timestamp);
        "#,
    )
}

// Chat history is cached so the side panel has something to show while a
// profile is offline.
pub fn init() -> Result<(), String> {
    let conn = open_conn().map_err(|e| e.to_string())?;
    conn.execute_batch("PRAGMA journal_mode = WAL;").map_err(|e| e.to_string())?;
    init_schema(&conn).map_err(|e| e.to_string())
}

pub fn cache_messages(phone: &str, messages: &[ChatMessage]) -> Result<(), String> {
    let mut conn = open_conn().map_err(|e| e.to_string())?;
    store_messages(&mut conn, phone, messages).map_err(|e| e.to_string())
}

pub fn cached_messages(phone: &str, limit: usize) -> Result<Vec<ChatMessage>, String> {
    let conn = open_conn().map_err(|e| e.to_string())?;
    load_messages(&conn, phone, limit).map_err(|e| e.to_string())
}

fn store_messages(conn: &mut Connection, phone: &str, messages: &[ChatMessage]) -> rusqlite::Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    let tx = conn.transaction()?;
    for m in messages.iter().filter(|m| !m.id.is_empty()) {
        tx.execute(
            r#"
            INSERT INTO messages (phone, id, body, from_me, timestamp, cached_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(phone, id) DO UPDATE SET
                body=excluded.body,
                timestamp=excluded.timestamp,
                cached_at=excluded.cached_at
            "#,
            params![phone, m.id, m.body, m.from_me, m.timestamp, now],
        )?;
    }
    tx.commit()
}

/// Most recent `limit` messages, returned oldest first like the server does.
fn load_messages(conn: &Connection, phone: &str, limit: usize) -> rusqlite::Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, body, from_me, timestamp FROM messages
         WHERE phone = ?1 ORDER BY timestamp DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![phone, limit as i64], |row| {
        Ok(ChatMessage {
            id: row.get(0)?,
            body: row.get(1)?,
            from_me: row.get(2)?,
            timestamp: row.get(3)?,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    out.reverse();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, body: &str, ts: i64) -> ChatMessage {
        ChatMessage { id: id.into(), body: Some(body.into()), from_me: ts % 2 == 0, timestamp: Some(ts) }
    }

    #[test]
    fn caches_and_returns_latest_in_order() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let batch: Vec<ChatMessage> = (1..=5).map(|i| msg(&format!("m{i}"), &format!("body {i}"), 100 + i)).collect();
        store_messages(&mut conn, "5511999990000", &batch).unwrap();

        let latest = load_messages(&conn, "5511999990000", 3).unwrap();
        let ids: Vec<&str> = latest.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m4", "m5"]);
        assert!(load_messages(&conn, "other", 10).unwrap().is_empty());
    }

    #[test]
    fn upsert_replaces_edited_bodies() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        store_messages(&mut conn, "p", &[msg("a", "first", 10)]).unwrap();
        store_messages(&mut conn, "p", &[msg("a", "edited", 10), msg("", "no id", 11)]).unwrap();
        let all = load_messages(&conn, "p", 10).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].body.as_deref(), Some("edited"));
    }
}
