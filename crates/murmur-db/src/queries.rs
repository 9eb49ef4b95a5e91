use crate::Database;
use crate::models::MessageRow;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const MESSAGE_COLUMNS: &str = "id, content, sender, timestamp";

impl Database {
    /// Insert a message, assigning its id (AUTOINCREMENT, never reused) and
    /// timestamp. Returns the stored row.
    pub fn create_message(&self, content: &str, sender: &str) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let timestamp = chrono::Utc::now().timestamp_millis();
            conn.execute(
                "INSERT INTO messages (content, sender, timestamp) VALUES (?1, ?2, ?3)",
                rusqlite::params![content, sender, timestamp],
            )?;

            Ok(MessageRow {
                id: conn.last_insert_rowid(),
                content: content.to_string(),
                sender: sender.to_string(),
                timestamp,
            })
        })
    }

    /// One page of messages with id greater than `after`, ascending.
    /// `sender` narrows to an exact sender match.
    pub fn get_messages_after(
        &self,
        after: i64,
        sender: Option<&str>,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages_after(conn, after, sender, limit))
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                    [id],
                    map_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// The newest `limit` messages, returned oldest first.
    pub fn get_recent_messages(&self, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages ORDER BY id DESC LIMIT ?1",
                MESSAGE_COLUMNS
            ))?;

            let mut rows = stmt
                .query_map([limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();

            Ok(rows)
        })
    }

    pub fn count_messages(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

fn query_messages_after(
    conn: &Connection,
    after: i64,
    sender: Option<&str>,
    limit: u32,
) -> Result<Vec<MessageRow>> {
    let rows = match sender {
        Some(sender) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE sender = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
                MESSAGE_COLUMNS
            ))?;
            stmt.query_map(rusqlite::params![sender, after, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
                MESSAGE_COLUMNS
            ))?;
            stmt.query_map(rusqlite::params![after, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok(rows)
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        content: row.get(1)?,
        sender: row.get(2)?,
        timestamp: row.get(3)?,
    })
}
