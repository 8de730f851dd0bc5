use crate::types::{EventRecord, EventSource};
use rusqlite::{Connection, OptionalExtension, Result, params};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL UNIQUE,
    at TEXT NOT NULL,
    request_code TEXT,
    source TEXT NOT NULL,
    body_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_request_code ON events(request_code);";

/// Append-only audit log of scheduler events.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Stores the record under the next sequence number and returns it with `seq` set.
    pub fn append(&self, mut event: EventRecord) -> Result<EventRecord> {
        let last: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM events", [], |row| row.get(0))
            .optional()?
            .flatten();
        event.seq = last.unwrap_or(0) + 1;
        self.conn.execute(
            "INSERT INTO events (id, seq, at, request_code, source, body_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id,
                event.seq,
                event.at.to_rfc3339(),
                event.request_code,
                event.source.as_str(),
                event.body.to_string(),
            ],
        )?;
        Ok(event)
    }

    pub fn list(&self, after: Option<i64>, limit: Option<u32>) -> Result<Vec<EventRecord>> {
        let mut sql = String::from(
            "SELECT id, seq, at, request_code, source, body_json FROM events",
        );
        let mut params_vec: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(after_seq) = after {
            sql.push_str(" WHERE seq > ?");
            params_vec.push(after_seq.into());
        }
        sql.push_str(" ORDER BY seq ASC");
        if let Some(limit_val) = limit {
            sql.push_str(" LIMIT ?");
            params_vec.push(i64::from(limit_val).into());
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_vec), row_to_event)?;
        rows.collect()
    }

    pub fn for_request(&self, request_code: &str) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, seq, at, request_code, source, body_json FROM events WHERE request_code = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([request_code], row_to_event)?;
        rows.collect()
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
    let at: String = row.get(2)?;
    let source: String = row.get(4)?;
    let body: String = row.get(5)?;
    Ok(EventRecord {
        id: row.get(0)?,
        seq: row.get(1)?,
        at: chrono::DateTime::parse_from_rfc3339(&at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    Box::new(err),
                )
            })?,
        request_code: row.get(3)?,
        source: EventSource::parse(&source).unwrap_or(EventSource::Api),
        body: serde_json::from_str(&body).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(err))
        })?,
    })
}
