use crate::util::{DbError, db_err, decode_enum, encode_enum, from_rfc3339, to_millis, to_rfc3339};
use rusqlite::{Connection, OptionalExtension};
use tl_core::error::StoreError;
use tl_core::pending::PendingRepository;
use tl_core::types::{ImagingSettings, PendingSession, RequestCode};

const COLUMNS: &str =
    "request_code, name, frame_interval_secs, auto_stop_mode, auto_stop_value, scheduled_start";

pub struct PendingRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> PendingRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl PendingRepository for PendingRepo<'_> {
    fn list(&self) -> Result<Vec<PendingSession>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM pending_sessions ORDER BY scheduled_start_ms ASC, request_code ASC"
            ))
            .map_err(db_err)?;
        let mut rows = stmt.query([]).map_err(db_err)?;
        let mut pending = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            pending.push(map_pending_row(row)?);
        }
        Ok(pending)
    }

    fn get(&self, code: &RequestCode) -> Result<Option<PendingSession>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM pending_sessions WHERE request_code = ?1"
            ))
            .map_err(db_err)?;
        let mut rows = stmt.query([code.as_str()]).map_err(db_err)?;
        let Some(row) = rows.next().map_err(db_err)? else {
            return Ok(None);
        };
        map_pending_row(row).map(Some)
    }

    fn upsert(&self, pending: &PendingSession) -> Result<(), StoreError> {
        let sql = "INSERT INTO pending_sessions (request_code, name, frame_interval_secs, auto_stop_mode, auto_stop_value, scheduled_start, scheduled_start_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) ON CONFLICT(request_code) DO UPDATE SET name = excluded.name, frame_interval_secs = excluded.frame_interval_secs, auto_stop_mode = excluded.auto_stop_mode, auto_stop_value = excluded.auto_stop_value, scheduled_start = excluded.scheduled_start, scheduled_start_ms = excluded.scheduled_start_ms";
        let params = (
            pending.request_code.as_str(),
            pending.name.as_str(),
            pending.settings.frame_interval_secs(),
            encode_enum(&pending.settings.auto_stop_mode())?,
            pending.settings.auto_stop_value(),
            to_rfc3339(&pending.scheduled_start),
            to_millis(&pending.scheduled_start),
        );
        self.conn.execute(sql, params).map_err(db_err)?;
        Ok(())
    }

    fn delete(&self, code: &RequestCode) -> Result<bool, StoreError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM pending_sessions WHERE request_code = ?1",
                [code.as_str()],
            )
            .map_err(db_err)?;
        Ok(affected > 0)
    }
}

impl PendingRepo<'_> {
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: Option<i64> = self
            .conn
            .query_row("SELECT COUNT(*) FROM pending_sessions", [], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        Ok(usize::try_from(count.unwrap_or(0)).unwrap_or(0))
    }
}

pub(crate) fn decode_settings(
    frame_interval_secs: f64,
    auto_stop_mode: &str,
    auto_stop_value: i64,
) -> Result<ImagingSettings, DbError> {
    let mode = decode_enum(auto_stop_mode)?;
    let value = u32::try_from(auto_stop_value).map_err(|_| DbError::InvalidRecord {
        message: format!("auto stop value out of range: {auto_stop_value}"),
    })?;
    ImagingSettings::new(frame_interval_secs, mode, value).map_err(|err| DbError::InvalidRecord {
        message: err.to_string(),
    })
}

pub(crate) fn decode_request_code(value: String) -> Result<RequestCode, DbError> {
    RequestCode::new(value).map_err(|err| DbError::InvalidRecord {
        message: err.to_string(),
    })
}

fn map_pending_row(row: &rusqlite::Row<'_>) -> Result<PendingSession, StoreError> {
    let request_code: String = row.get(0).map_err(db_err)?;
    let name: String = row.get(1).map_err(db_err)?;
    let frame_interval_secs: f64 = row.get(2).map_err(db_err)?;
    let auto_stop_mode: String = row.get(3).map_err(db_err)?;
    let auto_stop_value: i64 = row.get(4).map_err(db_err)?;
    let scheduled_start: String = row.get(5).map_err(db_err)?;

    Ok(PendingSession {
        request_code: decode_request_code(request_code)?,
        name,
        settings: decode_settings(frame_interval_secs, &auto_stop_mode, auto_stop_value)?,
        scheduled_start: from_rfc3339(&scheduled_start)?,
    })
}
