use crate::pending_repo::{decode_request_code, decode_settings};
use crate::util::{
    DbError, db_err, decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_millis,
    to_rfc3339,
};
use chrono::{DateTime, FixedOffset};
use rusqlite::Connection;
use tl_core::error::StoreError;
use tl_core::sessions::SessionRepository;
use tl_core::types::{Coordinates, DeviceInfo, Session, SessionId, SessionStatus};

const COLUMNS: &str = "id, request_code, name, frame_interval_secs, auto_stop_mode, auto_stop_value, status, started_at, ended_at, latitude, longitude, device_model, device_os, app_version, metadata_json";

pub struct SessionRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> SessionRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SessionRepository for SessionRepo<'_> {
    fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1"))
            .map_err(db_err)?;
        let mut rows = stmt.query([id.as_str()]).map_err(db_err)?;
        let Some(row) = rows.next().map_err(db_err)? else {
            return Err(StoreError::NotFound);
        };
        map_session_row(row)
    }

    fn get_active(&self) -> Result<Option<Session>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM sessions WHERE status = 'Active' ORDER BY started_at_ms DESC LIMIT 1"
            ))
            .map_err(db_err)?;
        let mut rows = stmt.query([]).map_err(db_err)?;
        let Some(row) = rows.next().map_err(db_err)? else {
            return Ok(None);
        };
        map_session_row(row).map(Some)
    }

    fn list(&self) -> Result<Vec<Session>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM sessions ORDER BY started_at_ms DESC"
            ))
            .map_err(db_err)?;
        let mut rows = stmt.query([]).map_err(db_err)?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            sessions.push(map_session_row(row)?);
        }
        Ok(sessions)
    }

    fn create(&self, session: &Session) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO sessions ({COLUMNS}, started_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        );
        let auto_stop_mode = encode_enum(&session.settings.auto_stop_mode())?;
        let status = encode_enum(&session.status)?;
        let metadata_json = encode_json(&session.metadata)?;
        self.conn
            .execute(
                &sql,
                rusqlite::params![
                    session.id.as_str(),
                    session.request_code.as_ref().map(|code| code.as_str()),
                    session.name,
                    session.settings.frame_interval_secs(),
                    auto_stop_mode,
                    session.settings.auto_stop_value(),
                    status,
                    to_rfc3339(&session.started_at),
                    session.ended_at.as_ref().map(to_rfc3339),
                    session.location.map(|at| at.latitude),
                    session.location.map(|at| at.longitude),
                    session.device.model,
                    session.device.os_version,
                    session.app_version,
                    metadata_json,
                    to_millis(&session.started_at),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn complete(
        &self,
        id: &SessionId,
        status: SessionStatus,
        ended_at: DateTime<FixedOffset>,
    ) -> Result<Session, StoreError> {
        let affected = self
            .conn
            .execute(
                "UPDATE sessions SET status = ?1, ended_at = ?2 WHERE id = ?3",
                (encode_enum(&status)?, to_rfc3339(&ended_at), id.as_str()),
            )
            .map_err(db_err)?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get(id)
    }
}

fn map_session_row(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    let id: String = row.get(0).map_err(db_err)?;
    let request_code: Option<String> = row.get(1).map_err(db_err)?;
    let name: String = row.get(2).map_err(db_err)?;
    let frame_interval_secs: f64 = row.get(3).map_err(db_err)?;
    let auto_stop_mode: String = row.get(4).map_err(db_err)?;
    let auto_stop_value: i64 = row.get(5).map_err(db_err)?;
    let status: String = row.get(6).map_err(db_err)?;
    let started_at: String = row.get(7).map_err(db_err)?;
    let ended_at: Option<String> = row.get(8).map_err(db_err)?;
    let latitude: Option<f64> = row.get(9).map_err(db_err)?;
    let longitude: Option<f64> = row.get(10).map_err(db_err)?;
    let device_model: String = row.get(11).map_err(db_err)?;
    let device_os: String = row.get(12).map_err(db_err)?;
    let app_version: String = row.get(13).map_err(db_err)?;
    let metadata_json: String = row.get(14).map_err(db_err)?;

    let id = SessionId::new(id).map_err(|err| DbError::InvalidRecord {
        message: err.to_string(),
    })?;
    let location = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinates {
            latitude,
            longitude,
        }),
        _ => None,
    };

    Ok(Session {
        id,
        request_code: request_code.map(decode_request_code).transpose()?,
        name,
        settings: decode_settings(frame_interval_secs, &auto_stop_mode, auto_stop_value)?,
        status: decode_enum(&status)?,
        started_at: from_rfc3339(&started_at)?,
        ended_at: ended_at.as_deref().map(from_rfc3339).transpose()?,
        location,
        device: DeviceInfo {
            model: device_model,
            os_version: device_os,
        },
        app_version,
        metadata: decode_json(&metadata_json)?,
    })
}
