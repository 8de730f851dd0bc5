use crate::util::{DbError, db_err, from_rfc3339, to_rfc3339};
use rusqlite::Connection;
use tl_core::error::StoreError;
use tl_core::sessions::FrameRepository;
use tl_core::types::{Frame, FrameId, SessionId};

pub struct FrameRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> FrameRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl FrameRepository for FrameRepo<'_> {
    fn append(&self, frame: &Frame) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO frames (id, session_id, frame_index, captured_at, filename) VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    frame.id.as_str(),
                    frame.session_id.as_str(),
                    frame.index,
                    to_rfc3339(&frame.captured_at),
                    frame.filename.as_str(),
                ),
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<Frame>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, session_id, frame_index, captured_at, filename FROM frames WHERE session_id = ?1 ORDER BY frame_index ASC",
            )
            .map_err(db_err)?;
        let mut rows = stmt.query([session_id.as_str()]).map_err(db_err)?;
        let mut frames = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            frames.push(map_frame_row(row)?);
        }
        Ok(frames)
    }
}

fn map_frame_row(row: &rusqlite::Row<'_>) -> Result<Frame, StoreError> {
    let id: String = row.get(0).map_err(db_err)?;
    let session_id: String = row.get(1).map_err(db_err)?;
    let index: u32 = row.get(2).map_err(db_err)?;
    let captured_at: String = row.get(3).map_err(db_err)?;
    let filename: String = row.get(4).map_err(db_err)?;

    let invalid = |err: tl_core::types::IdError| DbError::InvalidRecord {
        message: err.to_string(),
    };
    Ok(Frame {
        id: FrameId::new(id).map_err(invalid)?,
        session_id: SessionId::new(session_id).map_err(invalid)?,
        index,
        captured_at: from_rfc3339(&captured_at)?,
        filename,
    })
}
