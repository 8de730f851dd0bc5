//! CSV export of a finished session: one row per frame, session columns repeated.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tl_core::types::{Frame, Session};

const BASE_COLUMNS: [&str; 14] = [
    "session_id",
    "session_name",
    "latitude",
    "longitude",
    "session_start",
    "session_end",
    "frame_interval_secs",
    "device_model",
    "device_os",
    "app_version",
    "frame_index",
    "frame_id",
    "frame_timestamp",
    "filename",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame {frame} does not belong to session {session}")]
    ForeignFrame { frame: String, session: String },
    #[error("could not create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Writes a header row, then one row per frame. A session without frames still
/// gets a single row with the frame columns left empty.
pub fn write_session_csv<W: Write>(
    session: &Session,
    frames: &[Frame],
    mut writer: W,
) -> Result<(), ExportError> {
    if let Some(frame) = frames.iter().find(|frame| frame.session_id != session.id) {
        return Err(ExportError::ForeignFrame {
            frame: frame.id.to_string(),
            session: session.id.to_string(),
        });
    }

    let mut header: Vec<&str> = BASE_COLUMNS.to_vec();
    header.extend(session.metadata.iter().map(|field| field.key.as_str()));
    write_record(&mut writer, header)?;

    let session_fields = session_fields(session);
    let metadata: Vec<&str> = session
        .metadata
        .iter()
        .map(|field| field.value.as_str())
        .collect();

    if frames.is_empty() {
        let mut row: Vec<String> = session_fields.clone();
        row.extend(std::iter::repeat_n(String::new(), 4));
        row.extend(metadata.iter().map(|value| (*value).to_string()));
        write_record(&mut writer, row.iter().map(String::as_str))?;
    }
    for frame in frames {
        let mut row = session_fields.clone();
        row.push(frame.index.to_string());
        row.push(frame.id.to_string());
        row.push(frame.captured_at.to_rfc3339());
        row.push(frame.filename.clone());
        row.extend(metadata.iter().map(|value| (*value).to_string()));
        write_record(&mut writer, row.iter().map(String::as_str))?;
    }
    writer.flush()?;
    Ok(())
}

/// Creates (or truncates) `path` and writes the export into it.
pub fn export_session_to_path(
    session: &Session,
    frames: &[Frame],
    path: &Path,
) -> Result<(), ExportError> {
    let file = File::create(path).map_err(|source| ExportError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    write_session_csv(session, frames, BufWriter::new(file))?;
    tracing::info!(
        session_id = %session.id,
        frames = frames.len(),
        path = %path.display(),
        "session exported"
    );
    Ok(())
}

fn session_fields(session: &Session) -> Vec<String> {
    let (latitude, longitude) = session.location.map_or_else(
        || (String::new(), String::new()),
        |at| (at.latitude.to_string(), at.longitude.to_string()),
    );
    vec![
        session.id.to_string(),
        session.name.clone(),
        latitude,
        longitude,
        session.started_at.to_rfc3339(),
        session
            .ended_at
            .map(|ended| ended.to_rfc3339())
            .unwrap_or_default(),
        session.settings.frame_interval_secs().to_string(),
        session.device.model.clone(),
        session.device.os_version.clone(),
        session.app_version.clone(),
    ]
}

fn write_record<'a, W: Write>(
    writer: &mut W,
    fields: impl IntoIterator<Item = &'a str>,
) -> std::io::Result<()> {
    let line: Vec<String> = fields.into_iter().map(escape_field).collect();
    writer.write_all(line.join(",").as_bytes())?;
    writer.write_all(b"\r\n")
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
