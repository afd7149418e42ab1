//! Roster upload: decode, parse and insert-or-skip students.
//!
//! A batch is validated in full before anything is written, so a bad row
//! rejects the whole upload.

use crate::model::Gender;
use crate::store::{self, StoreError};
use encoding_rs::SHIFT_JIS;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

pub const REQUIRED_COLUMNS: [&str; 3] = ["name", "student_id", "gender"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file is neither UTF-8 nor Shift_JIS (first bad UTF-8 byte at offset {offset})")]
    Undecodable { offset: usize },

    #[error("missing required columns: {}", .missing.join(", "))]
    MissingColumns { missing: Vec<&'static str> },

    #[error("line {line}: {column} is empty")]
    MissingField { line: usize, column: &'static str },

    #[error("line {line}: gender must be M/F or 男/女, got {token:?}")]
    InvalidGender { line: usize, token: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Read { .. } => "read_failed",
            IngestError::Undecodable { .. } => "undecodable",
            IngestError::MissingColumns { .. } => "missing_columns",
            IngestError::MissingField { .. } => "missing_field",
            IngestError::InvalidGender { .. } => "invalid_gender",
            IngestError::Store(e) => e.code(),
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            IngestError::Read { path, .. } => Some(json!({ "path": path })),
            IngestError::Undecodable { offset } => Some(json!({ "offset": offset })),
            IngestError::MissingColumns { missing } => Some(json!({ "missing": missing })),
            IngestError::MissingField { line, column } => {
                Some(json!({ "line": line, "column": column }))
            }
            IngestError::InvalidGender { line, token } => {
                Some(json!({ "line": line, "token": token }))
            }
            IngestError::Store(e) => e.details(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown gender token {0:?}")]
pub struct UnknownGender(pub String);

/// Maps the accepted gender spellings onto the canonical values.
pub fn normalize_gender(raw: &str) -> Result<Gender, UnknownGender> {
    match raw.trim() {
        "M" | "m" | "男" => Ok(Gender::Male),
        "F" | "f" | "女" => Ok(Gender::Female),
        other => Err(UnknownGender(other.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRecord {
    /// 1-based line in the source file.
    pub line: usize,
    pub name: String,
    pub student_number: String,
    pub gender: Gender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub inserted: usize,
    pub skipped: usize,
}

/// Decodes an upload as UTF-8 (with or without BOM), falling back to
/// Shift_JIS (cp932), which is what Excel writes on Japanese Windows.
pub fn decode_upload(bytes: &[u8]) -> Result<String, IngestError> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let utf8_err = match std::str::from_utf8(body) {
        Ok(text) => return Ok(text.to_string()),
        Err(e) => e,
    };
    match SHIFT_JIS.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) => {
            debug!("upload decoded as Shift_JIS");
            Ok(text.into_owned())
        }
        None => Err(IngestError::Undecodable {
            offset: utf8_err.valid_up_to() + (bytes.len() - body.len()),
        }),
    }
}

/// One CSV record and the line it starts on (1-based).
#[derive(Debug, PartialEq, Eq)]
struct CsvRecord {
    line: usize,
    fields: Vec<String>,
}

/// Splits text into records. A `"` opens a quoted field only at the start of
/// a field; quoted fields may hold commas, newlines and `""` escapes.
/// Blank lines are dropped.
fn parse_csv_records(text: &str) -> Vec<CsvRecord> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut field_start = true;
    let mut line = 1usize;
    let mut record_line = 1usize;

    let mut finish = |line: usize, fields: Vec<String>| {
        let blank = fields.len() == 1 && fields[0].trim().is_empty();
        if !blank {
            records.push(CsvRecord { line, fields });
        }
    };

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    buf.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    buf.push(ch);
                }
                _ => buf.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field_start => {
                in_quotes = true;
                field_start = false;
            }
            ',' => {
                fields.push(std::mem::take(&mut buf));
                field_start = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut buf));
                finish(record_line, std::mem::take(&mut fields));
                line += 1;
                record_line = line;
                field_start = true;
            }
            _ => {
                buf.push(ch);
                field_start = false;
            }
        }
    }
    if !buf.is_empty() || !fields.is_empty() {
        fields.push(buf);
        finish(record_line, fields);
    }
    records
}

pub fn parse_roster_csv(text: &str) -> Result<Vec<RosterRecord>, IngestError> {
    let mut records = parse_csv_records(text).into_iter();

    let Some(CsvRecord { fields: header, .. }) = records.next() else {
        return Err(IngestError::MissingColumns {
            missing: REQUIRED_COLUMNS.to_vec(),
        });
    };
    let header = header
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();
    let col = |name: &str| header.iter().position(|h| h == name);

    let missing = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| col(*c).is_none())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns { missing });
    }
    let (Some(name_col), Some(number_col), Some(gender_col)) =
        (col("name"), col("student_id"), col("gender"))
    else {
        return Err(IngestError::MissingColumns {
            missing: REQUIRED_COLUMNS.to_vec(),
        });
    };

    let mut out = Vec::new();
    for CsvRecord { line, fields } in records {
        let field = |i: usize| fields.get(i).map(|s| s.trim()).unwrap_or("");

        let name = field(name_col);
        if name.is_empty() {
            return Err(IngestError::MissingField {
                line,
                column: "name",
            });
        }
        let student_number = field(number_col);
        if student_number.is_empty() {
            return Err(IngestError::MissingField {
                line,
                column: "student_id",
            });
        }
        let gender = normalize_gender(field(gender_col))
            .map_err(|UnknownGender(token)| IngestError::InvalidGender { line, token })?;

        out.push(RosterRecord {
            line,
            name: name.to_string(),
            student_number: student_number.to_string(),
            gender,
        });
    }
    debug!(rows = out.len(), "roster parsed");
    Ok(out)
}

/// Inserts records whose student number is new. Numbers already stored, or
/// seen earlier in the same batch, are skipped.
pub fn ingest(conn: &Connection, records: &[RosterRecord]) -> Result<IngestSummary, IngestError> {
    let tx = conn.unchecked_transaction().map_err(StoreError::from)?;

    let mut stmt = tx
        .prepare("SELECT student_id FROM students")
        .map_err(StoreError::from)?;
    let existing: HashSet<String> = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<rusqlite::Result<HashSet<_>>>())
        .map_err(StoreError::from)?;
    drop(stmt);

    let mut seen: HashSet<&str> = HashSet::new();
    let mut inserted = 0usize;
    for r in records {
        if existing.contains(&r.student_number) || !seen.insert(r.student_number.as_str()) {
            debug!(line = r.line, student_number = %r.student_number, "skipping known student");
            continue;
        }
        store::insert_student(&tx, &r.name, &r.student_number, r.gender)?;
        inserted += 1;
    }
    tx.commit().map_err(StoreError::from)?;

    let summary = IngestSummary {
        inserted,
        skipped: records.len() - inserted,
    };
    info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        "roster ingested"
    );
    Ok(summary)
}

pub fn ingest_csv(conn: &Connection, bytes: &[u8]) -> Result<IngestSummary, IngestError> {
    let text = decode_upload(bytes)?;
    let records = parse_roster_csv(&text)?;
    ingest(conn, &records)
}

pub fn ingest_file(conn: &Connection, path: &Path) -> Result<IngestSummary, IngestError> {
    let bytes = std::fs::read(path).map_err(|source| IngestError::Read {
        path: path.to_string_lossy().to_string(),
        source,
    })?;
    ingest_csv(conn, &bytes)
}
