//! Data access for students, classes and assignments.
//!
//! Every function takes the connection explicitly. Mutations run inside a
//! single transaction so a failure never leaves a partial write behind.

use crate::model::{
    Class, ClassWithMembers, Direction, EntityKind, Gender, RosterSnapshot, Student,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("student id already exists: {0}")]
    DuplicateStudentId(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::DuplicateStudentId(_) => "duplicate_student_id",
            StoreError::InvalidInput(_) => "invalid_input",
            StoreError::Database(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            StoreError::NotFound { kind, id } => {
                Some(json!({ "entity": kind.to_string(), "id": id }))
            }
            StoreError::DuplicateStudentId(number) => Some(json!({ "studentNumber": number })),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

const STUDENT_COLUMNS: &str = "s.id, s.name, s.student_id, s.gender";

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        student_number: row.get(2)?,
        gender: row.get(3)?,
    })
}

pub fn list_students(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students s ORDER BY s.id"
    ))?;
    let rows = stmt
        .query_map([], student_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_unassigned(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS}
         FROM students s
         WHERE NOT EXISTS (SELECT 1 FROM student_classes sc WHERE sc.student_id = s.id)
         ORDER BY s.id"
    ))?;
    let rows = stmt
        .query_map([], student_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_classes_with_members(conn: &Connection) -> Result<Vec<ClassWithMembers>> {
    // One joined pass; rows of a class are adjacent because of the ORDER BY.
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, COALESCE(c.display_order, 0) AS ord,
                s.id, s.name, s.student_id, s.gender
         FROM classes c
         LEFT JOIN student_classes sc ON sc.class_id = c.id
         LEFT JOIN students s ON s.id = sc.student_id
         ORDER BY ord, c.id, s.id",
    )?;
    let mut rows = stmt.query([])?;

    let mut out: Vec<ClassWithMembers> = Vec::new();
    while let Some(row) = rows.next()? {
        let class_id: i64 = row.get(0)?;
        if out.last().map(|c| c.class.id) != Some(class_id) {
            out.push(ClassWithMembers {
                class: Class {
                    id: class_id,
                    name: row.get(1)?,
                    display_order: row.get(2)?,
                },
                students: Vec::new(),
            });
        }
        let student_id: Option<i64> = row.get(3)?;
        if let (Some(id), Some(entry)) = (student_id, out.last_mut()) {
            entry.students.push(Student {
                id,
                name: row.get(4)?,
                student_number: row.get(5)?,
                gender: row.get(6)?,
            });
        }
    }
    Ok(out)
}

pub fn snapshot(conn: &Connection) -> Result<RosterSnapshot> {
    let classes = list_classes_with_members(conn)?;
    let unassigned = list_unassigned(conn)?;
    let student_count: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
    Ok(RosterSnapshot {
        class_count: classes.len(),
        unassigned_count: unassigned.len(),
        student_count: student_count as usize,
        classes,
        unassigned,
    })
}

/// Inserts one student. Callers own the transaction.
pub fn insert_student(
    conn: &Connection,
    name: &str,
    student_number: &str,
    gender: Gender,
) -> Result<Student> {
    match conn.execute(
        "INSERT INTO students(name, student_id, gender) VALUES(?, ?, ?)",
        (name, student_number, gender),
    ) {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            return Err(StoreError::DuplicateStudentId(student_number.to_string()));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Student {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        student_number: student_number.to_string(),
        gender,
    })
}

pub fn create_class(conn: &Connection, name: &str) -> Result<Class> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::InvalidInput(
            "class name must not be empty".into(),
        ));
    }

    let tx = conn.unchecked_transaction()?;
    let display_order: i64 = tx.query_row(
        "SELECT COALESCE(MAX(display_order), -1) + 1 FROM classes",
        [],
        |r| r.get(0),
    )?;
    tx.execute(
        "INSERT INTO classes(name, display_order) VALUES(?, ?)",
        (name, display_order),
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    info!(class_id = id, name, "class created");
    Ok(Class {
        id,
        name: name.to_string(),
        display_order,
    })
}

fn ensure_exists(conn: &Connection, kind: EntityKind, id: i64) -> Result<()> {
    let sql = match kind {
        EntityKind::Student => "SELECT 1 FROM students WHERE id = ?",
        EntityKind::Class => "SELECT 1 FROM classes WHERE id = ?",
    };
    let hit: Option<i64> = conn.query_row(sql, [id], |r| r.get(0)).optional()?;
    match hit {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound { kind, id }),
    }
}

pub fn assign_student(conn: &Connection, student_id: i64, class_id: i64) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    ensure_exists(&tx, EntityKind::Student, student_id)?;
    ensure_exists(&tx, EntityKind::Class, class_id)?;
    tx.execute(
        "DELETE FROM student_classes WHERE student_id = ?",
        [student_id],
    )?;
    tx.execute(
        "INSERT INTO student_classes(student_id, class_id) VALUES(?, ?)",
        [student_id, class_id],
    )?;
    tx.commit()?;
    debug!(student_id, class_id, "student assigned");
    Ok(())
}

/// Returns whether an assignment row was removed.
pub fn unassign_student(conn: &Connection, student_id: i64, class_id: i64) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute(
        "DELETE FROM student_classes WHERE student_id = ? AND class_id = ?",
        [student_id, class_id],
    )?;
    tx.commit()?;
    debug!(student_id, class_id, removed, "student unassigned");
    Ok(removed > 0)
}

fn class_order(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT id FROM classes ORDER BY COALESCE(display_order, 0), id")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

fn write_class_order(conn: &Connection, ordered: &[i64]) -> Result<()> {
    let mut stmt = conn.prepare("UPDATE classes SET display_order = ? WHERE id = ?")?;
    for (i, id) in ordered.iter().enumerate() {
        stmt.execute((i as i64, id))?;
    }
    Ok(())
}

/// Rewrites display order so each listed class takes its index in `ordered`.
/// Classes left out keep their relative order and follow the listed ones.
pub fn reorder_classes(conn: &Connection, ordered: &[i64]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ordered.len());
    for id in ordered {
        if !seen.insert(*id) {
            return Err(StoreError::InvalidInput(format!(
                "class {} listed more than once",
                id
            )));
        }
    }

    let tx = conn.unchecked_transaction()?;
    let current = class_order(&tx)?;
    let known: HashSet<i64> = current.iter().copied().collect();
    if let Some(unknown) = ordered.iter().find(|id| !known.contains(id)) {
        return Err(StoreError::NotFound {
            kind: EntityKind::Class,
            id: *unknown,
        });
    }

    let mut full = ordered.to_vec();
    full.extend(current.into_iter().filter(|id| !seen.contains(id)));
    write_class_order(&tx, &full)?;
    tx.commit()?;
    debug!(order = ?full, "classes reordered");
    Ok(())
}

/// Swaps a class with its neighbour. Returns false when it is already at
/// that edge of the list.
pub fn move_class(conn: &Connection, class_id: i64, direction: Direction) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let mut order = class_order(&tx)?;
    let Some(idx) = order.iter().position(|id| *id == class_id) else {
        return Err(StoreError::NotFound {
            kind: EntityKind::Class,
            id: class_id,
        });
    };
    let neighbour = match direction {
        Direction::Up => idx.checked_sub(1),
        Direction::Down => Some(idx + 1).filter(|n| *n < order.len()),
    };
    let Some(neighbour) = neighbour else {
        return Ok(false);
    };
    order.swap(idx, neighbour);
    write_class_order(&tx, &order)?;
    tx.commit()?;
    debug!(class_id, ?direction, "class moved");
    Ok(true)
}

/// Deletes every assignment, student and class, children first.
pub fn reset_all(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM student_classes", [])?;
    tx.execute("DELETE FROM students", [])?;
    tx.execute("DELETE FROM classes", [])?;
    tx.commit()?;
    info!("roster reset");
    Ok(())
}
