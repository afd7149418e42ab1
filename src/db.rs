use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

pub const DB_FILE_NAME: &str = "roster.sqlite3";

/// File name used by the first version of the tool.
pub const LEGACY_DB_FILE_NAME: &str = "database.db";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let legacy_path = workspace.join(LEGACY_DB_FILE_NAME);
    if !db_path.exists() && legacy_path.exists() {
        // The legacy file is left in place; the copy is migrated below.
        info!(from = %legacy_path.display(), "importing legacy roster database");
        std::fs::copy(&legacy_path, &db_path)?;
    }
    debug!(path = %db_path.display(), "opening roster database");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            student_id TEXT UNIQUE NOT NULL,
            gender TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            display_order INTEGER DEFAULT 0
        )",
        [],
    )?;

    // student_id is the key: a student sits in at most one class.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_classes(
            student_id INTEGER PRIMARY KEY,
            class_id INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    // Databases written by the first version of the tool keyed assignments on
    // (student_id, class_id). Rebuild those before creating indexes on the table.
    migrate_student_classes_unique_student(conn)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_classes_class ON student_classes(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_display_order ON classes(display_order, id)",
        [],
    )?;

    Ok(())
}

fn migrate_student_classes_unique_student(conn: &Connection) -> anyhow::Result<()> {
    if column_pk_position(conn, "student_classes", "class_id")?.unwrap_or(0) == 0 {
        return Ok(());
    }

    info!("migrating student_classes to one class per student");
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "ALTER TABLE student_classes RENAME TO student_classes_legacy",
        [],
    )?;
    tx.execute(
        "CREATE TABLE student_classes(
            student_id INTEGER PRIMARY KEY,
            class_id INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    // Keep the most recently written row per student, and drop rows whose
    // student or class no longer exists.
    let kept = tx.execute(
        "INSERT INTO student_classes(student_id, class_id)
         SELECT l.student_id, l.class_id
         FROM student_classes_legacy l
         WHERE l.rowid = (
             SELECT MAX(l2.rowid) FROM student_classes_legacy l2
             WHERE l2.student_id = l.student_id
           )
           AND l.student_id IN (SELECT id FROM students)
           AND l.class_id IN (SELECT id FROM classes)",
        [],
    )?;
    tx.execute("DROP TABLE student_classes_legacy", [])?;
    tx.commit()?;
    info!(kept, "student_classes migration complete");
    Ok(())
}

/// Position of `column` in the table's primary key (1-based), `Some(0)` when
/// the column is not part of it, `None` when the column does not exist.
fn column_pk_position(
    conn: &Connection,
    table: &str,
    column: &str,
) -> anyhow::Result<Option<i64>> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(Some(row.get(5)?));
        }
    }
    Ok(None)
}
