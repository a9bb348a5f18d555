use crate::ingest::{MarkStore, NormalizedMarkRecord, StorageError, StudentDirectory, StudentRef};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE_NAME: &str = "marksheet.sqlite3";

pub const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE_NAME))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            register_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT,
            profile_locked INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_email ON students(email)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            max_marks REAL NOT NULL,
            scored REAL NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS circulars(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            author TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_entries(
            id TEXT PRIMARY KEY,
            day TEXT NOT NULL,
            period INTEGER NOT NULL,
            subject TEXT NOT NULL,
            room TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_day_period ON timetable_entries(day, period)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub register_no: String,
    pub name: String,
    pub email: Option<String>,
    pub profile_locked: bool,
    pub updated_at: String,
}

const STUDENT_COLUMNS: &str = "id, register_no, name, email, profile_locked, updated_at";

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        register_no: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        profile_locked: row.get::<_, i64>(4)? != 0,
        updated_at: row.get(5)?,
    })
}

pub fn insert_student(
    conn: &Connection,
    register_no: &str,
    name: &str,
    email: Option<&str>,
) -> anyhow::Result<Student> {
    let student = Student {
        id: Uuid::new_v4().to_string(),
        register_no: register_no.to_string(),
        name: name.to_string(),
        email: email.map(str::to_string),
        profile_locked: false,
        updated_at: now_ts(),
    };
    conn.execute(
        "INSERT INTO students(id, register_no, name, email, profile_locked, updated_at)
         VALUES(?, ?, ?, ?, 0, ?)",
        (
            &student.id,
            &student.register_no,
            &student.name,
            &student.email,
            &student.updated_at,
        ),
    )?;
    Ok(student)
}

pub fn list_students(conn: &Connection) -> anyhow::Result<Vec<Student>> {
    let sql = format!("SELECT {} FROM students ORDER BY register_no", STUDENT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

pub fn find_student_by_register_no(
    conn: &Connection,
    register_no: &str,
) -> anyhow::Result<Option<Student>> {
    let sql = format!("SELECT {} FROM students WHERE register_no = ?", STUDENT_COLUMNS);
    Ok(conn
        .query_row(&sql, [register_no], student_from_row)
        .optional()?)
}

pub fn find_student_by_email(conn: &Connection, email: &str) -> anyhow::Result<Option<Student>> {
    let sql = format!(
        "SELECT {} FROM students WHERE email = ? COLLATE NOCASE ORDER BY register_no LIMIT 1",
        STUDENT_COLUMNS
    );
    Ok(conn.query_row(&sql, [email], student_from_row).optional()?)
}

/// Returns `false` when no student has `student_id`.
pub fn set_student_locked(conn: &Connection, student_id: &str, locked: bool) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE students SET profile_locked = ?, updated_at = ? WHERE id = ?",
        (locked as i64, now_ts(), student_id),
    )?;
    Ok(changed > 0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRow {
    pub id: String,
    pub student_id: String,
    pub subject: String,
    pub exam_type: String,
    pub max_marks: f64,
    pub scored: f64,
    pub created_at: String,
}

fn mark_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MarkRow> {
    Ok(MarkRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        subject: row.get(2)?,
        exam_type: row.get(3)?,
        max_marks: row.get(4)?,
        scored: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const MARK_COLUMNS: &str = "id, student_id, subject, exam_type, max_marks, scored, created_at";

pub fn insert_mark(
    conn: &Connection,
    student_id: &str,
    record: &NormalizedMarkRecord,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO marks(id, student_id, subject, exam_type, max_marks, scored, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            student_id,
            &record.subject,
            &record.exam_type,
            record.max_marks,
            record.scored,
            now_ts(),
        ),
    )?;
    Ok(id)
}

pub fn get_mark(conn: &Connection, mark_id: &str) -> anyhow::Result<Option<MarkRow>> {
    let sql = format!("SELECT {} FROM marks WHERE id = ?", MARK_COLUMNS);
    Ok(conn.query_row(&sql, [mark_id], mark_from_row).optional()?)
}

pub fn update_mark_scored(
    conn: &Connection,
    mark_id: &str,
    scored: f64,
) -> anyhow::Result<Option<MarkRow>> {
    let changed = conn.execute(
        "UPDATE marks SET scored = ? WHERE id = ?",
        (scored, mark_id),
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_mark(conn, mark_id)
}

pub fn list_marks_for_student(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<MarkRow>> {
    let sql = format!(
        "SELECT {} FROM marks WHERE student_id = ? ORDER BY subject, exam_type, created_at",
        MARK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let marks = stmt
        .query_map([student_id], mark_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(marks)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Circular {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub created_at: String,
    pub updated_at: String,
}

pub fn insert_circular(
    conn: &Connection,
    title: &str,
    content: &str,
    author: &str,
) -> anyhow::Result<Circular> {
    let ts = now_ts();
    let circular = Circular {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        content: content.to_string(),
        author: author.to_string(),
        created_at: ts.clone(),
        updated_at: ts,
    };
    conn.execute(
        "INSERT INTO circulars(id, title, content, author, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &circular.id,
            &circular.title,
            &circular.content,
            &circular.author,
            &circular.created_at,
            &circular.updated_at,
        ),
    )?;
    Ok(circular)
}

pub fn list_circulars(conn: &Connection) -> anyhow::Result<Vec<Circular>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, content, author, created_at, updated_at FROM circulars
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let circulars = stmt
        .query_map([], |row| {
            Ok(Circular {
                id: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
                author: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(circulars)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableEntry {
    pub id: String,
    pub day: String,
    pub period: i64,
    pub subject: String,
    pub room: Option<String>,
}

/// Inserts when `entry.id` is empty, otherwise updates in place. Returns
/// `None` when updating an unknown id.
pub fn upsert_timetable_entry(
    conn: &Connection,
    entry: &TimetableEntry,
) -> anyhow::Result<Option<TimetableEntry>> {
    if entry.id.is_empty() {
        let saved = TimetableEntry {
            id: Uuid::new_v4().to_string(),
            ..entry.clone()
        };
        conn.execute(
            "INSERT INTO timetable_entries(id, day, period, subject, room) VALUES(?, ?, ?, ?, ?)",
            (&saved.id, &saved.day, saved.period, &saved.subject, &saved.room),
        )?;
        return Ok(Some(saved));
    }

    let changed = conn.execute(
        "UPDATE timetable_entries SET day = ?, period = ?, subject = ?, room = ? WHERE id = ?",
        (&entry.day, entry.period, &entry.subject, &entry.room, &entry.id),
    )?;
    Ok((changed > 0).then(|| entry.clone()))
}

/// Entries in weekday order, then by period.
pub fn list_timetable(conn: &Connection) -> anyhow::Result<Vec<TimetableEntry>> {
    let mut stmt =
        conn.prepare("SELECT id, day, period, subject, room FROM timetable_entries")?;
    let mut entries = stmt
        .query_map([], |row| {
            Ok(TimetableEntry {
                id: row.get(0)?,
                day: row.get(1)?,
                period: row.get(2)?,
                subject: row.get(3)?,
                room: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let day_rank = |d: &str| WEEKDAYS.iter().position(|w| *w == d).unwrap_or(WEEKDAYS.len());
    entries.sort_by(|a, b| {
        day_rank(&a.day)
            .cmp(&day_rank(&b.day))
            .then(a.period.cmp(&b.period))
            .then_with(|| a.subject.cmp(&b.subject))
    });
    Ok(entries)
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl StudentDirectory for Connection {
    fn find_student_by_identifier(&self, id: &str) -> Result<Option<StudentRef>, StorageError> {
        Ok(self
            .query_row(
                "SELECT id, register_no FROM students WHERE register_no = ?",
                [id],
                |r| {
                    Ok(StudentRef {
                        id: r.get(0)?,
                        register_no: r.get(1)?,
                    })
                },
            )
            .optional()?)
    }
}

impl MarkStore for Connection {
    fn insert_mark_record(
        &self,
        student: &StudentRef,
        record: &NormalizedMarkRecord,
    ) -> Result<(), StorageError> {
        insert_mark(self, &student.id, record)?;
        Ok(())
    }
}
