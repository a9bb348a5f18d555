//! Mark-sheet ingestion: column role detection over loosely structured
//! spreadsheet rows, and normalization into one record per student/subject cell.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{IngestionPolicy, DEFAULT_EXAM_TYPE, DEFAULT_MAX_MARKS};

/// One uploaded sheet row. Key order follows the source sheet.
pub type RawSheetRow = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnRole {
    Identifier,
    Name,
    Subject,
}

/// Alias sets per role, checked in priority order. Anything not claimed here is
/// a subject column.
const ROLE_ALIASES: &[(ColumnRole, &[&str])] = &[
    (
        ColumnRole::Identifier,
        &[
            "register number",
            "reg no",
            "regno",
            "registerno",
            "register_no",
        ],
    ),
    (ColumnRole::Name, &["student name", "name", "student"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRoles {
    pub identifier_column: String,
    pub name_column: Option<String>,
    pub subject_columns: Vec<String>,
}

impl ColumnRoles {
    pub fn role_of(&self, key: &str) -> ColumnRole {
        if key == self.identifier_column {
            ColumnRole::Identifier
        } else if self.name_column.as_deref() == Some(key) {
            ColumnRole::Name
        } else {
            ColumnRole::Subject
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMarkRecord {
    pub student_identifier: String,
    pub subject: String,
    pub exam_type: String,
    pub max_marks: f64,
    pub scored: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("missing-identifier-column")]
    MissingIdentifierColumn { columns: Vec<String> },
    #[error("no-subject-columns")]
    NoSubjectColumns { columns: Vec<String> },
}

impl SchemaError {
    pub fn columns(&self) -> &[String] {
        match self {
            Self::MissingIdentifierColumn { columns } | Self::NoSubjectColumns { columns } => {
                columns
            }
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::MissingIdentifierColumn { .. } => {
                "could not detect a register number column; name one column 'register number' or similar"
            }
            Self::NoSubjectColumns { .. } => {
                "no subject columns detected; at least one column must hold marks (e.g. 'maths')"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidCell {
    /// 1-based row number within the batch.
    pub row: usize,
    pub column: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("no rows provided to upload")]
    NoRows,
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("{} mark cell(s) are not numeric", .0.len())]
    InvalidCells(Vec<InvalidCell>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("record rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRef {
    pub id: String,
    pub register_no: String,
}

pub trait StudentDirectory {
    fn find_student_by_identifier(&self, id: &str) -> Result<Option<StudentRef>, StorageError>;
}

pub trait MarkStore {
    fn insert_mark_record(
        &self,
        student: &StudentRef,
        record: &NormalizedMarkRecord,
    ) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    pub exam_type: String,
    pub max_marks: f64,
    pub policy: IngestionPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            exam_type: DEFAULT_EXAM_TYPE.to_string(),
            max_marks: DEFAULT_MAX_MARKS,
            policy: IngestionPolicy::Lenient,
        }
    }
}

impl IngestOptions {
    /// Request overrides win when usable; blank exam types and non-positive
    /// max marks fall back to `self`.
    pub fn with_overrides(mut self, exam_type: Option<&str>, max_marks: Option<f64>) -> Self {
        if let Some(t) = exam_type.map(str::trim).filter(|t| !t.is_empty()) {
            self.exam_type = t.to_string();
        }
        if let Some(m) = max_marks.filter(|m| m.is_finite() && *m > 0.0) {
            self.max_marks = m;
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub created_count: usize,
    pub skipped_diagnostics: Vec<String>,
}

fn normalize_label(key: &str) -> String {
    key.trim().to_lowercase()
}

fn find_column(keys: &[&String], aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| {
        keys.iter()
            .find(|k| normalize_label(k) == *alias)
            .map(|k| (*k).clone())
    })
}

pub fn detect_column_roles(sample_row: &RawSheetRow) -> Result<ColumnRoles, SchemaError> {
    let keys: Vec<&String> = sample_row.keys().collect();
    let columns = || keys.iter().map(|k| (*k).clone()).collect::<Vec<_>>();

    let mut identifier_column = None;
    let mut name_column = None;
    for (role, aliases) in ROLE_ALIASES {
        let found = find_column(&keys, aliases);
        match role {
            ColumnRole::Identifier => identifier_column = found,
            ColumnRole::Name => name_column = found,
            ColumnRole::Subject => {}
        }
    }

    let Some(identifier_column) = identifier_column else {
        return Err(SchemaError::MissingIdentifierColumn { columns: columns() });
    };

    let subject_columns: Vec<String> = keys
        .iter()
        .filter(|k| **k != &identifier_column && Some(k.as_str()) != name_column.as_deref())
        .map(|k| (*k).clone())
        .collect();

    if subject_columns.is_empty() {
        return Err(SchemaError::NoSubjectColumns { columns: columns() });
    }

    Ok(ColumnRoles {
        identifier_column,
        name_column,
        subject_columns,
    })
}

enum Cell {
    Absent,
    Invalid,
    Score(f64),
}

fn read_cell(value: Option<&Value>) -> Cell {
    match value {
        None | Some(Value::Null) => Cell::Absent,
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Cell::Absent;
            }
            match s.parse::<f64>() {
                Ok(v) if v.is_finite() => Cell::Score(v),
                _ => Cell::Invalid,
            }
        }
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v.is_finite() => Cell::Score(v),
            _ => Cell::Invalid,
        },
        Some(_) => Cell::Invalid,
    }
}

/// Whole-valued floats print without the fraction, so `1001.0` reads as `1001`.
fn number_text(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(v)
            if n.is_f64()
                && v.is_finite()
                && v.fract() == 0.0
                && v >= i64::MIN as f64
                && v < i64::MAX as f64 =>
        {
            (v as i64).to_string()
        }
        _ => n.to_string(),
    }
}

/// The row's identifier, trimmed; `None` when absent or blank.
pub fn row_identifier(row: &RawSheetRow, roles: &ColumnRoles) -> Option<String> {
    let text = match row.get(&roles.identifier_column)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => number_text(n),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn row_records<'a>(
    identifier: String,
    row: &'a RawSheetRow,
    roles: &'a ColumnRoles,
    exam_type: &'a str,
    default_max_marks: f64,
) -> impl Iterator<Item = NormalizedMarkRecord> + 'a {
    roles
        .subject_columns
        .iter()
        .filter_map(move |column| match read_cell(row.get(column)) {
            Cell::Score(scored) => Some(NormalizedMarkRecord {
                student_identifier: identifier.clone(),
                subject: column.trim().to_string(),
                exam_type: exam_type.to_string(),
                max_marks: default_max_marks,
                scored,
            }),
            Cell::Absent | Cell::Invalid => None,
        })
}

/// Lazily emits one record per (row, subject column) cell holding a finite
/// number, in row order then column order. Rows with a blank identifier and
/// empty or non-numeric cells produce nothing. A score of 0 is kept.
pub fn normalize<'a>(
    rows: &'a [RawSheetRow],
    roles: &'a ColumnRoles,
    exam_type: &'a str,
    default_max_marks: f64,
) -> impl Iterator<Item = NormalizedMarkRecord> + 'a {
    rows.iter().flat_map(move |row| {
        row_identifier(row, roles)
            .into_iter()
            .flat_map(move |id| row_records(id, row, roles, exam_type, default_max_marks))
    })
}

/// Strict-mode check: every present, non-empty subject cell of an identified
/// row must be numeric.
pub fn validate(rows: &[RawSheetRow], roles: &ColumnRoles) -> Result<(), IngestError> {
    let mut invalid = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        if row_identifier(row, roles).is_none() {
            continue;
        }
        for column in &roles.subject_columns {
            if let Cell::Invalid = read_cell(row.get(column)) {
                invalid.push(InvalidCell {
                    row: i + 1,
                    column: column.clone(),
                    value: row.get(column).cloned().unwrap_or(Value::Null),
                });
            }
        }
    }
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(IngestError::InvalidCells(invalid))
    }
}

/// Finds the row list in an upload payload: either the payload itself is an
/// array, or the first field holding a non-empty array of objects is used.
pub fn extract_rows(payload: &Value) -> Result<Vec<RawSheetRow>, IngestError> {
    let candidate = match payload {
        Value::Array(items) => Some(items),
        Value::Object(obj) => obj.values().find_map(|v| match v {
            Value::Array(items) if items.first().is_some_and(Value::is_object) => Some(items),
            _ => None,
        }),
        _ => None,
    };

    let rows: Vec<RawSheetRow> = candidate
        .into_iter()
        .flatten()
        .filter_map(|item| item.as_object().cloned())
        .collect();

    if rows.is_empty() {
        return Err(IngestError::NoRows);
    }
    Ok(rows)
}

/// Detects columns on the first row, normalizes every row and hands each
/// record to the directory/store pair. Schema and strict validation failures
/// abort before any write; per-record failures become diagnostics.
pub fn ingest_batch<D, S>(
    rows: &[RawSheetRow],
    options: &IngestOptions,
    directory: &D,
    store: &S,
) -> Result<IngestSummary, IngestError>
where
    D: StudentDirectory + ?Sized,
    S: MarkStore + ?Sized,
{
    let Some(sample) = rows.first() else {
        return Err(IngestError::NoRows);
    };
    let roles = detect_column_roles(sample)?;
    if options.policy.is_strict() {
        validate(rows, &roles)?;
    }

    let mut summary = IngestSummary::default();

    for (i, row) in rows.iter().enumerate() {
        let Some(identifier) = row_identifier(row, &roles) else {
            debug!(row = i + 1, "row without register number");
            summary
                .skipped_diagnostics
                .push(format!("Row {} without register number, skipping.", i + 1));
            continue;
        };

        for record in row_records(
            identifier,
            row,
            &roles,
            &options.exam_type,
            options.max_marks,
        ) {
            let student = match directory.find_student_by_identifier(&record.student_identifier) {
                Ok(Some(s)) => s,
                Ok(None) => {
                    debug!(register_no = %record.student_identifier, "unknown student");
                    summary.skipped_diagnostics.push(format!(
                        "No student found for register number {}, skipping {}.",
                        record.student_identifier, record.subject
                    ));
                    continue;
                }
                Err(e) => {
                    warn!(register_no = %record.student_identifier, error = %e, "student lookup failed");
                    summary.skipped_diagnostics.push(format!(
                        "Lookup failed for register number {}: {}",
                        record.student_identifier, e
                    ));
                    continue;
                }
            };

            match store.insert_mark_record(&student, &record) {
                Ok(()) => summary.created_count += 1,
                Err(e) => {
                    warn!(register_no = %record.student_identifier, subject = %record.subject, error = %e, "mark insert failed");
                    summary.skipped_diagnostics.push(format!(
                        "Could not store {} for register number {}: {}",
                        record.subject, record.student_identifier, e
                    ));
                }
            }
        }
    }

    info!(
        rows = rows.len(),
        created = summary.created_count,
        skipped = summary.skipped_diagnostics.len(),
        exam_type = %options.exam_type,
        "mark sheet ingested"
    );
    Ok(summary)
}
