use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const DEFAULT_EXAM_TYPE: &str = "Internal";
pub const DEFAULT_MAX_MARKS: f64 = 100.0;

/// How tolerant the grading and ingestion cores are of messy input.
///
/// `Lenient` scores unknown grade symbols as 0 points and silently skips
/// non-numeric mark cells. `Strict` rejects both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionPolicy {
    #[default]
    Lenient,
    Strict,
}

impl IngestionPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Some(Self::Lenient),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }

    pub fn from_strict(strict: bool) -> Self {
        if strict {
            Self::Strict
        } else {
            Self::Lenient
        }
    }

    pub fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsSection {
    Ingest,
    Grading,
}

impl SettingsSection {
    pub const ALL: [SettingsSection; 2] = [SettingsSection::Ingest, SettingsSection::Grading];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingest" => Some(Self::Ingest),
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Grading => "grading",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Ingest => "settings.ingest",
            Self::Grading => "settings.grading",
        }
    }
}

fn default_section(section: SettingsSection) -> Value {
    match section {
        SettingsSection::Ingest => json!({
            "defaultExamType": DEFAULT_EXAM_TYPE,
            "defaultMaxMarks": DEFAULT_MAX_MARKS,
            "policy": "lenient"
        }),
        SettingsSection::Grading => json!({
            "strictGrades": false
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSettings {
    pub default_exam_type: String,
    pub default_max_marks: f64,
    pub policy: IngestionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingSettings {
    pub strict_grades: bool,
}

impl GradingSettings {
    pub fn policy(self) -> IngestionPolicy {
        IngestionPolicy::from_strict(self.strict_grades)
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal settings object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_positive_f64_max(v: &Value, key: &str, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !n.is_finite() || n <= 0.0 || n > max {
        return Err(format!("{} must be in (0, {}]", key, max));
    }
    Ok(n)
}

pub fn merge_section_patch(
    section: SettingsSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SettingsSection::Ingest => match k.as_str() {
                "defaultExamType" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 64)?));
                }
                "defaultMaxMarks" => {
                    obj.insert(k.clone(), json!(parse_positive_f64_max(v, k, 10_000.0)?));
                }
                "policy" => {
                    let raw = v.as_str().ok_or_else(|| format!("{} must be string", k))?;
                    let Some(policy) = IngestionPolicy::parse(raw) else {
                        return Err("policy must be one of: lenient, strict".into());
                    };
                    obj.insert(k.clone(), json!(policy));
                }
                _ => return Err(format!("unknown ingest field: {}", k)),
            },
            SettingsSection::Grading => match k.as_str() {
                "strictGrades" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SettingsSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            let mut candidate = current.clone();
            if merge_section_patch(section, &mut candidate, saved_obj).is_ok() {
                current = candidate;
            }
        }
    }
    Ok(current)
}

/// Validates `patch` against the current values and persists the merged section.
pub fn update_section(
    conn: &Connection,
    section: SettingsSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

pub fn ingest_settings(conn: &Connection) -> anyhow::Result<IngestSettings> {
    let v = load_section(conn, SettingsSection::Ingest)?;
    Ok(serde_json::from_value(v)?)
}

pub fn grading_settings(conn: &Connection) -> anyhow::Result<GradingSettings> {
    let v = load_section(conn, SettingsSection::Grading)?;
    Ok(serde_json::from_value(v)?)
}
