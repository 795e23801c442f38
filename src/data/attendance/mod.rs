use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use std::str::FromStr;
use utoipa::ToSchema;

pub mod db;

pub static ATTENDANCE_FORM_COLLECTION_NAME: &str = "attendance.forms";
pub static ATTENDANCE_LOG_COLLECTION_NAME: &str = "attendance.logs";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Text,
    Number,
    Date,
    Time,
    Single,
    Multi,
    Rating,
    Bool,
    Scale,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttendanceQuestion {
    /// Answer map key.
    pub key: String,
    pub label: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub required: bool,
    /// Choices for `single`/`multi` questions.
    #[serde(default)]
    pub options: Vec<String>,
}

/// A mission-scoped set of attendance questions. At most one form is active
/// per mission at a time; activation deactivates the others.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttendanceForm {
    #[serde(rename = "_id", default = "bson::Uuid::new")]
    #[schema(value_type = String)]
    pub id: bson::Uuid,
    #[schema(value_type = String)]
    pub mission: bson::Uuid,
    pub title: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub questions: Vec<AttendanceQuestion>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Excused,
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(format!("unknown attendance status '{}'", other)),
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttendanceStatus::Present => write!(f, "present"),
            AttendanceStatus::Absent => write!(f, "absent"),
            AttendanceStatus::Excused => write!(f, "excused"),
        }
    }
}

/// One mark per (mission, student, calendar date); upserted, never
/// duplicated.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttendanceLog {
    #[serde(rename = "_id", default = "bson::Uuid::new")]
    #[schema(value_type = String)]
    pub id: bson::Uuid,
    #[schema(value_type = String)]
    pub mission: bson::Uuid,
    #[schema(value_type = String)]
    pub student: bson::Uuid,
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,

    pub status: AttendanceStatus,
    #[serde(default)]
    pub notes: Option<String>,
    /// Answers keyed by form question key.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub answers: Map<String, Value>,

    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

/// Coerces answer values toward the kinds the active form declares.
///
/// Collection-time coercion only: values that cannot be coerced and keys the
/// form doesn't know pass through untouched, nothing is rejected.
pub fn coerce_answers(
    form: Option<&AttendanceForm>,
    mut answers: Map<String, Value>,
) -> Map<String, Value> {
    let form = match form {
        Some(form) => form,
        None => return answers,
    };

    for question in &form.questions {
        if let Some(value) = answers.get_mut(&question.key) {
            let coerced = coerce_value(question.kind, value);
            if let Some(coerced) = coerced {
                *value = coerced;
            }
        }
    }

    answers
}

fn coerce_value(kind: QuestionKind, value: &Value) -> Option<Value> {
    match kind {
        QuestionKind::Number | QuestionKind::Rating | QuestionKind::Scale => match value {
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
            _ => None,
        },
        QuestionKind::Bool => match value {
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Number(n) => n.as_f64().map(|n| Value::Bool(n != 0.0)),
            _ => None,
        },
        QuestionKind::Multi => match value {
            // single selection submitted bare
            Value::String(_) => Some(Value::Array(vec![value.clone()])),
            _ => None,
        },
        QuestionKind::Text
        | QuestionKind::Date
        | QuestionKind::Time
        | QuestionKind::Single => match value {
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
    }
}

///////////////////////
//       TESTS
///////////////////////

#[cfg(test)]
mod answer_coercion {
    use super::*;
    use serde_json::json;

    fn form_with(key: &str, kind: QuestionKind) -> AttendanceForm {
        AttendanceForm {
            id: bson::Uuid::new(),
            mission: bson::Uuid::new(),
            title: "daily".to_string(),
            version: 1,
            active: true,
            questions: vec![AttendanceQuestion {
                key: key.to_string(),
                label: key.to_string(),
                kind,
                required: false,
                options: vec![],
            }],
            created: chrono::Utc::now(),
        }
    }

    fn answers(key: &str, value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        map
    }

    #[test]
    fn numbers_are_parsed_from_strings() {
        let form = form_with("mood", QuestionKind::Rating);
        let out = coerce_answers(Some(&form), answers("mood", json!(" 4.5 ")));
        assert_eq!(out.get("mood"), Some(&json!(4.5)));
    }

    #[test]
    fn booleans_accept_common_spellings() {
        let form = form_with("focused", QuestionKind::Bool);
        for truthy in ["true", "Yes", "1"] {
            let out = coerce_answers(Some(&form), answers("focused", json!(truthy)));
            assert_eq!(out.get("focused"), Some(&json!(true)), "{}", truthy);
        }
        let out = coerce_answers(Some(&form), answers("focused", json!("no")));
        assert_eq!(out.get("focused"), Some(&json!(false)));
    }

    #[test]
    fn bare_multi_selection_is_wrapped() {
        let form = form_with("topics", QuestionKind::Multi);
        let out = coerce_answers(Some(&form), answers("topics", json!("rust")));
        assert_eq!(out.get("topics"), Some(&json!(["rust"])));
    }

    #[test]
    fn uncoercible_and_unknown_values_pass_through() {
        let form = form_with("mood", QuestionKind::Number);
        let mut input = answers("mood", json!("not a number"));
        input.insert("extra".to_string(), json!({"nested": true}));

        let out = coerce_answers(Some(&form), input.clone());
        assert_eq!(out, input);
    }

    #[test]
    fn no_active_form_means_no_coercion() {
        let out = coerce_answers(None, answers("anything", json!("5")));
        assert_eq!(out.get("anything"), Some(&json!("5")));
    }
}
