use chrono::{DateTime, Utc};
use std::str::FromStr;
use utoipa::ToSchema;

pub mod db;

pub static MISSION_COLLECTION_NAME: &str = "missions";
pub static MISSION_STUDENT_COLLECTION_NAME: &str = "mission.students";

fn full_rate() -> f32 {
    100.0
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

impl Default for MissionStatus {
    fn default() -> Self {
        MissionStatus::Draft
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EnrollmentStatus {
    Active,
    Deactive,
    Irregular,
    Completed,
    Dropped,
    OnHold,
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "deactive" => Ok(EnrollmentStatus::Deactive),
            "irregular" => Ok(EnrollmentStatus::Irregular),
            "completed" => Ok(EnrollmentStatus::Completed),
            "dropped" => Ok(EnrollmentStatus::Dropped),
            "on-hold" => Ok(EnrollmentStatus::OnHold),
            other => Err(format!("unknown enrollment status '{}'", other)),
        }
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrollmentStatus::Active => write!(f, "active"),
            EnrollmentStatus::Deactive => write!(f, "deactive"),
            EnrollmentStatus::Irregular => write!(f, "irregular"),
            EnrollmentStatus::Completed => write!(f, "completed"),
            EnrollmentStatus::Dropped => write!(f, "dropped"),
            EnrollmentStatus::OnHold => write!(f, "on-hold"),
        }
    }
}

/// A cohort program instance tied to one batch.
///
/// `total_students` and `student_ids` are a denormalized summary of the
/// active [`MissionStudent`] records. They only move through atomic
/// `$inc`/`$push`/`$pull` updates and are repaired by the reconcile
/// operations when they drift.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Mission {
    #[serde(rename = "_id", default = "bson::Uuid::new")]
    #[schema(value_type = String)]
    pub id: bson::Uuid,
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub status: MissionStatus,
    #[schema(value_type = String)]
    pub batch: bson::Uuid,

    /// 0 means unlimited.
    #[serde(default)]
    pub max_students: u32,
    #[serde(default)]
    pub total_students: u32,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub student_ids: Vec<bson::Uuid>,

    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

/// One student's membership in one mission; the source of truth the
/// mission summary is derived from. Unique per (mission, student).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MissionStudent {
    #[serde(rename = "_id", default = "bson::Uuid::new")]
    #[schema(value_type = String)]
    pub id: bson::Uuid,
    #[schema(value_type = String)]
    pub mission: bson::Uuid,
    #[schema(value_type = String)]
    pub student: bson::Uuid,
    /// Copied from the approved batch membership at enrollment time.
    #[schema(value_type = String)]
    pub batch: bson::Uuid,

    pub status: EnrollmentStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default = "full_rate")]
    pub attendance_rate: f32,

    #[serde(default = "Utc::now")]
    pub enrolled_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_activity_at: DateTime<Utc>,
}

/// One row of the roster listing.
///
/// Batch members that are not mission-enrolled are a different entity from
/// enrollments, so the merged listing keeps them as an explicit variant
/// instead of a loosely-shaped record.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RosterEntry {
    Enrolled(MissionStudent),
    BatchOnly {
        #[schema(value_type = String)]
        student: bson::Uuid,
        #[schema(value_type = String)]
        batch: bson::Uuid,
    },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RosterDebugReport {
    pub enrolled_count: u64,
    pub approved_count: u64,
    pub counts_match: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RosterListing {
    pub students: Vec<RosterEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<RosterDebugReport>,
}
