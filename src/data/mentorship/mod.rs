use utoipa::ToSchema;

pub mod db;

pub static MISSION_MENTOR_COLLECTION_NAME: &str = "mission.mentors";
pub static GROUP_COLLECTION_NAME: &str = "mission.groups";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MentorRole {
    Primary,
    Secondary,
    Moderator,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MentorStatus {
    Active,
    Inactive,
    Overloaded,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    Study,
    Project,
    Mentorship,
    Collaborative,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Active,
    Inactive,
    Full,
    Recruiting,
}

/// A mentor's participation in one mission.
///
/// `current_workload` always equals `students.len()`; both move in the same
/// conditional update so the capacity bound cannot be raced past.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MissionMentor {
    #[serde(rename = "_id", default = "bson::Uuid::new")]
    #[schema(value_type = String)]
    pub id: bson::Uuid,
    #[schema(value_type = String)]
    pub mission: bson::Uuid,
    #[schema(value_type = String)]
    pub mentor: bson::Uuid,
    pub role: MentorRole,

    /// 0 means unlimited.
    #[serde(default)]
    pub max_students: u32,
    #[serde(default)]
    pub current_workload: u32,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub students: Vec<bson::Uuid>,
    /// Students for whom this mentor is the designated primary contact.
    /// A student has at most one primary mentor per mission.
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub primary_students: Vec<bson::Uuid>,

    pub status: MentorStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupMentor {
    #[schema(value_type = String)]
    pub mentor: bson::Uuid,
    #[serde(default)]
    pub primary: bool,
}

/// A named collective of mentors and students within one mission.
/// A student belongs to at most one member-holding group per mission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MentorshipGroup {
    #[serde(rename = "_id", default = "bson::Uuid::new")]
    #[schema(value_type = String)]
    pub id: bson::Uuid,
    #[schema(value_type = String)]
    pub mission: bson::Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub group_type: GroupType,

    #[serde(default)]
    pub mentors: Vec<GroupMentor>,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub students: Vec<bson::Uuid>,

    /// 0 means unlimited.
    #[serde(default)]
    pub max_students: u32,
    pub status: GroupStatus,
}
