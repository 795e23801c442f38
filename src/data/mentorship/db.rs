use std::collections::HashMap;
use std::collections::HashSet;

use bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::Database;
use rocket::futures::StreamExt;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    GroupMentor, GroupStatus, GroupType, MentorRole, MentorStatus, MentorshipGroup, MissionMentor,
    GROUP_COLLECTION_NAME, MISSION_MENTOR_COLLECTION_NAME,
};
use crate::data::capacity;
use crate::data::filter;
use crate::data::mission::db::RosterDbExt;
use crate::data::mission::{MissionStudent, MISSION_STUDENT_COLLECTION_NAME};
use crate::resp::problem::Problem;

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn mentor_not_found(id: Uuid) -> Problem {
        problems::not_found("Mission mentor doesn't exist.")
            .insert("mentorId", id.to_string())
            .clone()
    }

    #[inline]
    pub fn group_not_found(id: Uuid) -> Problem {
        problems::not_found("Mentorship group doesn't exist.")
            .insert("groupId", id.to_string())
            .clone()
    }

    #[inline]
    pub fn group_inactive(id: Uuid) -> Problem {
        problems::conflict("Mentorship group is inactive.")
            .insert("groupId", id.to_string())
            .clone()
    }

    #[inline]
    pub fn group_capacity_exceeded(id: Uuid, remaining: u32) -> Problem {
        problems::conflict("Assignment would exceed group capacity.")
            .insert("groupId", id.to_string())
            .insert("remainingSeats", remaining)
            .detail(format!("Only {} more students fit in the group.", remaining))
            .clone()
    }

    #[inline]
    pub fn no_students_given() -> Problem {
        problems::invalid_input("No student ids were provided.")
    }
}

/// Stable per-student failure reasons of assignment calls.
pub mod reason {
    pub static AT_CAPACITY: &str = "at-capacity";
    pub static ALREADY_ASSIGNED: &str = "already-assigned";
    pub static ALREADY_IN_GROUP: &str = "already-in-group";
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MentorCreateData {
    #[schema(value_type = String)]
    pub mission: Uuid,
    #[schema(value_type = String)]
    pub mentor: Uuid,
    pub role: MentorRole,
    #[serde(default)]
    pub max_students: u32,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupCreateData {
    #[schema(value_type = String)]
    pub mission: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub group_type: GroupType,
    #[serde(default)]
    pub mentors: Vec<GroupMentor>,
    #[serde(default)]
    pub max_students: u32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentFailure {
    #[schema(value_type = String)]
    pub student: bson::Uuid,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub group: Option<bson::Uuid>,
}

/// Per-student report of a bulk assignment, so callers can retry with the
/// subset that failed.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentOutcome {
    pub assigned_count: usize,
    #[schema(value_type = Vec<String>)]
    pub assigned: Vec<bson::Uuid>,
    pub failed: Vec<AssignmentFailure>,
}

pub trait AssignmentDbExt {
    async fn create_mission_mentor(&self, data: MentorCreateData)
        -> Result<MissionMentor, Problem>;

    async fn mission_mentor(&self, id: Uuid) -> Result<Option<MissionMentor>, Problem>;

    async fn create_group(&self, data: GroupCreateData) -> Result<MentorshipGroup, Problem>;

    async fn group(&self, id: Uuid) -> Result<Option<MentorshipGroup>, Problem>;

    /// Assigns students to a mentor, one conditional update per student so
    /// the capacity check and the workload increment cannot be raced apart.
    async fn assign_to_mentor(
        &self,
        mentor_link_id: Uuid,
        student_ids: &[Uuid],
        make_primary: bool,
    ) -> Result<AssignmentOutcome, Problem>;

    async fn assign_to_group(
        &self,
        group_id: Uuid,
        student_ids: &[Uuid],
    ) -> Result<AssignmentOutcome, Problem>;

    async fn remove_from_group(
        &self,
        group_id: Uuid,
        student_ids: &[Uuid],
    ) -> Result<MentorshipGroup, Problem>;

    /// Mission mentors not referenced by any member-holding group.
    async fn available_mentors(&self, mission_id: Uuid) -> Result<Vec<MissionMentor>, Problem>;

    /// Enrolled students not referenced by any member-holding group.
    async fn available_students(&self, mission_id: Uuid) -> Result<Vec<MissionStudent>, Problem>;
}

/// Groups of `mission` that hold members, other than `except`.
async fn member_holding_groups(
    db: &Database,
    mission: bson::Uuid,
    except: Option<bson::Uuid>,
) -> Result<Vec<MentorshipGroup>, Problem> {
    let mut query = doc! {
        "mission": mission,
        "status": { "$in": ["active", "full", "recruiting"] },
    };
    if let Some(id) = except {
        query.insert("_id", doc! { "$ne": id });
    }

    let mut cursor = db
        .collection::<MentorshipGroup>(GROUP_COLLECTION_NAME)
        .find(query, None)
        .await
        .map_err(Problem::from)?;

    let mut groups = vec![];
    while let Some(group) = cursor.next().await {
        match group {
            Ok(group) => groups.push(group),
            Err(_) => {
                tracing::warn!("Unable to deserialize MentorshipGroup document.")
            }
        }
    }

    Ok(groups)
}

impl AssignmentDbExt for Database {
    async fn create_mission_mentor(
        &self,
        data: MentorCreateData,
    ) -> Result<MissionMentor, Problem> {
        let mission = self.require_mission(data.mission).await?;

        let link = MissionMentor {
            id: bson::Uuid::new(),
            mission: mission.id,
            mentor: filter::uuid(data.mentor),
            role: data.role,
            max_students: data.max_students,
            current_workload: 0,
            students: vec![],
            primary_students: vec![],
            status: MentorStatus::Active,
        };

        self.collection::<MissionMentor>(MISSION_MENTOR_COLLECTION_NAME)
            .insert_one(&link, None)
            .await
            .map_err(Problem::from)?;

        Ok(link)
    }

    async fn mission_mentor(&self, id: Uuid) -> Result<Option<MissionMentor>, Problem> {
        self.collection::<MissionMentor>(MISSION_MENTOR_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn create_group(&self, data: GroupCreateData) -> Result<MentorshipGroup, Problem> {
        let mission = self.require_mission(data.mission).await?;

        let group = MentorshipGroup {
            id: bson::Uuid::new(),
            mission: mission.id,
            name: data.name,
            description: data.description,
            group_type: data.group_type,
            mentors: data.mentors,
            students: vec![],
            max_students: data.max_students,
            status: GroupStatus::Recruiting,
        };

        self.collection::<MentorshipGroup>(GROUP_COLLECTION_NAME)
            .insert_one(&group, None)
            .await
            .map_err(Problem::from)?;

        Ok(group)
    }

    async fn group(&self, id: Uuid) -> Result<Option<MentorshipGroup>, Problem> {
        self.collection::<MentorshipGroup>(GROUP_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn assign_to_mentor(
        &self,
        mentor_link_id: Uuid,
        student_ids: &[Uuid],
        make_primary: bool,
    ) -> Result<AssignmentOutcome, Problem> {
        if student_ids.is_empty() {
            return Err(problem::no_students_given());
        }

        let mentors = self.collection::<MissionMentor>(MISSION_MENTOR_COLLECTION_NAME);
        let link = self
            .mission_mentor(mentor_link_id)
            .await?
            .ok_or_else(|| problem::mentor_not_found(mentor_link_id))?;

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let mut assigned: Vec<bson::Uuid> = vec![];
        let mut failed: Vec<AssignmentFailure> = vec![];
        let mut latest = link;

        for student_id in student_ids {
            let student = filter::uuid(*student_id);

            // "push iff not yet assigned and below capacity" in one filtered
            // update; a concurrent assign that wins the race makes this one
            // match nothing instead of overflowing.
            let updated = mentors
                .find_one_and_update(
                    doc! {
                        "_id": latest.id,
                        "students": { "$ne": student },
                        "$or": [
                            { "max_students": 0 },
                            { "$expr": { "$lt": ["$current_workload", "$max_students"] } },
                        ],
                    },
                    doc! {
                        "$push": { "students": student },
                        "$inc": { "current_workload": 1 },
                    },
                    options.clone(),
                )
                .await
                .map_err(Problem::from)?;

            match updated {
                Some(link) => {
                    assigned.push(student);
                    latest = link;
                }
                None => {
                    let reason = if latest.students.contains(&student) {
                        reason::ALREADY_ASSIGNED
                    } else {
                        reason::AT_CAPACITY
                    };
                    failed.push(AssignmentFailure {
                        student,
                        reason: reason.to_string(),
                        group: None,
                    });
                }
            }
        }

        let status = capacity::classify_mentor(latest.current_workload, latest.max_students);
        if status != latest.status {
            mentors
                .update_one(
                    filter::by_id(mentor_link_id),
                    doc! { "$set": { "status": bson::to_bson(&status).map_err(Problem::from)? } },
                    None,
                )
                .await
                .map_err(Problem::from)?;
        }

        if make_primary && !assigned.is_empty() {
            let assigned_bson = bson::to_bson(&assigned).map_err(Problem::from)?;

            // A student keeps only one primary mentor per mission.
            mentors
                .update_many(
                    doc! { "mission": latest.mission, "_id": { "$ne": latest.id } },
                    doc! { "$pullAll": { "primary_students": assigned_bson.clone() } },
                    None,
                )
                .await
                .map_err(Problem::from)?;

            mentors
                .update_one(
                    filter::by_id(mentor_link_id),
                    doc! { "$addToSet": { "primary_students": { "$each": assigned_bson } } },
                    None,
                )
                .await
                .map_err(Problem::from)?;
        }

        Ok(AssignmentOutcome {
            assigned_count: assigned.len(),
            assigned,
            failed,
        })
    }

    async fn assign_to_group(
        &self,
        group_id: Uuid,
        student_ids: &[Uuid],
    ) -> Result<AssignmentOutcome, Problem> {
        if student_ids.is_empty() {
            return Err(problem::no_students_given());
        }

        let groups = self.collection::<MentorshipGroup>(GROUP_COLLECTION_NAME);
        let group = self
            .group(group_id)
            .await?
            .ok_or_else(|| problem::group_not_found(group_id))?;

        if group.status == GroupStatus::Inactive {
            return Err(problem::group_inactive(group_id));
        }

        // A repeated id in one call must not consume two seats.
        let mut seen: HashSet<bson::Uuid> = HashSet::new();
        let requested: Vec<bson::Uuid> = student_ids
            .iter()
            .map(|id| filter::uuid(*id))
            .filter(|id| seen.insert(*id))
            .collect();

        // Whole-call capacity check, naming how many students still fit.
        if group.max_students > 0 {
            let combined = group.students.len() + requested.len();
            if combined > group.max_students as usize {
                let remaining = capacity::remaining_seats(group.students.len(), group.max_students)
                    .unwrap_or(0);
                return Err(problem::group_capacity_exceeded(group_id, remaining));
            }
        }

        let mut failed: Vec<AssignmentFailure> = vec![];
        let mut candidates: Vec<bson::Uuid> = vec![];

        for student in requested {
            if group.students.contains(&student) {
                failed.push(AssignmentFailure {
                    student,
                    reason: reason::ALREADY_ASSIGNED.to_string(),
                    group: Some(group.id),
                });
            } else {
                candidates.push(student);
            }
        }

        // Single-group invariant: a student may belong to at most one
        // member-holding group per mission.
        let others = member_holding_groups(self, group.mission, Some(group.id)).await?;
        let mut memberships: HashMap<bson::Uuid, bson::Uuid> = HashMap::new();
        for other in &others {
            for student in &other.students {
                memberships.entry(*student).or_insert(other.id);
            }
        }

        let (conflicting, valid): (Vec<bson::Uuid>, Vec<bson::Uuid>) = candidates
            .into_iter()
            .partition(|student| memberships.contains_key(student));

        for student in conflicting {
            failed.push(AssignmentFailure {
                student,
                reason: reason::ALREADY_IN_GROUP.to_string(),
                group: memberships.get(&student).copied(),
            });
        }

        if !valid.is_empty() {
            let count = valid.len() as i64;
            let valid_bson = bson::to_bson(&valid).map_err(Problem::from)?;

            // The size guard re-checks capacity inside the update, so two
            // concurrent assigns cannot jointly overflow the group.
            let result = groups
                .update_one(
                    doc! {
                        "_id": group.id,
                        "$or": [
                            { "max_students": 0 },
                            { "$expr": { "$lte": [
                                { "$add": [{ "$size": "$students" }, count] },
                                "$max_students",
                            ] } },
                        ],
                    },
                    doc! { "$addToSet": { "students": { "$each": valid_bson } } },
                    None,
                )
                .await
                .map_err(Problem::from)?;

            if result.modified_count == 0 {
                let remaining = capacity::remaining_seats(group.students.len(), group.max_students)
                    .unwrap_or(0);
                return Err(problem::group_capacity_exceeded(group_id, remaining));
            }

            let new_len = group.students.len() + valid.len();
            if capacity::is_full(new_len, group.max_students) {
                groups
                    .update_one(
                        filter::by_id(group_id),
                        doc! { "$set": { "status": "full" } },
                        None,
                    )
                    .await
                    .map_err(Problem::from)?;
            }

            Ok(AssignmentOutcome {
                assigned_count: valid.len(),
                assigned: valid,
                failed,
            })
        } else {
            Ok(AssignmentOutcome {
                assigned_count: 0,
                assigned: vec![],
                failed,
            })
        }
    }

    async fn remove_from_group(
        &self,
        group_id: Uuid,
        student_ids: &[Uuid],
    ) -> Result<MentorshipGroup, Problem> {
        if student_ids.is_empty() {
            return Err(problem::no_students_given());
        }

        let removed: Vec<bson::Uuid> = student_ids.iter().map(|id| filter::uuid(*id)).collect();
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let mut group = self
            .collection::<MentorshipGroup>(GROUP_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(group_id),
                doc! { "$pullAll": {
                    "students": bson::to_bson(&removed).map_err(Problem::from)?,
                } },
                options,
            )
            .await
            .map_err(Problem::from)?
            .ok_or_else(|| problem::group_not_found(group_id))?;

        if group.status == GroupStatus::Full
            && !capacity::is_full(group.students.len(), group.max_students)
        {
            self.collection::<MentorshipGroup>(GROUP_COLLECTION_NAME)
                .update_one(
                    filter::by_id(group_id),
                    doc! { "$set": { "status": "active" } },
                    None,
                )
                .await
                .map_err(Problem::from)?;
            group.status = GroupStatus::Active;
        }

        Ok(group)
    }

    async fn available_mentors(&self, mission_id: Uuid) -> Result<Vec<MissionMentor>, Problem> {
        let mission = filter::uuid(mission_id);
        let groups = member_holding_groups(self, mission, None).await?;

        let grouped: HashSet<bson::Uuid> = groups
            .iter()
            .flat_map(|group| group.mentors.iter().map(|m| m.mentor))
            .collect();

        let mut cursor = self
            .collection::<MissionMentor>(MISSION_MENTOR_COLLECTION_NAME)
            .find(filter::by_mission(mission_id), None)
            .await
            .map_err(Problem::from)?;

        let mut available = vec![];
        while let Some(link) = cursor.next().await {
            match link {
                Ok(link) => {
                    if !grouped.contains(&link.mentor) {
                        available.push(link);
                    }
                }
                Err(_) => {
                    tracing::warn!("Unable to deserialize MissionMentor document.")
                }
            }
        }

        Ok(available)
    }

    async fn available_students(&self, mission_id: Uuid) -> Result<Vec<MissionStudent>, Problem> {
        let mission = filter::uuid(mission_id);
        let groups = member_holding_groups(self, mission, None).await?;

        let grouped: HashSet<bson::Uuid> = groups
            .iter()
            .flat_map(|group| group.students.iter().copied())
            .collect();

        let mut cursor = self
            .collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME)
            .find(filter::by_mission(mission_id), None)
            .await
            .map_err(Problem::from)?;

        let mut available = vec![];
        while let Some(enrollment) = cursor.next().await {
            match enrollment {
                Ok(enrollment) => {
                    if !grouped.contains(&enrollment.student) {
                        available.push(enrollment);
                    }
                }
                Err(_) => {
                    tracing::warn!("Unable to deserialize MissionStudent document.")
                }
            }
        }

        Ok(available)
    }
}
