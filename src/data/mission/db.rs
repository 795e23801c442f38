use std::collections::HashSet;
use std::str::FromStr;

use bson::doc;
use chrono::Utc;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::Database;
use rocket::futures::StreamExt;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    EnrollmentStatus, Mission, MissionStudent, RosterDebugReport, RosterEntry, RosterListing,
    MISSION_COLLECTION_NAME, MISSION_STUDENT_COLLECTION_NAME,
};
use crate::data::batch::BatchMembershipDbExt;
use crate::data::filter;
use crate::resp::problem::Problem;

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn mission_not_found(id: Uuid) -> Problem {
        problems::not_found("Mission doesn't exist.")
            .insert("missionId", id.to_string())
            .clone()
    }

    #[inline]
    pub fn student_not_enrolled(mission: Uuid, student: Uuid) -> Problem {
        problems::not_found("Student isn't enrolled in mission.")
            .insert("missionId", mission.to_string())
            .insert("studentId", student.to_string())
            .clone()
    }

    #[inline]
    pub fn missing_batch_membership(ids: &[bson::Uuid]) -> Problem {
        problems::precondition("Students lack an approved batch membership.")
            .detail("Every student must be approved in the mission's batch before enrollment.")
            .insert("missingStudentIds", ids)
            .clone()
    }

    #[inline]
    pub fn already_enrolled(ids: &[bson::Uuid]) -> Problem {
        problems::conflict("Students are already enrolled in mission.")
            .insert("existingStudentIds", ids)
            .clone()
    }

    #[inline]
    pub fn no_students_given() -> Problem {
        problems::invalid_input("No student ids were provided.")
    }

    #[inline]
    pub fn unknown_action(action: impl ToString) -> Problem {
        problems::invalid_input("Unknown reconcile action.")
            .insert_str("action", action)
            .detail("Supported actions are 'clear', 'fix' and 'sync'.")
            .clone()
    }

    #[inline]
    pub fn invalid_status(status: impl ToString) -> Problem {
        problems::invalid_input("Unknown enrollment status.")
            .insert_str("status", status)
            .clone()
    }

    #[inline]
    pub fn invalid_progress(progress: u8) -> Problem {
        problems::invalid_input("Progress must be between 0 and 100.")
            .insert("progress", progress)
            .clone()
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MissionCreateData {
    pub code: String,
    pub title: String,
    #[schema(value_type = String)]
    pub batch: Uuid,
    #[serde(default)]
    pub max_students: u32,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReconcileAction {
    Clear,
    Fix,
    Sync,
}

impl FromStr for ReconcileAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clear" => Ok(ReconcileAction::Clear),
            "fix" => Ok(ReconcileAction::Fix),
            "sync" => Ok(ReconcileAction::Sync),
            other => Err(format!("unknown reconcile action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub action: String,
    pub removed_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
}

pub trait RosterDbExt {
    async fn create_mission(&self, data: MissionCreateData) -> Result<Mission, Problem>;

    async fn mission(&self, id: Uuid) -> Result<Option<Mission>, Problem>;

    /// Like [`RosterDbExt::mission`] but maps the missing case to a 404.
    async fn require_mission(&self, id: Uuid) -> Result<Mission, Problem>;

    async fn enroll_students(
        &self,
        mission_id: Uuid,
        student_ids: &[Uuid],
    ) -> Result<Vec<MissionStudent>, Problem>;

    async fn update_student_status(
        &self,
        mission_id: Uuid,
        student_id: Uuid,
        status: EnrollmentStatus,
    ) -> Result<MissionStudent, Problem>;

    async fn update_student_progress(
        &self,
        mission_id: Uuid,
        student_id: Uuid,
        progress: u8,
    ) -> Result<MissionStudent, Problem>;

    async fn remove_student(&self, mission_id: Uuid, student_id: Uuid) -> Result<(), Problem>;

    async fn list_roster(
        &self,
        mission_id: Uuid,
        include_batch: bool,
        debug: bool,
    ) -> Result<RosterListing, Problem>;

    async fn reconcile(
        &self,
        mission_id: Uuid,
        action: ReconcileAction,
    ) -> Result<ReconcileOutcome, Problem>;
}

impl RosterDbExt for Database {
    async fn create_mission(&self, data: MissionCreateData) -> Result<Mission, Problem> {
        let mission = Mission {
            id: bson::Uuid::new(),
            code: data.code,
            title: data.title,
            status: Default::default(),
            batch: filter::uuid(data.batch),
            max_students: data.max_students,
            total_students: 0,
            student_ids: vec![],
            created: Utc::now(),
        };

        self.collection::<Mission>(MISSION_COLLECTION_NAME)
            .insert_one(&mission, None)
            .await
            .map_err(Problem::from)?;

        Ok(mission)
    }

    async fn mission(&self, id: Uuid) -> Result<Option<Mission>, Problem> {
        self.collection::<Mission>(MISSION_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn require_mission(&self, id: Uuid) -> Result<Mission, Problem> {
        self.mission(id)
            .await?
            .ok_or_else(|| problem::mission_not_found(id))
    }

    async fn enroll_students(
        &self,
        mission_id: Uuid,
        student_ids: &[Uuid],
    ) -> Result<Vec<MissionStudent>, Problem> {
        if student_ids.is_empty() {
            return Err(problem::no_students_given());
        }

        let mission = self.require_mission(mission_id).await?;

        // A repeated id in one call must not become two enrollments.
        let mut seen: HashSet<bson::Uuid> = HashSet::new();
        let ids: Vec<bson::Uuid> = student_ids
            .iter()
            .map(|id| filter::uuid(*id))
            .filter(|id| seen.insert(*id))
            .collect();

        // All-or-nothing precondition: every student needs an approved
        // membership in the mission's batch before anything is inserted.
        let approved = self.approved_member_ids(mission.batch.into()).await?;
        let missing: Vec<bson::Uuid> = ids
            .iter()
            .filter(|id| !approved.contains(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(problem::missing_batch_membership(&missing));
        }

        let students = self.collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME);
        let ids_bson = bson::to_bson(&ids).map_err(Problem::from)?;

        let mut existing_cursor = students
            .find(
                doc! { "mission": mission.id, "student": { "$in": ids_bson.clone() } },
                None,
            )
            .await
            .map_err(Problem::from)?;

        let mut existing: Vec<bson::Uuid> = vec![];
        while let Some(enrollment) = existing_cursor.next().await {
            if let Ok(enrollment) = enrollment {
                existing.push(enrollment.student);
            }
        }
        if !existing.is_empty() {
            return Err(problem::already_enrolled(&existing));
        }

        let now = Utc::now();
        let enrollments: Vec<MissionStudent> = ids
            .iter()
            .map(|student| MissionStudent {
                id: bson::Uuid::new(),
                mission: mission.id,
                student: *student,
                batch: mission.batch,
                status: EnrollmentStatus::Active,
                progress: 0,
                attendance_rate: 100.0,
                enrolled_at: now,
                last_activity_at: now,
            })
            .collect();

        students
            .insert_many(&enrollments, None)
            .await
            .map_err(Problem::from)?;

        // Summary counters move atomically, never read-modify-write.
        self.collection::<Mission>(MISSION_COLLECTION_NAME)
            .update_one(
                filter::by_id(mission_id),
                doc! {
                    "$inc": { "total_students": ids.len() as i64 },
                    "$push": { "student_ids": { "$each": ids_bson } },
                },
                None,
            )
            .await
            .map_err(Problem::from)?;

        Ok(enrollments)
    }

    async fn update_student_status(
        &self,
        mission_id: Uuid,
        student_id: Uuid,
        status: EnrollmentStatus,
    ) -> Result<MissionStudent, Problem> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_mission_student(mission_id, student_id),
                doc! { "$set": {
                    "status": status.to_string(),
                    "last_activity_at": bson::to_bson(&Utc::now()).map_err(Problem::from)?,
                } },
                options,
            )
            .await
            .map_err(Problem::from)?
            .ok_or_else(|| problem::student_not_enrolled(mission_id, student_id))
    }

    async fn update_student_progress(
        &self,
        mission_id: Uuid,
        student_id: Uuid,
        progress: u8,
    ) -> Result<MissionStudent, Problem> {
        if progress > 100 {
            return Err(problem::invalid_progress(progress));
        }

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_mission_student(mission_id, student_id),
                doc! { "$set": {
                    "progress": progress as i32,
                    "last_activity_at": bson::to_bson(&Utc::now()).map_err(Problem::from)?,
                } },
                options,
            )
            .await
            .map_err(Problem::from)?
            .ok_or_else(|| problem::student_not_enrolled(mission_id, student_id))
    }

    async fn remove_student(&self, mission_id: Uuid, student_id: Uuid) -> Result<(), Problem> {
        let removed = self
            .collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME)
            .find_one_and_delete(filter::by_mission_student(mission_id, student_id), None)
            .await
            .map_err(Problem::from)?;

        if removed.is_none() {
            return Err(problem::student_not_enrolled(mission_id, student_id));
        }

        self.collection::<Mission>(MISSION_COLLECTION_NAME)
            .update_one(
                filter::by_id(mission_id),
                doc! {
                    "$inc": { "total_students": -1 },
                    "$pull": { "student_ids": filter::uuid(student_id) },
                },
                None,
            )
            .await
            .map_err(Problem::from)?;

        Ok(())
    }

    async fn list_roster(
        &self,
        mission_id: Uuid,
        include_batch: bool,
        debug: bool,
    ) -> Result<RosterListing, Problem> {
        let mission = self.require_mission(mission_id).await?;

        let mut cursor = self
            .collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME)
            .find(filter::by_mission(mission_id), None)
            .await
            .map_err(Problem::from)?;

        let mut enrolled_ids: HashSet<bson::Uuid> = HashSet::new();
        let mut students: Vec<RosterEntry> = vec![];
        while let Some(enrollment) = cursor.next().await {
            match enrollment {
                Ok(enrollment) => {
                    enrolled_ids.insert(enrollment.student);
                    students.push(RosterEntry::Enrolled(enrollment));
                }
                Err(_) => {
                    tracing::warn!("Unable to deserialize MissionStudent document.")
                }
            }
        }

        let approved = if include_batch || debug {
            Some(self.approved_member_ids(mission.batch.into()).await?)
        } else {
            None
        };

        if include_batch {
            for member in approved.as_ref().unwrap() {
                if !enrolled_ids.contains(member) {
                    students.push(RosterEntry::BatchOnly {
                        student: *member,
                        batch: mission.batch,
                    });
                }
            }
        }

        let debug = if debug {
            let enrolled_count = enrolled_ids.len() as u64;
            let approved_count = approved.as_ref().unwrap().len() as u64;
            Some(RosterDebugReport {
                enrolled_count,
                approved_count,
                counts_match: enrolled_count == approved_count,
            })
        } else {
            None
        };

        Ok(RosterListing { students, debug })
    }

    async fn reconcile(
        &self,
        mission_id: Uuid,
        action: ReconcileAction,
    ) -> Result<ReconcileOutcome, Problem> {
        let students = self.collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME);
        let missions = self.collection::<Mission>(MISSION_COLLECTION_NAME);

        match action {
            ReconcileAction::Clear => {
                let result = students
                    .delete_many(filter::by_mission(mission_id), None)
                    .await
                    .map_err(Problem::from)?;

                missions
                    .update_one(
                        filter::by_id(mission_id),
                        doc! { "$set": { "total_students": 0, "student_ids": [] } },
                        None,
                    )
                    .await
                    .map_err(Problem::from)?;

                tracing::info!(
                    mission = %mission_id,
                    removed = result.deleted_count,
                    "cleared mission roster"
                );

                Ok(ReconcileOutcome {
                    action: "clear".to_string(),
                    removed_count: result.deleted_count,
                    deprecated: None,
                })
            }
            ReconcileAction::Fix => {
                let mission = self.require_mission(mission_id).await?;
                let approved = self.approved_member_ids(mission.batch.into()).await?;
                let approved_ids: Vec<bson::Uuid> = approved.into_iter().collect();

                let result = students
                    .delete_many(
                        doc! {
                            "mission": filter::uuid(mission_id),
                            "student": { "$nin": bson::to_bson(&approved_ids).map_err(Problem::from)? },
                        },
                        None,
                    )
                    .await
                    .map_err(Problem::from)?;

                // The surviving records are the authoritative set; rebuilding
                // the summary from them never re-adds students that were
                // never actually enrolled.
                let mut cursor = students
                    .find(filter::by_mission(mission_id), None)
                    .await
                    .map_err(Problem::from)?;

                let mut remaining: Vec<bson::Uuid> = vec![];
                while let Some(enrollment) = cursor.next().await {
                    if let Ok(enrollment) = enrollment {
                        remaining.push(enrollment.student);
                    }
                }

                missions
                    .update_one(
                        filter::by_id(mission_id),
                        doc! { "$set": {
                            "total_students": remaining.len() as i64,
                            "student_ids": bson::to_bson(&remaining).map_err(Problem::from)?,
                        } },
                        None,
                    )
                    .await
                    .map_err(Problem::from)?;

                tracing::info!(
                    mission = %mission_id,
                    removed = result.deleted_count,
                    remaining = remaining.len(),
                    "fixed mission roster against batch membership"
                );

                Ok(ReconcileOutcome {
                    action: "fix".to_string(),
                    removed_count: result.deleted_count,
                    deprecated: None,
                })
            }
            ReconcileAction::Sync => {
                // MissionStudent is the only membership representation, so
                // there is nothing left to synchronize. Kept for callers of
                // the old API.
                tracing::warn!(
                    mission = %mission_id,
                    "'sync' reconcile action is deprecated and performs no work"
                );

                Ok(ReconcileOutcome {
                    action: "sync".to_string(),
                    removed_count: 0,
                    deprecated: Some(
                        "'sync' performs no work; enrollment records are the only membership \
                         representation."
                            .to_string(),
                    ),
                })
            }
        }
    }
}
