use bson::doc;
use chrono::{NaiveDate, Utc};
use mongodb::options::{FindOneAndUpdateOptions, FindOneOptions, ReturnDocument};
use mongodb::Database;
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    coerce_answers, AttendanceForm, AttendanceLog, AttendanceQuestion, AttendanceStatus,
    ATTENDANCE_FORM_COLLECTION_NAME, ATTENDANCE_LOG_COLLECTION_NAME,
};
use crate::data::filter;
use crate::data::mentorship::db::AssignmentDbExt;
use crate::data::mission::{MissionStudent, MISSION_STUDENT_COLLECTION_NAME};
use crate::resp::problem::Problem;

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn form_not_found(id: Uuid) -> Problem {
        problems::not_found("Attendance form doesn't exist.")
            .insert("formId", id.to_string())
            .clone()
    }

    #[inline]
    pub fn invalid_status(status: impl ToString) -> Problem {
        problems::invalid_input("Unknown attendance status.")
            .insert_str("status", status)
            .detail("Supported statuses are 'present', 'absent' and 'excused'.")
            .clone()
    }

    #[inline]
    pub fn ambiguous_target() -> Problem {
        problems::invalid_input("Bulk marking needs either a group id or a student id list.")
    }

    #[inline]
    pub fn no_targets() -> Problem {
        problems::invalid_input("No students to mark.")
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FormCreateData {
    pub title: String,
    #[serde(default)]
    pub questions: Vec<AttendanceQuestion>,
    /// Activate immediately, deactivating any other form of the mission.
    #[serde(default)]
    pub activate: bool,
}

/// Target set of a bulk marking call.
#[derive(Debug, Clone)]
pub enum BulkTarget {
    Group(Uuid),
    Students(Vec<Uuid>),
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkMarkFailure {
    #[schema(value_type = String)]
    pub student: bson::Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkMarkOutcome {
    pub marked_count: usize,
    #[schema(value_type = Vec<String>)]
    pub marked: Vec<bson::Uuid>,
    pub failed: Vec<BulkMarkFailure>,
}

pub trait AttendanceDbExt {
    async fn create_attendance_form(
        &self,
        mission_id: Uuid,
        data: FormCreateData,
    ) -> Result<AttendanceForm, Problem>;

    async fn activate_form(&self, form_id: Uuid) -> Result<AttendanceForm, Problem>;

    async fn active_form(&self, mission_id: Uuid) -> Result<Option<AttendanceForm>, Problem>;

    /// Upserts the log keyed by (mission, student, date); a second mark on
    /// the same day overwrites the first.
    async fn mark_attendance(
        &self,
        mission_id: Uuid,
        student_id: Uuid,
        date: NaiveDate,
        status: AttendanceStatus,
        notes: Option<String>,
        answers: Map<String, Value>,
    ) -> Result<AttendanceLog, Problem>;

    async fn bulk_mark_attendance(
        &self,
        mission_id: Uuid,
        date: NaiveDate,
        status: AttendanceStatus,
        notes: Option<String>,
        target: BulkTarget,
    ) -> Result<BulkMarkOutcome, Problem>;
}

impl AttendanceDbExt for Database {
    async fn create_attendance_form(
        &self,
        mission_id: Uuid,
        data: FormCreateData,
    ) -> Result<AttendanceForm, Problem> {
        use crate::data::mission::db::RosterDbExt;
        let mission = self.require_mission(mission_id).await?;

        let forms = self.collection::<AttendanceForm>(ATTENDANCE_FORM_COLLECTION_NAME);

        let latest = forms
            .find_one(
                filter::by_mission(mission_id),
                FindOneOptions::builder()
                    .sort(doc! { "version": -1 })
                    .build(),
            )
            .await
            .map_err(Problem::from)?;

        let form = AttendanceForm {
            id: bson::Uuid::new(),
            mission: mission.id,
            title: data.title,
            version: latest.map(|f| f.version + 1).unwrap_or(1),
            active: false,
            questions: data.questions,
            created: Utc::now(),
        };

        forms.insert_one(&form, None).await.map_err(Problem::from)?;

        if data.activate {
            return self.activate_form(form.id.into()).await;
        }

        Ok(form)
    }

    async fn activate_form(&self, form_id: Uuid) -> Result<AttendanceForm, Problem> {
        let forms = self.collection::<AttendanceForm>(ATTENDANCE_FORM_COLLECTION_NAME);

        let form = forms
            .find_one(filter::by_id(form_id), None)
            .await
            .map_err(Problem::from)?
            .ok_or_else(|| problem::form_not_found(form_id))?;

        // At most one active form per mission.
        forms
            .update_many(
                doc! { "mission": form.mission, "_id": { "$ne": form.id } },
                doc! { "$set": { "active": false } },
                None,
            )
            .await
            .map_err(Problem::from)?;

        forms
            .find_one_and_update(
                filter::by_id(form_id),
                doc! { "$set": { "active": true } },
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(Problem::from)?
            .ok_or_else(|| problem::form_not_found(form_id))
    }

    async fn active_form(&self, mission_id: Uuid) -> Result<Option<AttendanceForm>, Problem> {
        self.collection::<AttendanceForm>(ATTENDANCE_FORM_COLLECTION_NAME)
            .find_one(
                doc! { "mission": filter::uuid(mission_id), "active": true },
                None,
            )
            .await
            .map_err(Problem::from)
    }

    async fn mark_attendance(
        &self,
        mission_id: Uuid,
        student_id: Uuid,
        date: NaiveDate,
        status: AttendanceStatus,
        notes: Option<String>,
        answers: Map<String, Value>,
    ) -> Result<AttendanceLog, Problem> {
        let enrollment = self
            .collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME)
            .find_one(filter::by_mission_student(mission_id, student_id), None)
            .await
            .map_err(Problem::from)?;

        if enrollment.is_none() {
            return Err(crate::data::mission::db::problem::student_not_enrolled(
                mission_id, student_id,
            ));
        }

        let form = self.active_form(mission_id).await?;
        let answers = coerce_answers(form.as_ref(), answers);

        let key = doc! {
            "mission": filter::uuid(mission_id),
            "student": filter::uuid(student_id),
            "date": bson::to_bson(&date).map_err(Problem::from)?,
        };

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        self.collection::<AttendanceLog>(ATTENDANCE_LOG_COLLECTION_NAME)
            .find_one_and_update(
                key,
                doc! {
                    "$set": {
                        "status": status.to_string(),
                        "notes": bson::to_bson(&notes).map_err(Problem::from)?,
                        "answers": bson::to_bson(&answers).map_err(Problem::from)?,
                        "recorded_at": bson::to_bson(&Utc::now()).map_err(Problem::from)?,
                    },
                    "$setOnInsert": { "_id": bson::Uuid::new() },
                },
                options,
            )
            .await
            .map_err(Problem::from)?
            .ok_or_else(|| {
                crate::resp::problem::problems::internal("Attendance upsert returned no document.")
            })
    }

    async fn bulk_mark_attendance(
        &self,
        mission_id: Uuid,
        date: NaiveDate,
        status: AttendanceStatus,
        notes: Option<String>,
        target: BulkTarget,
    ) -> Result<BulkMarkOutcome, Problem> {
        let targets: Vec<Uuid> = match target {
            BulkTarget::Group(group_id) => {
                let group = self
                    .group(group_id)
                    .await?
                    .ok_or_else(|| crate::data::mentorship::db::problem::group_not_found(group_id))?;
                group.students.iter().map(|id| (*id).into()).collect()
            }
            BulkTarget::Students(ids) => ids,
        };

        if targets.is_empty() {
            return Err(problem::no_targets());
        }

        let mut marked: Vec<bson::Uuid> = vec![];
        let mut failed: Vec<BulkMarkFailure> = vec![];

        for student in targets {
            match self
                .mark_attendance(
                    mission_id,
                    student,
                    date,
                    status,
                    notes.clone(),
                    Map::new(),
                )
                .await
            {
                Ok(log) => marked.push(log.student),
                Err(problem) => failed.push(BulkMarkFailure {
                    student: filter::uuid(student),
                    reason: problem.title,
                }),
            }
        }

        Ok(BulkMarkOutcome {
            marked_count: marked.len(),
            marked,
            failed,
        })
    }
}
