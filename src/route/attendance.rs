use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use mongodb::Database;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::State;
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::attendance::db::problem as attendance_problem;
use crate::data::attendance::db::{
    AttendanceDbExt, BulkMarkOutcome, BulkTarget, FormCreateData,
};
use crate::data::attendance::{AttendanceForm, AttendanceLog, AttendanceStatus};
use crate::resp::problem::Problem;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkData {
    #[schema(value_type = String)]
    pub student_id: Uuid,
    pub status: String,
    /// Defaults to today.
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Date)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub answers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkMarkData {
    pub status: String,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Date)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub group_id: Option<Uuid>,
    #[serde(default)]
    #[schema(value_type = Option<Vec<String>>)]
    pub student_ids: Option<Vec<Uuid>>,
}

/// Mark a student's attendance for a calendar date
///
/// Marking the same (student, date) twice overwrites the first mark.
#[utoipa::path(
    request_body = MarkData,
    responses(
        (status = 200, description = "The upserted log record", body = AttendanceLog),
        (status = 400, description = "Invalid status", body = Problem),
        (status = 404, description = "Student isn't enrolled", body = Problem),
    )
)]
#[post("/mission/<id>/attendance", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn attendance_mark(
    id: Uuid,
    data: Json<MarkData>,
    db: &State<Database>,
) -> Result<Json<AttendanceLog>, Problem> {
    let data = data.into_inner();
    let status = AttendanceStatus::from_str(&data.status)
        .map_err(|_| attendance_problem::invalid_status(&data.status))?;
    let date = data.date.unwrap_or_else(|| Utc::now().date_naive());

    let log = db
        .mark_attendance(id, data.student_id, date, status, data.notes, data.answers)
        .await?;

    Ok(Json(log))
}

/// Mark attendance for a group or an explicit list of students
///
/// Partial failures (e.g. a student without an enrollment) are collected
/// and reported instead of aborting the batch.
#[utoipa::path(
    request_body = BulkMarkData,
    responses(
        (status = 200, description = "Per-student marking report", body = BulkMarkOutcome),
        (status = 400, description = "Invalid status or target", body = Problem),
        (status = 404, description = "Group doesn't exist", body = Problem),
    )
)]
#[post("/mission/<id>/attendance/bulk", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn attendance_bulk_mark(
    id: Uuid,
    data: Json<BulkMarkData>,
    db: &State<Database>,
) -> Result<Json<BulkMarkOutcome>, Problem> {
    let data = data.into_inner();
    let status = AttendanceStatus::from_str(&data.status)
        .map_err(|_| attendance_problem::invalid_status(&data.status))?;
    let date = data.date.unwrap_or_else(|| Utc::now().date_naive());

    let target = match (data.group_id, data.student_ids) {
        (Some(group), None) => BulkTarget::Group(group),
        (None, Some(students)) => BulkTarget::Students(students),
        _ => return Err(attendance_problem::ambiguous_target()),
    };

    let outcome = db
        .bulk_mark_attendance(id, date, status, data.notes, target)
        .await?;

    Ok(Json(outcome))
}

/// Create an attendance form for a mission
#[utoipa::path(request_body = FormCreateData)]
#[post("/mission/<id>/attendance-form", format = "application/json", data = "<form>")]
#[tracing::instrument(skip(db))]
pub async fn attendance_form_create(
    id: Uuid,
    form: Json<FormCreateData>,
    db: &State<Database>,
) -> Result<Created<Json<AttendanceForm>>, Problem> {
    let form = db.create_attendance_form(id, form.into_inner()).await?;

    Ok(Created::new(format!("/api/v1/attendance-form/{}", form.id)).body(Json(form)))
}

/// Activate an attendance form, deactivating the mission's others
#[utoipa::path(
    responses(
        (status = 200, description = "The activated form", body = AttendanceForm),
        (status = 404, description = "Form doesn't exist", body = Problem),
    )
)]
#[put("/attendance-form/<id>/activate")]
#[tracing::instrument(skip(db))]
pub async fn attendance_form_activate(
    id: Uuid,
    db: &State<Database>,
) -> Result<Json<AttendanceForm>, Problem> {
    Ok(Json(db.activate_form(id).await?))
}

/// Get a mission's active attendance form
#[utoipa::path(
    responses(
        (status = 200, description = "The active form", body = AttendanceForm),
        (status = 404, description = "No active form"),
    )
)]
#[get("/mission/<id>/attendance-form")]
#[tracing::instrument(skip(db))]
pub async fn attendance_form_active(
    id: Uuid,
    db: &State<Database>,
) -> Result<Option<Json<AttendanceForm>>, Problem> {
    Ok(db.active_form(id).await?.map(Json))
}

///////////////////////
//       TESTS
///////////////////////
