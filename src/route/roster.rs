use std::str::FromStr;

use mongodb::Database;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::State;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::batch::{AddMembersData, BatchMembership, BatchMembershipDbExt};
use crate::data::capacity::{MissionStats, ResolverDbExt};
use crate::data::mission::db::problem as roster_problem;
use crate::data::mission::db::{
    MissionCreateData, ReconcileAction, ReconcileOutcome, RosterDbExt,
};
use crate::data::mission::{EnrollmentStatus, Mission, MissionStudent, RosterListing};
use crate::resp::problem::Problem;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollData {
    #[schema(value_type = Vec<String>)]
    pub student_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    pub enrollments: Vec<MissionStudent>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StatusUpdateData {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProgressUpdateData {
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StudentResponse {
    pub student: MissionStudent,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReconcileData {
    pub action: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Create a mission
#[utoipa::path(request_body = MissionCreateData)]
#[post("/mission", format = "application/json", data = "<mission>")]
#[tracing::instrument(skip(db))]
pub async fn mission_create(
    mission: Json<MissionCreateData>,
    db: &State<Database>,
) -> Result<Created<Json<Mission>>, Problem> {
    let mission = db.create_mission(mission.into_inner()).await?;

    Ok(Created::new(format!("/api/v1/mission/{}", mission.id)).body(Json(mission)))
}

/// List a mission's roster
///
/// With `include_batch_students`, approved batch members that aren't
/// enrolled yet are merged in as inert batch-only rows so coverage gaps are
/// visible. `debug` adds a count comparison against the approved set.
#[utoipa::path(
    params(
        ("id", description = "mission ID"),
    ),
    responses(
        (status = 200, description = "Mission roster", body = RosterListing),
        (status = 404, description = "Mission doesn't exist", body = Problem),
    )
)]
#[get("/mission/<id>/students?<include_batch_students>&<debug>")]
#[tracing::instrument(skip(db, debug))]
pub async fn mission_students(
    id: Uuid,
    include_batch_students: Option<bool>,
    debug: Option<bool>,
    db: &State<Database>,
) -> Result<Json<RosterListing>, Problem> {
    let listing = db
        .list_roster(
            id,
            include_batch_students.unwrap_or(false),
            debug.unwrap_or(false),
        )
        .await?;

    Ok(Json(listing))
}

/// Enroll students into a mission
///
/// All-or-nothing: every student needs an approved batch membership and no
/// existing enrollment, otherwise the whole call fails naming the offending
/// ids.
#[utoipa::path(
    request_body = EnrollData,
    responses(
        (status = 201, description = "Created enrollments", body = EnrollResponse),
        (status = 400, description = "Missing membership or duplicate enrollment", body = Problem),
        (status = 404, description = "Mission doesn't exist", body = Problem),
    )
)]
#[post("/mission/<id>/students", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn mission_enroll(
    id: Uuid,
    data: Json<EnrollData>,
    db: &State<Database>,
) -> Result<Created<Json<EnrollResponse>>, Problem> {
    let enrollments = db.enroll_students(id, &data.student_ids).await?;

    Ok(Created::new(format!("/api/v1/mission/{}/students", id))
        .body(Json(EnrollResponse { enrollments })))
}

/// Update an enrollment's status
#[utoipa::path(request_body = StatusUpdateData)]
#[put("/mission/<id>/student?<student>", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn mission_student_status(
    id: Uuid,
    student: Uuid,
    data: Json<StatusUpdateData>,
    db: &State<Database>,
) -> Result<Json<StudentResponse>, Problem> {
    let status = EnrollmentStatus::from_str(&data.status)
        .map_err(|_| roster_problem::invalid_status(&data.status))?;

    let updated = db.update_student_status(id, student, status).await?;

    Ok(Json(StudentResponse { student: updated }))
}

/// Update an enrollment's progress percentage
#[utoipa::path(request_body = ProgressUpdateData)]
#[put(
    "/mission/<id>/student/progress?<student>",
    format = "application/json",
    data = "<data>"
)]
#[tracing::instrument(skip(db))]
pub async fn mission_student_progress(
    id: Uuid,
    student: Uuid,
    data: Json<ProgressUpdateData>,
    db: &State<Database>,
) -> Result<Json<StudentResponse>, Problem> {
    let updated = db.update_student_progress(id, student, data.progress).await?;

    Ok(Json(StudentResponse { student: updated }))
}

/// Remove a student from a mission
#[utoipa::path(
    responses(
        (status = 200, description = "Enrollment removed", body = MessageResponse),
        (status = 404, description = "Student isn't enrolled", body = Problem),
    )
)]
#[delete("/mission/<id>/student?<student>")]
#[tracing::instrument(skip(db))]
pub async fn mission_student_remove(
    id: Uuid,
    student: Uuid,
    db: &State<Database>,
) -> Result<Json<MessageResponse>, Problem> {
    db.remove_student(id, student).await?;

    Ok(Json(MessageResponse {
        message: format!("Student {} removed from mission {}.", student, id),
    }))
}

/// Bulk-reconcile a mission's roster
///
/// `clear` wipes every enrollment, `fix` drops enrollments inconsistent
/// with current batch membership, `sync` is a deprecated no-op kept for API
/// compatibility.
#[utoipa::path(
    request_body = ReconcileData,
    responses(
        (status = 200, description = "Reconcile report", body = ReconcileOutcome),
        (status = 400, description = "Unknown action", body = Problem),
        (status = 404, description = "Mission doesn't exist", body = Problem),
    )
)]
#[post("/mission/<id>/reconcile", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn mission_reconcile(
    id: Uuid,
    data: Json<ReconcileData>,
    db: &State<Database>,
) -> Result<Json<ReconcileOutcome>, Problem> {
    let action = ReconcileAction::from_str(&data.action)
        .map_err(|_| roster_problem::unknown_action(&data.action))?;

    Ok(Json(db.reconcile(id, action).await?))
}

/// Mission-wide aggregate counts
#[utoipa::path(
    responses(
        (status = 200, description = "Aggregate enrollment and capacity counts", body = MissionStats),
    )
)]
#[get("/mission/<id>/stats")]
#[tracing::instrument(skip(db))]
pub async fn mission_stats(id: Uuid, db: &State<Database>) -> Result<Json<MissionStats>, Problem> {
    Ok(Json(db.mission_stats(id).await?))
}

/// Seed batch memberships
#[utoipa::path(request_body = AddMembersData)]
#[post("/batch/<id>/members", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn batch_members_add(
    id: Uuid,
    data: Json<AddMembersData>,
    db: &State<Database>,
) -> Result<Created<Json<Vec<BatchMembership>>>, Problem> {
    let members = db.add_batch_members(id, data.into_inner()).await?;

    Ok(Created::new(format!("/api/v1/batch/{}/members", id)).body(Json(members)))
}

///////////////////////
//       TESTS
///////////////////////

#[cfg(test)]
mod roster_endpoints {
    use bson::doc;
    use mongodb::Database;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{json, Value};
    use uuid::Uuid;

    use crate::data::batch::{AddMembersData, BatchMembership, BATCH_MEMBER_COLLECTION_NAME};
    use crate::data::batch::BatchMembershipDbExt;
    use crate::data::filter;
    use crate::data::mission::db::{MissionCreateData, RosterDbExt};
    use crate::data::mission::{Mission, MissionStudent, MISSION_STUDENT_COLLECTION_NAME};

    async fn test_client() -> Client {
        Client::tracked(crate::create(None).await.expect("invalid backend"))
            .await
            .expect("invalid rocket instance")
    }

    async fn seed_mission(db: &Database, students: &[Uuid]) -> Mission {
        let batch = Uuid::new_v4();
        db.add_batch_members(
            batch,
            AddMembersData {
                student_ids: students.to_vec(),
                status: None,
            },
        )
        .await
        .expect("unable to seed batch members");

        db.create_mission(MissionCreateData {
            code: "M-TEST".to_string(),
            title: "Test mission".to_string(),
            batch,
            max_students: 0,
        })
        .await
        .expect("unable to seed mission")
    }

    #[rocket::async_test]
    async fn enroll_updates_mission_summary() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mission = seed_mission(db, &[a, b]).await;

        let response = client
            .post(format!("/api/v1/mission/{}/students", mission.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": [a, b] }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Created, "a created response");

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["enrollments"].as_array().unwrap().len(), 2);

        let mission = db.require_mission(mission.id.into()).await.unwrap();
        assert_eq!(mission.total_students, 2);
        assert_eq!(mission.student_ids.len(), 2);
    }

    #[rocket::async_test]
    async fn repeated_ids_in_one_enroll_call_collapse_to_one_enrollment() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let a = Uuid::new_v4();
        let mission = seed_mission(db, &[a]).await;

        let response = client
            .post(format!("/api/v1/mission/{}/students", mission.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": [a, a] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["enrollments"].as_array().unwrap().len(), 1);

        let records = db
            .collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME)
            .count_documents(
                doc! { "mission": mission.id, "student": filter::uuid(a) },
                None,
            )
            .await
            .unwrap();
        assert_eq!(records, 1, "one record per (mission, student)");

        let mission = db.require_mission(mission.id.into()).await.unwrap();
        assert_eq!(mission.total_students, 1);
        assert_eq!(mission.student_ids, vec![filter::uuid(a)]);
    }

    #[rocket::async_test]
    async fn re_enrolling_reports_existing_ids() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mission = seed_mission(db, &[a, b]).await;
        db.enroll_students(mission.id.into(), &[a, b]).await.unwrap();

        let response = client
            .post(format!("/api/v1/mission/{}/students", mission.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": [a] }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("invalid problem json");
        assert_eq!(body["existingStudentIds"], json!([a.to_string()]));

        let mission = db.require_mission(mission.id.into()).await.unwrap();
        assert_eq!(mission.total_students, 2, "summary must be unchanged");
    }

    #[rocket::async_test]
    async fn enrolling_without_membership_is_a_precondition_failure() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let a = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let mission = seed_mission(db, &[a]).await;

        let response = client
            .post(format!("/api/v1/mission/{}/students", mission.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": [a, outsider] }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("invalid problem json");
        assert_eq!(body["missingStudentIds"], json!([outsider.to_string()]));

        // all-or-nothing: the valid student must not be enrolled either
        let mission = db.require_mission(mission.id.into()).await.unwrap();
        assert_eq!(mission.total_students, 0);
    }

    #[rocket::async_test]
    async fn status_update_hits_the_enrollment() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let a = Uuid::new_v4();
        let mission = seed_mission(db, &[a]).await;
        db.enroll_students(mission.id.into(), &[a]).await.unwrap();

        let response = client
            .put(format!("/api/v1/mission/{}/student?student={}", mission.id, a))
            .header(ContentType::JSON)
            .body(json!({ "status": "on-hold" }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["student"]["status"], json!("on-hold"));
    }

    #[rocket::async_test]
    async fn status_update_rejects_unknown_values_and_students() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let a = Uuid::new_v4();
        let mission = seed_mission(db, &[a]).await;
        db.enroll_students(mission.id.into(), &[a]).await.unwrap();

        let response = client
            .put(format!("/api/v1/mission/{}/student?student={}", mission.id, a))
            .header(ContentType::JSON)
            .body(json!({ "status": "vanished" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .put(format!(
                "/api/v1/mission/{}/student?student={}",
                mission.id,
                Uuid::new_v4()
            ))
            .header(ContentType::JSON)
            .body(json!({ "status": "active" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn remove_decrements_the_summary() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mission = seed_mission(db, &[a, b]).await;
        db.enroll_students(mission.id.into(), &[a, b]).await.unwrap();

        let response = client
            .delete(format!("/api/v1/mission/{}/student?student={}", mission.id, a))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let mission_after = db.require_mission(mission.id.into()).await.unwrap();
        assert_eq!(mission_after.total_students, 1);
        assert!(!mission_after.student_ids.contains(&filter::uuid(a)));

        let response = client
            .delete(format!("/api/v1/mission/{}/student?student={}", mission.id, a))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound, "already removed");
    }

    #[rocket::async_test]
    async fn listing_merges_batch_only_rows() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let (enrolled, batch_only) = (Uuid::new_v4(), Uuid::new_v4());
        let mission = seed_mission(db, &[enrolled, batch_only]).await;
        db.enroll_students(mission.id.into(), &[enrolled])
            .await
            .unwrap();

        let response = client
            .get(format!(
                "/api/v1/mission/{}/students?include_batch_students=true&debug=true",
                mission.id
            ))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        let students = body["students"].as_array().unwrap();
        assert_eq!(students.len(), 2);

        let kinds: Vec<&str> = students
            .iter()
            .map(|row| row["kind"].as_str().unwrap())
            .collect();
        assert!(kinds.contains(&"enrolled"));
        assert!(kinds.contains(&"batch-only"));

        assert_eq!(body["debug"]["enrolledCount"], json!(1));
        assert_eq!(body["debug"]["approvedCount"], json!(2));
        assert_eq!(body["debug"]["countsMatch"], json!(false));
    }

    #[rocket::async_test]
    async fn reconcile_clear_empties_the_roster() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mission = seed_mission(db, &[a, b]).await;
        db.enroll_students(mission.id.into(), &[a, b]).await.unwrap();

        let response = client
            .post(format!("/api/v1/mission/{}/reconcile", mission.id))
            .header(ContentType::JSON)
            .body(json!({ "action": "clear" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["removedCount"], json!(2));

        let mission = db.require_mission(mission.id.into()).await.unwrap();
        assert_eq!(mission.total_students, 0);
        assert!(mission.student_ids.is_empty());

        let remaining = db
            .collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME)
            .count_documents(filter::by_mission(mission.id.into()), None)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[rocket::async_test]
    async fn reconcile_fix_drops_students_without_membership() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let (kept, dropped) = (Uuid::new_v4(), Uuid::new_v4());
        let mission = seed_mission(db, &[kept, dropped]).await;
        db.enroll_students(mission.id.into(), &[kept, dropped])
            .await
            .unwrap();

        // revoke membership behind the roster's back
        db.collection::<BatchMembership>(BATCH_MEMBER_COLLECTION_NAME)
            .delete_many(
                doc! { "batch": mission.batch, "student": filter::uuid(dropped) },
                None,
            )
            .await
            .unwrap();

        let response = client
            .post(format!("/api/v1/mission/{}/reconcile", mission.id))
            .header(ContentType::JSON)
            .body(json!({ "action": "fix" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["removedCount"], json!(1));

        let mission = db.require_mission(mission.id.into()).await.unwrap();
        assert_eq!(mission.total_students, 1);
        assert_eq!(mission.student_ids, vec![filter::uuid(kept)]);
    }

    #[rocket::async_test]
    async fn reconcile_sync_is_a_deprecated_no_op() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let a = Uuid::new_v4();
        let mission = seed_mission(db, &[a]).await;
        db.enroll_students(mission.id.into(), &[a]).await.unwrap();

        let response = client
            .post(format!("/api/v1/mission/{}/reconcile", mission.id))
            .header(ContentType::JSON)
            .body(json!({ "action": "sync" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["removedCount"], json!(0));
        assert!(body["deprecated"].is_string());

        let mission = db.require_mission(mission.id.into()).await.unwrap();
        assert_eq!(mission.total_students, 1, "sync must not touch the roster");
    }

    #[rocket::async_test]
    async fn stats_for_missing_mission_are_not_found() {
        let client = test_client().await;

        let response = client
            .get(format!("/api/v1/mission/{}/stats", Uuid::new_v4()))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn reconcile_rejects_unknown_actions() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let mission = seed_mission(db, &[]).await;

        let response = client
            .post(format!("/api/v1/mission/{}/reconcile", mission.id))
            .header(ContentType::JSON)
            .body(json!({ "action": "rebuild" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }
}
