use mongodb::Database;
use rocket::response::status::Created;
use rocket::serde::json::Json;
use rocket::State;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::capacity;
use crate::data::mentorship::db::problem as mentorship_problem;
use crate::data::mentorship::db::{
    AssignmentDbExt, AssignmentOutcome, GroupCreateData, MentorCreateData,
};
use crate::data::mentorship::{MentorshipGroup, MissionMentor};
use crate::data::mission::MissionStudent;
use crate::resp::problem::Problem;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MentorAssignData {
    #[schema(value_type = Vec<String>)]
    pub student_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_primary_mentor: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupAssignData {
    #[schema(value_type = Vec<String>)]
    pub student_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetail {
    pub group: MentorshipGroup,
    /// Fill percentage; 0.0 for unlimited groups.
    pub capacity_pct: f32,
    /// Absent when the group is unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seats: Option<u32>,
}

/// Create a mentor's participation in a mission
#[utoipa::path(request_body = MentorCreateData)]
#[post("/mentor", format = "application/json", data = "<mentor>")]
#[tracing::instrument(skip(db))]
pub async fn mentor_create(
    mentor: Json<MentorCreateData>,
    db: &State<Database>,
) -> Result<Created<Json<MissionMentor>>, Problem> {
    let link = db.create_mission_mentor(mentor.into_inner()).await?;

    Ok(Created::new(format!("/api/v1/mentor/{}", link.id)).body(Json(link)))
}

/// Assign students to a mentor
///
/// Capacity violations and duplicates are reported per student so the
/// caller can retry with the valid subset.
#[utoipa::path(
    request_body = MentorAssignData,
    responses(
        (status = 200, description = "Per-student assignment report", body = AssignmentOutcome),
        (status = 404, description = "Mentor doesn't exist", body = Problem),
    )
)]
#[post("/mentor/<id>/students", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn mentor_assign(
    id: Uuid,
    data: Json<MentorAssignData>,
    db: &State<Database>,
) -> Result<Json<AssignmentOutcome>, Problem> {
    let outcome = db
        .assign_to_mentor(id, &data.student_ids, data.is_primary_mentor)
        .await?;

    Ok(Json(outcome))
}

/// Create a mentorship group
#[utoipa::path(request_body = GroupCreateData)]
#[post("/group", format = "application/json", data = "<group>")]
#[tracing::instrument(skip(db))]
pub async fn group_create(
    group: Json<GroupCreateData>,
    db: &State<Database>,
) -> Result<Created<Json<MentorshipGroup>>, Problem> {
    let group = db.create_group(group.into_inner()).await?;

    Ok(Created::new(format!("/api/v1/group/{}", group.id)).body(Json(group)))
}

/// Get a mentorship group with its capacity usage
#[utoipa::path(
    responses(
        (status = 200, description = "The group and its fill level", body = GroupDetail),
        (status = 404, description = "Group doesn't exist", body = Problem),
    )
)]
#[get("/group/<id>")]
#[tracing::instrument(skip(db))]
pub async fn group_detail(id: Uuid, db: &State<Database>) -> Result<Json<GroupDetail>, Problem> {
    let group = db
        .group(id)
        .await?
        .ok_or_else(|| mentorship_problem::group_not_found(id))?;

    let capacity_pct = capacity::group_capacity_pct(group.students.len(), group.max_students);
    let remaining_seats = capacity::remaining_seats(group.students.len(), group.max_students);

    Ok(Json(GroupDetail {
        group,
        capacity_pct,
        remaining_seats,
    }))
}

/// Assign students to a mentorship group
///
/// The whole call is rejected when the combined size would overflow the
/// group; membership in another group of the same mission fails only the
/// affected students.
#[utoipa::path(
    request_body = GroupAssignData,
    responses(
        (status = 200, description = "Per-student assignment report", body = AssignmentOutcome),
        (status = 400, description = "Capacity exceeded", body = Problem),
        (status = 404, description = "Group doesn't exist", body = Problem),
    )
)]
#[post("/group/<id>/students", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn group_assign(
    id: Uuid,
    data: Json<GroupAssignData>,
    db: &State<Database>,
) -> Result<Json<AssignmentOutcome>, Problem> {
    Ok(Json(db.assign_to_group(id, &data.student_ids).await?))
}

/// Remove students from a mentorship group
#[utoipa::path(request_body = GroupAssignData)]
#[delete("/group/<id>/students", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn group_remove(
    id: Uuid,
    data: Json<GroupAssignData>,
    db: &State<Database>,
) -> Result<Json<MentorshipGroup>, Problem> {
    Ok(Json(db.remove_from_group(id, &data.student_ids).await?))
}

/// Mentors not yet linked to any group of the mission
#[utoipa::path(
    responses(
        (status = 200, description = "Unassigned mentors", body = Vec<MissionMentor>),
    )
)]
#[get("/mission/<id>/available-mentors")]
#[tracing::instrument(skip(db))]
pub async fn available_mentors(
    id: Uuid,
    db: &State<Database>,
) -> Result<Json<Vec<MissionMentor>>, Problem> {
    Ok(Json(db.available_mentors(id).await?))
}

/// Enrolled students not yet linked to any group of the mission
#[utoipa::path(
    responses(
        (status = 200, description = "Unassigned students", body = Vec<MissionStudent>),
    )
)]
#[get("/mission/<id>/available-students")]
#[tracing::instrument(skip(db))]
pub async fn available_students(
    id: Uuid,
    db: &State<Database>,
) -> Result<Json<Vec<MissionStudent>>, Problem> {
    Ok(Json(db.available_students(id).await?))
}

///////////////////////
//       TESTS
///////////////////////

#[cfg(test)]
mod assignment_endpoints {
    use mongodb::Database;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{json, Value};
    use uuid::Uuid;

    use crate::data::batch::{AddMembersData, BatchMembershipDbExt};
    use crate::data::mentorship::db::{
        AssignmentDbExt, GroupCreateData, MentorCreateData,
    };
    use crate::data::mentorship::{GroupType, MentorRole};
    use crate::data::mission::db::{MissionCreateData, RosterDbExt};
    use crate::data::mission::Mission;

    async fn test_client() -> Client {
        Client::tracked(crate::create(None).await.expect("invalid backend"))
            .await
            .expect("invalid rocket instance")
    }

    async fn seed_enrolled_mission(db: &Database, students: &[Uuid]) -> Mission {
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

        let mission = db
            .create_mission(MissionCreateData {
                code: "M-ASSIGN".to_string(),
                title: "Assignment mission".to_string(),
                batch,
                max_students: 0,
            })
            .await
            .expect("unable to seed mission");

        if !students.is_empty() {
            db.enroll_students(mission.id.into(), students)
                .await
                .expect("unable to seed enrollments");
        }

        mission
    }

    fn mentor_data(mission: &Mission, max_students: u32) -> MentorCreateData {
        MentorCreateData {
            mission: mission.id.into(),
            mentor: Uuid::new_v4(),
            role: MentorRole::Primary,
            max_students,
        }
    }

    fn group_data(mission: &Mission, name: &str, max_students: u32) -> GroupCreateData {
        GroupCreateData {
            mission: mission.id.into(),
            name: name.to_string(),
            description: String::new(),
            group_type: GroupType::Mentorship,
            mentors: vec![],
            max_students,
        }
    }

    #[rocket::async_test]
    async fn mentor_at_capacity_rejects_per_student() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let students: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mission = seed_enrolled_mission(db, &students).await;

        let link = db
            .create_mission_mentor(mentor_data(&mission, 2))
            .await
            .unwrap();
        db.assign_to_mentor(link.id.into(), &students[..2], false)
            .await
            .unwrap();

        let response = client
            .post(format!("/api/v1/mentor/{}/students", link.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": [students[2]] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["assignedCount"], json!(0));
        assert_eq!(body["failed"][0]["student"], json!(students[2].to_string()));
        assert_eq!(body["failed"][0]["reason"], json!("at-capacity"));

        let link = db.mission_mentor(link.id.into()).await.unwrap().unwrap();
        assert_eq!(link.current_workload, 2, "workload must be unchanged");
    }

    #[rocket::async_test]
    async fn assigning_twice_to_the_same_mentor_fails_per_student() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let students: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let mission = seed_enrolled_mission(db, &students).await;

        let link = db
            .create_mission_mentor(mentor_data(&mission, 0))
            .await
            .unwrap();
        db.assign_to_mentor(link.id.into(), &students[..1], false)
            .await
            .unwrap();

        let response = client
            .post(format!("/api/v1/mentor/{}/students", link.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": &students }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["assignedCount"], json!(1));
        assert_eq!(body["assigned"], json!([students[1].to_string()]));
        assert_eq!(body["failed"][0]["reason"], json!("already-assigned"));
    }

    #[rocket::async_test]
    async fn primary_mentor_is_superseded() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let student = Uuid::new_v4();
        let mission = seed_enrolled_mission(db, &[student]).await;

        let first = db
            .create_mission_mentor(mentor_data(&mission, 0))
            .await
            .unwrap();
        let second = db
            .create_mission_mentor(mentor_data(&mission, 0))
            .await
            .unwrap();

        db.assign_to_mentor(first.id.into(), &[student], true)
            .await
            .unwrap();

        let response = client
            .post(format!("/api/v1/mentor/{}/students", second.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": [student], "isPrimaryMentor": true }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let first = db.mission_mentor(first.id.into()).await.unwrap().unwrap();
        let second = db.mission_mentor(second.id.into()).await.unwrap().unwrap();

        assert!(
            first.primary_students.is_empty(),
            "previous primary link must be superseded"
        );
        assert_eq!(second.primary_students.len(), 1);
    }

    #[rocket::async_test]
    async fn group_overflow_rejects_the_whole_call() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let students: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mission = seed_enrolled_mission(db, &students).await;

        let group = db
            .create_group(group_data(&mission, "alpha", 2))
            .await
            .unwrap();
        db.assign_to_group(group.id.into(), &students[..1])
            .await
            .unwrap();

        let response = client
            .post(format!("/api/v1/group/{}/students", group.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": [students[1], students[2]] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("invalid problem json");
        assert_eq!(body["remainingSeats"], json!(1));

        let group = db.group(group.id.into()).await.unwrap().unwrap();
        assert_eq!(group.students.len(), 1, "no partial assignment on overflow");
    }

    #[rocket::async_test]
    async fn second_group_membership_is_rejected() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let student = Uuid::new_v4();
        let mission = seed_enrolled_mission(db, &[student]).await;

        // unlimited group already holding the student
        let first = db
            .create_group(group_data(&mission, "g1", 0))
            .await
            .unwrap();
        db.assign_to_group(first.id.into(), &[student]).await.unwrap();

        let second = db
            .create_group(group_data(&mission, "g2", 0))
            .await
            .unwrap();

        let response = client
            .post(format!("/api/v1/group/{}/students", second.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": [student] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["assignedCount"], json!(0));
        assert_eq!(body["failed"][0]["reason"], json!("already-in-group"));
        assert_eq!(body["failed"][0]["group"], json!(first.id.to_string()));

        let second = db.group(second.id.into()).await.unwrap().unwrap();
        assert!(second.students.is_empty());
    }

    #[rocket::async_test]
    async fn repeated_ids_in_one_group_call_consume_one_seat() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let student = Uuid::new_v4();
        let mission = seed_enrolled_mission(db, &[student]).await;

        let group = db
            .create_group(group_data(&mission, "dup", 2))
            .await
            .unwrap();

        let response = client
            .post(format!("/api/v1/group/{}/students", group.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": [student, student] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["assignedCount"], json!(1));

        let group = db.group(group.id.into()).await.unwrap().unwrap();
        assert_eq!(group.students.len(), 1, "one membership per student");
    }

    #[rocket::async_test]
    async fn group_detail_reports_fill_level() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let student = Uuid::new_v4();
        let mission = seed_enrolled_mission(db, &[student]).await;

        let group = db
            .create_group(group_data(&mission, "epsilon", 4))
            .await
            .unwrap();
        db.assign_to_group(group.id.into(), &[student]).await.unwrap();

        let response = client
            .get(format!("/api/v1/group/{}", group.id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        assert_eq!(body["capacityPct"], json!(25.0));
        assert_eq!(body["remainingSeats"], json!(3));

        let response = client
            .get(format!("/api/v1/group/{}", Uuid::new_v4()))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn group_fills_up_and_reopens() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let students: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let mission = seed_enrolled_mission(db, &students).await;

        let group = db
            .create_group(group_data(&mission, "beta", 2))
            .await
            .unwrap();
        db.assign_to_group(group.id.into(), &students).await.unwrap();

        let group_full = db.group(group.id.into()).await.unwrap().unwrap();
        assert_eq!(group_full.students.len(), 2);
        assert_eq!(
            serde_json::to_value(group_full.status).unwrap(),
            json!("full")
        );

        let response = client
            .delete(format!("/api/v1/group/{}/students", group.id))
            .header(ContentType::JSON)
            .body(json!({ "studentIds": [students[0]] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let group = db.group(group.id.into()).await.unwrap().unwrap();
        assert_eq!(group.students.len(), 1);
        assert_eq!(serde_json::to_value(group.status).unwrap(), json!("active"));
    }

    #[rocket::async_test]
    async fn availability_excludes_grouped_students() {
        let client = test_client().await;
        let db: &Database = client.rocket().state().unwrap();

        let students: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let mission = seed_enrolled_mission(db, &students).await;

        let group = db
            .create_group(group_data(&mission, "gamma", 0))
            .await
            .unwrap();
        db.assign_to_group(group.id.into(), &students[..1])
            .await
            .unwrap();

        let response = client
            .get(format!("/api/v1/mission/{}/available-students", mission.id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("invalid response json");
        let available = body.as_array().unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0]["student"], json!(students[1].to_string()));
    }
}
