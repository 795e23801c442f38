use std::collections::BTreeMap;

use rocket::{Build, Rocket, Route};

pub mod assignment;
pub mod attendance;
pub mod roster;

use assignment::*;
use attendance::*;
use roster::*;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    data::{
        attendance as ad,
        batch::{AddMembersData, BatchMembership, MembershipStatus},
        capacity::MissionStats,
        mentorship as md,
        mission as msd,
    },
    resp::problem::Problem,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        mission_create,
        mission_students,
        mission_enroll,
        mission_student_status,
        mission_student_progress,
        mission_student_remove,
        mission_reconcile,
        mission_stats,
        batch_members_add,
        mentor_create,
        mentor_assign,
        group_create,
        group_detail,
        group_assign,
        group_remove,
        available_mentors,
        available_students,
        attendance_mark,
        attendance_bulk_mark,
        attendance_form_create,
        attendance_form_activate,
        attendance_form_active
    ),
    components(schemas(
        msd::Mission,
        msd::MissionStatus,
        msd::MissionStudent,
        msd::EnrollmentStatus,
        msd::RosterEntry,
        msd::RosterListing,
        msd::RosterDebugReport,
        msd::db::MissionCreateData,
        msd::db::ReconcileOutcome,
        BatchMembership,
        MembershipStatus,
        AddMembersData,
        MissionStats,
        md::MissionMentor,
        md::MentorshipGroup,
        md::GroupMentor,
        md::MentorRole,
        md::MentorStatus,
        md::GroupType,
        md::GroupStatus,
        md::db::MentorCreateData,
        md::db::GroupCreateData,
        md::db::AssignmentOutcome,
        md::db::AssignmentFailure,
        ad::AttendanceForm,
        ad::AttendanceQuestion,
        ad::QuestionKind,
        ad::AttendanceStatus,
        ad::AttendanceLog,
        ad::db::FormCreateData,
        ad::db::BulkMarkOutcome,
        ad::db::BulkMarkFailure,
        EnrollData,
        EnrollResponse,
        StatusUpdateData,
        ProgressUpdateData,
        StudentResponse,
        ReconcileData,
        MessageResponse,
        MentorAssignData,
        GroupAssignData,
        GroupDetail,
        MarkData,
        BulkMarkData,
        Problem
    )),
    modifiers(&V1_PREFIX)
)]
pub struct ApiDocV1;

pub struct PathPrefix(pub &'static str);
static V1_PREFIX: PathPrefix = PathPrefix("/api/v1");

impl utoipa::Modify for PathPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut new_paths = BTreeMap::new();

        for (path, item) in std::mem::take(&mut openapi.paths.paths) {
            new_paths.insert(self.0.to_string() + path.as_ref(), item);
        }

        openapi.paths.paths = new_paths;
    }
}

pub fn api_v1() -> Vec<Route> {
    routes![
        mission_create,
        mission_students,
        mission_enroll,
        mission_student_status,
        mission_student_progress,
        mission_student_remove,
        mission_reconcile,
        mission_stats,
        batch_members_add,
        mentor_create,
        mentor_assign,
        group_create,
        group_detail,
        group_assign,
        group_remove,
        available_mentors,
        available_students,
        attendance_mark,
        attendance_bulk_mark,
        attendance_form_create,
        attendance_form_activate,
        attendance_form_active
    ]
}

pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/api/v1", api_v1()).mount(
        "/",
        SwaggerUi::new("/swagger/<_..>").url("/api/v1/openapi.json", ApiDocV1::openapi()),
    )
}
