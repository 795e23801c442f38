//! Capacity & availability math and the dashboard read path.
//!
//! Everything here is read-only; the enrollment and assignment code consults
//! these functions but mutations happen elsewhere.

use mongodb::Database;
use rocket::futures::StreamExt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::filter;
use crate::data::mentorship::{
    MentorStatus, MentorshipGroup, MissionMentor, GROUP_COLLECTION_NAME,
    MISSION_MENTOR_COLLECTION_NAME,
};
use crate::data::mission::{EnrollmentStatus, MissionStudent, MISSION_STUDENT_COLLECTION_NAME};
use crate::resp::problem::Problem;

/// Mentors at or above this share of a finite capacity are classified
/// overloaded.
pub const OVERLOAD_THRESHOLD: f32 = 0.9;

/// Workload as a share of capacity; `None` when capacity is unlimited.
pub fn utilization(workload: u32, max_students: u32) -> Option<f32> {
    if max_students == 0 {
        None
    } else {
        Some(workload as f32 / max_students as f32)
    }
}

pub fn classify_mentor(workload: u32, max_students: u32) -> MentorStatus {
    match utilization(workload, max_students) {
        Some(rate) if rate >= OVERLOAD_THRESHOLD => MentorStatus::Overloaded,
        _ => MentorStatus::Active,
    }
}

/// Group fill percentage. Unlimited groups are always 0% and never trigger
/// overflow warnings.
pub fn group_capacity_pct(members: usize, max_students: u32) -> f32 {
    if max_students == 0 {
        0.0
    } else {
        (members as f32 / max_students as f32) * 100.0
    }
}

/// Seats left before a finite capacity is reached; `None` when unlimited.
pub fn remaining_seats(members: usize, max_students: u32) -> Option<u32> {
    if max_students == 0 {
        None
    } else {
        Some((max_students as usize).saturating_sub(members) as u32)
    }
}

pub fn is_full(members: usize, max_students: u32) -> bool {
    max_students != 0 && members >= max_students as usize
}

/// Mission-wide aggregate counts used by dashboards.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MissionStats {
    pub total_students: u64,
    pub active: u64,
    pub deactive: u64,
    pub irregular: u64,
    pub completed: u64,
    pub dropped: u64,
    pub on_hold: u64,

    pub mentor_count: u64,
    pub overloaded_mentors: u64,
    pub group_count: u64,
    pub full_groups: u64,
}

pub trait ResolverDbExt {
    async fn mission_stats(&self, mission_id: Uuid) -> Result<MissionStats, Problem>;
}

impl ResolverDbExt for Database {
    async fn mission_stats(&self, mission_id: Uuid) -> Result<MissionStats, Problem> {
        use crate::data::mission::db::RosterDbExt;
        self.require_mission(mission_id).await?;

        let mut stats = MissionStats::default();

        let mut enrollments = self
            .collection::<MissionStudent>(MISSION_STUDENT_COLLECTION_NAME)
            .find(filter::by_mission(mission_id), None)
            .await
            .map_err(Problem::from)?;

        while let Some(enrollment) = enrollments.next().await {
            let enrollment = match enrollment {
                Ok(it) => it,
                Err(_) => continue,
            };

            stats.total_students += 1;
            match enrollment.status {
                EnrollmentStatus::Active => stats.active += 1,
                EnrollmentStatus::Deactive => stats.deactive += 1,
                EnrollmentStatus::Irregular => stats.irregular += 1,
                EnrollmentStatus::Completed => stats.completed += 1,
                EnrollmentStatus::Dropped => stats.dropped += 1,
                EnrollmentStatus::OnHold => stats.on_hold += 1,
            }
        }

        let mut mentors = self
            .collection::<MissionMentor>(MISSION_MENTOR_COLLECTION_NAME)
            .find(filter::by_mission(mission_id), None)
            .await
            .map_err(Problem::from)?;

        while let Some(link) = mentors.next().await {
            if let Ok(link) = link {
                stats.mentor_count += 1;
                if classify_mentor(link.current_workload, link.max_students)
                    == MentorStatus::Overloaded
                {
                    stats.overloaded_mentors += 1;
                }
            }
        }

        let mut groups = self
            .collection::<MentorshipGroup>(GROUP_COLLECTION_NAME)
            .find(filter::by_mission(mission_id), None)
            .await
            .map_err(Problem::from)?;

        while let Some(group) = groups.next().await {
            if let Ok(group) = group {
                stats.group_count += 1;
                if is_full(group.students.len(), group.max_students) {
                    stats.full_groups += 1;
                }
            }
        }

        Ok(stats)
    }
}

///////////////////////
//       TESTS
///////////////////////
