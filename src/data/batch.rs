use std::collections::HashSet;

use bson::doc;
use chrono::{DateTime, Utc};
use mongodb::Database;
use rocket::futures::StreamExt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::filter;
use crate::resp::problem::Problem;

pub static BATCH_MEMBER_COLLECTION_NAME: &str = "batch.members";

/// Only `Approved` memberships satisfy the mission enrollment prerequisite.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchMembership {
    #[serde(rename = "_id", default = "bson::Uuid::new")]
    #[schema(value_type = String)]
    pub id: bson::Uuid,
    #[schema(value_type = String)]
    pub batch: bson::Uuid,
    #[schema(value_type = String)]
    pub student: bson::Uuid,
    pub status: MembershipStatus,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddMembersData {
    #[schema(value_type = Vec<String>)]
    pub student_ids: Vec<Uuid>,
    #[serde(default)]
    pub status: Option<MembershipStatus>,
}

pub trait BatchMembershipDbExt {
    async fn add_batch_members(
        &self,
        batch: Uuid,
        data: AddMembersData,
    ) -> Result<Vec<BatchMembership>, Problem>;

    /// Ids of every student with an approved membership in `batch`.
    async fn approved_member_ids(&self, batch: Uuid) -> Result<HashSet<bson::Uuid>, Problem>;
}

impl BatchMembershipDbExt for Database {
    async fn add_batch_members(
        &self,
        batch: Uuid,
        data: AddMembersData,
    ) -> Result<Vec<BatchMembership>, Problem> {
        let status = data.status.unwrap_or(MembershipStatus::Approved);
        let now = Utc::now();

        let members: Vec<BatchMembership> = data
            .student_ids
            .into_iter()
            .map(|student| BatchMembership {
                id: bson::Uuid::new(),
                batch: filter::uuid(batch),
                student: filter::uuid(student),
                status,
                approved_at: match status {
                    MembershipStatus::Approved => Some(now),
                    _ => None,
                },
            })
            .collect();

        if !members.is_empty() {
            self.collection::<BatchMembership>(BATCH_MEMBER_COLLECTION_NAME)
                .insert_many(&members, None)
                .await
                .map_err(Problem::from)?;
        }

        Ok(members)
    }

    async fn approved_member_ids(&self, batch: Uuid) -> Result<HashSet<bson::Uuid>, Problem> {
        let mut cursor = self
            .collection::<BatchMembership>(BATCH_MEMBER_COLLECTION_NAME)
            .find(
                doc! { "batch": filter::uuid(batch), "status": "approved" },
                None,
            )
            .await
            .map_err(Problem::from)?;

        let mut ids = HashSet::new();
        while let Some(member) = cursor.next().await {
            match member {
                Ok(member) => {
                    ids.insert(member.student);
                }
                Err(_) => {
                    tracing::warn!("Unable to deserialize BatchMembership document.")
                }
            }
        }

        Ok(ids)
    }
}
