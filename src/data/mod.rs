pub mod attendance;
pub mod batch;
pub mod capacity;
pub mod mentorship;
pub mod mission;

/// Filter documents shared by the collection extension traits.
///
/// All identifiers are stored as BSON binary UUIDs (subtype 4), so filters
/// must go through [`bson::Uuid`] instead of string comparison.
pub mod filter {
    use bson::{doc, Document};
    use uuid::Uuid;

    #[inline]
    pub fn uuid(id: Uuid) -> bson::Uuid {
        bson::Uuid::from_uuid_1(id)
    }

    #[inline]
    pub fn by_id(id: Uuid) -> Document {
        doc! { "_id": uuid(id) }
    }

    #[inline]
    pub fn by_mission(mission: Uuid) -> Document {
        doc! { "mission": uuid(mission) }
    }

    #[inline]
    pub fn by_mission_student(mission: Uuid, student: Uuid) -> Document {
        doc! { "mission": uuid(mission), "student": uuid(student) }
    }
}
