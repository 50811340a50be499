//! Sea-ORM entities for the jobs and audit log tables.
//!
//! `job_type`, `priority` and `status` are stored as plain strings so new
//! job families can ship without a migration; conversion to the domain enums
//! happens at the repository boundary.

pub mod job {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "jobs")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub job_type: String,
        pub priority: String,
        pub status: String,
        #[sea_orm(column_type = "JsonBinary")]
        pub payload: Json,
        /// Projected from the payload for user listings.
        pub user_id: String,
        pub retry_count: i32,
        pub max_retries: i32,
        #[sea_orm(column_type = "JsonBinary", nullable)]
        pub result: Option<Json>,
        #[sea_orm(column_type = "Text", nullable)]
        pub error: Option<String>,
        pub created_at: DateTimeWithTimeZone,
        pub scheduled_at: Option<DateTimeWithTimeZone>,
        pub started_at: Option<DateTimeWithTimeZone>,
        pub completed_at: Option<DateTimeWithTimeZone>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod audit {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "audit_log")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub user_id: String,
        pub action: String,
        pub item_id: Option<String>,
        #[sea_orm(column_type = "JsonBinary")]
        pub job_ids: Json,
        #[sea_orm(column_type = "JsonBinary")]
        pub data: Json,
        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
