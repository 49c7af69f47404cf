//! Entity store trait and implementations.

pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use memory::MemoryEntityStore;
pub use postgres::PgEntityStore;
pub use query::{all_projects, build_deploys, project_builds, project_builds_paged, project_deploys};
pub use store::{BuildFilter, Cursor, DeployFilter, EntityStore, Timestamped};
