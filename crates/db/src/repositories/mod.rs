//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or any Postgres executor) as the first argument.

pub mod dispatch_job_repo;
pub mod environment_repo;
pub mod run_request_repo;
pub mod test_file_repo;

pub use dispatch_job_repo::DispatchJobRepo;
pub use environment_repo::EnvironmentRepo;
pub use run_request_repo::RunRequestRepo;
pub use test_file_repo::TestFileRepo;
