//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` (or a transaction connection) as the first argument.

pub mod connection_repo;
pub mod job_repo;

pub use connection_repo::ConnectionRepo;
pub use job_repo::JobRepo;
