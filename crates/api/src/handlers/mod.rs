//! Request handlers.
//!
//! - [`jobs`]: the owner-scoped `/api/v1/jobs` resource.
//! - [`internal`]: orchestration starts and worker progress, called by
//!   trusted collaborators rather than end users.

pub mod internal;
pub mod jobs;
