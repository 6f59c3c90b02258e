//! Domain model structs and DTOs.
//!
//! Each submodule contains the `FromRow` struct matching the database row
//! plus the DTOs used to write it.

pub mod connection;
pub mod job;
