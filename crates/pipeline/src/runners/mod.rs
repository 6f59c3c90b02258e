//! [`TaskRunner`](crate::task::TaskRunner) implementations.
//!
//! - [`command::CommandTaskRunner`] runs each stage as an external process.
//! - [`scripted::ScriptedTaskRunner`] plays back scripted outcomes in
//!   process, for tests and local runs without model workers.

pub mod command;
pub mod scripted;

pub use command::{CommandTaskRunner, StageCommand};
pub use scripted::{Script, ScriptedTaskRunner};
