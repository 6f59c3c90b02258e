//! Progress and job-state notification infrastructure.
//!
//! - [`EventBus`]: in-process publish/subscribe hub for worker progress,
//!   backed by `tokio::sync::broadcast`.
//! - [`NotificationDispatcher`]: owner-addressed fan-out to live
//!   connections with dead-connection pruning.
//! - [`ConnectionGateway`]: the per-connection delivery seam, with an HTTP
//!   implementation in [`delivery::http`].
//! - [`ProgressRelay`]: background loop forwarding bus notices to the
//!   dispatcher.

pub mod bus;
pub mod delivery;
pub mod dispatcher;
pub mod gateway;
pub mod relay;

pub use bus::{EventBus, ProgressNotice};
pub use delivery::http::HttpConnectionGateway;
pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use gateway::{ConnectionGateway, DeliveryError};
pub use relay::ProgressRelay;
