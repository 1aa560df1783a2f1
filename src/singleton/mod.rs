//! Singleton Module
//!
//! Elects one provider of a named service as primary, keeps the service
//! running there only, and serves its value to readers on any member.

mod builder;
mod command;
mod coordinator;
mod query;
mod quorum;
mod service;
mod stamp;

pub use builder::SingletonBuilder;
pub use command::{CommandResponse, Round, SingletonCommand, Transition, ValueReply};
pub use coordinator::{ElectionRecord, Role, SingletonCoordinator, SingletonStatus};
pub use query::QueryConfig;
pub use quorum::Quorum;
pub use service::SingletonService;
pub use stamp::{PrimaryStamp, StampService};
