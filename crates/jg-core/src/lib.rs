//! jg-core: Core abstractions and configuration for the job access gateway
//!
//! This crate provides the shared domain types, the scheduler collaborator
//! trait, the atomic JSON record store and the configuration structures used
//! by the proxy and shell halves of the gateway.

pub mod config;
pub mod error;
pub mod store;
pub mod traits;
pub mod types;

pub use error::{ConfigError, SchedulerError, StoreError};
pub use store::{JsonStore, Record};
pub use traits::Scheduler;
pub use types::{ExecRequest, ExecStream, JobId, JobStatus, ProxyKey, ProxyMeta, SubmitJobInfo};
