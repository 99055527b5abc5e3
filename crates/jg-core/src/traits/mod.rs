//! Collaborator traits

mod scheduler;

pub use scheduler::Scheduler;
