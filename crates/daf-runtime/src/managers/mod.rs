//! Lifecycle Managers
//!
//! `TaskManager` runs and stops individual task instances on this node;
//! `ApplicationManager` starts and stops whole applications (queues plus
//! tasks) and keeps the registry of what is running.

mod application;
mod task;

pub use application::ApplicationManager;
pub use task::TaskManager;
