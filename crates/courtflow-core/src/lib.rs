pub mod checksum;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod import;
pub mod model;
pub mod processor;
pub mod queue;
pub mod store;
pub mod uploads;
pub mod worker;

pub use error::{ConstraintKind, ImportError, PersistenceError, QueueError};
pub use import::ImportService;
pub use processor::ImportProcessor;
