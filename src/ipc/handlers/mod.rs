pub mod analytics;
pub mod attendance;
pub mod backup;
pub mod core;
pub mod import;
pub mod reports;
pub mod setup;
pub mod students;
