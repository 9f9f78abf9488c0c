pub mod analytics;
pub mod attendance;
pub mod backup;
pub mod calendar;
pub mod core;
pub mod finance;
pub mod grades;
pub mod notes;
pub mod reports;
pub mod settings;
pub mod snapshot;
pub mod students;
pub mod subjects;
