pub mod assessments;
pub mod attendance;
pub mod catalog;
pub mod core;
pub mod holidays;
pub mod obe;
pub mod project_groups;
pub mod sessions;
pub mod setup;
pub mod students;
