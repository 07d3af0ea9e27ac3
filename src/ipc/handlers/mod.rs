pub mod attendance;
pub mod backup_exchange;
pub mod clients;
pub mod core;
pub mod courses;
pub mod grades;
pub mod import;
pub mod reports;
pub mod terms;
pub mod users;
