pub mod attendance;
pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod marks;
pub mod reports;
pub mod rules;
pub mod salary;
pub mod teachers;
