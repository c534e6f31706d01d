//! External processes: subprocess runner and disk usage measurement.

pub mod command;
pub mod disk_usage;
