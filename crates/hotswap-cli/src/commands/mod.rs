//! Command implementations

pub mod backups;
pub mod invoke;
pub mod run;
