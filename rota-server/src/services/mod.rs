pub mod backup_scheduler;
pub mod catalog;
pub mod helpers;
pub mod restore;
pub mod snapshot;
