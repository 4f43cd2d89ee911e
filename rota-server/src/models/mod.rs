pub mod backup;
pub mod helper;
