//! Process-wide helpers.

pub mod clock;
pub mod logger;
