pub mod correlation;
pub mod metrics;
