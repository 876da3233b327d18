//! This is not a real library!  It should be used from within the ts3metrics workspace only.

pub mod metrics;
pub mod query;
pub mod xml;
