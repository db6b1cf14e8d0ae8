pub mod cache;
pub mod config;
pub mod dedup;
pub mod delivery;
pub mod metrics;
pub mod types;
