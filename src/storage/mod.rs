//! Durable report state

pub mod database;

pub use database::{Database, PoolConfig, SharedDatabase};
