pub mod config;
pub mod partition_consumer;
