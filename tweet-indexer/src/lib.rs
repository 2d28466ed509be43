pub mod config;
pub mod enrichment;
pub mod error;
pub mod measuring_channel;
pub mod metrics_consts;
pub mod monitor;
pub mod pipeline;
pub mod reader;
pub mod run_group;
pub mod server;
pub mod sink;
pub mod source;
pub mod test_utils;
pub mod types;
pub mod writer;
