pub mod cache;
pub mod cli;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod logging;
pub mod masking;
pub mod output;
pub mod params;
pub mod query;
pub mod server;
pub mod serving;
pub mod snapshot;
pub mod sync;
