// Library for the binaries and integration tests

pub mod aggregator;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod reporter;
pub mod routes;
pub mod sysinfo_source;
pub mod transport;
pub mod version;
pub mod worker;
