pub mod backend;
pub mod experiment;
pub mod schema;
pub mod tenant;
pub mod usage;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `lastprice_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
