pub mod adapter;
pub mod assign;
pub mod billing;
pub mod config;
pub mod error;
pub mod experiment;
pub mod memory;
pub mod properties;
pub mod tenant;
pub mod usage;
pub mod vault;

pub use error::{CoreError, CoreResult};
