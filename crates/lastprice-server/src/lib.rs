pub mod app;
pub mod catalog;
pub mod error;
pub mod providers;
pub mod routes;
pub mod state;
