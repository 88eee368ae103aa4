pub mod app;
pub mod auth;
pub mod config;
pub mod credits;
pub mod error;
pub mod state;
pub mod store;
