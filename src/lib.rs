pub mod app;
pub mod auth;
pub mod cli;
pub mod collections;
pub mod config;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod middleware;
pub mod navigation;
pub mod schema;
pub mod store;
pub mod types;
