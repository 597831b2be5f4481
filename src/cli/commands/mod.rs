pub mod auth;
pub mod collections;
pub mod module;
pub mod row;
pub mod server;
