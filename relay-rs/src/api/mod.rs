//! REST API module for relay-rs
//!
//! Provides HTTP endpoints over the relay components

pub mod handlers;
pub mod installation;
pub mod server;

pub use handlers::AppState;
pub use server::{router, ApiServer};
