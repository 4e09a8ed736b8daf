//! Duet chat server library.
//! Modules are public for integration tests; the binary entry point is main.rs.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod profile;
pub mod routes;
pub mod state;
pub mod ws;
