//! Library crate for betbot-back, exposing modules for the server binary and tests.

/// Configuration file loading and defaults.
pub mod config;
/// Snapshot documents, legacy migration and the stores persisting them.
pub mod dao;
mod dto;
mod error;
/// HTTP routers for chat users, operators and event streams.
pub mod routes;
/// Operations behind the routes and the background workers.
pub mod services;
/// Betting engine and the shared application state around it.
pub mod state;
