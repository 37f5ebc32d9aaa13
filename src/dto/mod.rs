//! Request and response bodies of the HTTP surface.

/// Session lifecycle and storage control requests.
pub mod admin;
/// Bets, reactions and user overviews.
pub mod betting;
/// Administrative balance adjustments.
pub mod economy;
/// Health check payload.
pub mod health;
/// Session views.
pub mod session;
/// Runtime timer defaults.
pub mod settings;
/// Server-sent event payloads.
pub mod sse;
