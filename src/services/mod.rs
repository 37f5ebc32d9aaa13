/// Betting operations: sessions, bets, locks and payouts.
pub mod betting_service;
/// Startup restore from the snapshot store.
pub mod bootstrap;
/// OpenAPI documentation generation.
pub mod documentation;
/// Administrative balance adjustments.
pub mod economy_service;
/// Health check service.
pub mod health_service;
/// Coalesced session refreshes.
pub mod live_update_service;
/// Reaction bets and the debounced intent applier.
pub mod reaction_service;
/// Runtime timer defaults.
pub mod settings_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Storage health supervision and degraded-mode recovery.
pub mod storage_supervisor;
/// Timer deadline dispatcher.
pub mod timer_service;
