//! Reconnecting, opcode-multiplexed duplex channel.

/// Connection notifications.
pub mod events;
/// Frame envelope and typed payloads.
pub mod frame;
/// Async driver and handler registry.
pub mod handle;
/// Link state machine and backoff schedule.
pub mod link;
/// JSON-lines connector over TCP.
pub mod tcp;
