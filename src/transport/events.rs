//! Connection notifications broadcast by the link driver.

use std::time::Duration;

use super::frame::Frame;

/// Emitted on every transition into or out of the ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Login succeeded and the queue was flushed.
    Connected,
    /// A session ended or failed to start.
    Disconnected {
        /// Consecutive failures including this one.
        failures: u32,
        /// Delay before the next attempt.
        retry_in: Duration,
    },
}

/// What a registered handler receives. Frames and link transitions share one
/// queue, so a handler sees them in the order the driver did.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A frame for the registered opcode.
    Frame(Frame),
    /// The link came up or went down after the frames before it.
    Link(LinkEvent),
}
