//! Link state machine without I/O.
//!
//! The async driver in [`super::handle`] feeds socket and timer events in
//! and performs whatever the returned values ask for. Keeping the state here
//! lets the handshake, queueing, and backoff rules be tested without a
//! socket or a clock.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::frame::{ConnectionInfo, Frame, FrameError, Login, LoginStatus, Opcode};

/// Failures a link caller can observe.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A frame could not be serialized.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The outbound queue is at its bound while the link is not ready.
    #[error("outbound queue full ({bound} frames)")]
    QueueFull {
        /// Configured queue bound.
        bound: usize,
    },
    /// The link was closed by its owner.
    #[error("link closed")]
    Closed,
    /// The driver task is gone.
    #[error("link driver stopped")]
    ChannelClosed,
}

/// Lifecycle of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    /// Between attempts, waiting out a backoff delay.
    Disconnected,
    /// Opening the channel.
    Connecting,
    /// Channel open, handshake in progress.
    AwaitingLogin,
    /// Logged in; frames flow directly.
    Ready,
    /// Torn down by the owner. Terminal.
    Closed,
}

/// Link tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Time allowed from channel open to a successful login.
    pub handshake_timeout_ms: u64,
    /// Frames held while not ready; further sends are refused.
    pub outbound_queue_bound: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 6_000,
            outbound_queue_bound: 256,
        }
    }
}

impl LinkConfig {
    /// `handshake_timeout_ms` as a `Duration`.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Reconnect delay after `failures` consecutive failed sessions.
pub fn backoff_delay(failures: u32) -> Duration {
    let ms = match failures {
        0..=2 => 2_000,
        3 => 4_000,
        4..=5 => 10_000,
        6..=8 => 20_000,
        _ => 40_000,
    };
    Duration::from_millis(ms)
}

/// What to do with an outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Write it to the channel now.
    Send(Frame),
    /// Held until the next successful login.
    Queued,
}

/// Result of a `LOGIN_STATUS` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    /// Write `flush` in order; the link is ready.
    Ready {
        /// Frames queued before login, oldest first.
        flush: Vec<Frame>,
    },
    /// Close the channel; it counts as a failure.
    Rejected {
        /// Server explanation, if any.
        message: Option<String>,
    },
    /// Status arrived outside a handshake.
    Unexpected,
}

/// Snapshot for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// Lifecycle state.
    pub state: LinkState,
    /// Consecutive failed sessions.
    pub failures: u32,
    /// Frames waiting for login.
    pub queued: usize,
}

/// Sans-IO link state: lifecycle, failure count and outbound queue.
#[derive(Debug)]
pub struct Link {
    config: LinkConfig,
    state: LinkState,
    failures: u32,
    queue: VecDeque<Frame>,
}

impl Link {
    /// Disconnected link with an empty queue.
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            state: LinkState::Disconnected,
            failures: 0,
            queue: VecDeque::new(),
        }
    }

    /// Tuning in effect.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Consecutive failed sessions since the last successful login.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Frames waiting for login.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Snapshot of state, failures and queue length.
    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            failures: self.failures,
            queued: self.queue.len(),
        }
    }

    /// A connect attempt is starting.
    pub fn begin_connect(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        debug!(failures = self.failures, "connecting");
        self.state = LinkState::Connecting;
    }

    /// Channel opened; the handshake timer starts now.
    pub fn on_open(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        self.state = LinkState::AwaitingLogin;
    }

    /// Answers the server greeting with a login frame. The login frame never
    /// waits in the queue.
    pub fn on_greeting(&mut self, info: &ConnectionInfo, access_token: String) -> Result<Frame, LinkError> {
        info!(
            major = info.app_version_major,
            minor = info.app_version_minor,
            "connected to server, sending login"
        );
        Ok(Frame::new(Opcode::Login, &Login { access_token })?)
    }

    /// Applies the server's verdict on the login.
    pub fn on_login_status(&mut self, status: LoginStatus) -> LoginOutcome {
        if self.state != LinkState::AwaitingLogin {
            return LoginOutcome::Unexpected;
        }
        if !status.success {
            warn!(message = ?status.message, "login rejected");
            return LoginOutcome::Rejected {
                message: status.message,
            };
        }

        self.failures = 0;
        self.state = LinkState::Ready;
        let flush: Vec<Frame> = self.queue.drain(..).collect();
        info!(flushed = flush.len(), "login accepted");
        LoginOutcome::Ready { flush }
    }

    /// Routes a frame the owner wants sent.
    pub fn outbound(&mut self, frame: Frame) -> Result<Outbound, LinkError> {
        match self.state {
            LinkState::Closed => Err(LinkError::Closed),
            LinkState::Ready => Ok(Outbound::Send(frame)),
            LinkState::AwaitingLogin if frame.kind() == Some(Opcode::Login) => Ok(Outbound::Send(frame)),
            LinkState::Disconnected | LinkState::Connecting | LinkState::AwaitingLogin => {
                if self.queue.len() >= self.config.outbound_queue_bound {
                    return Err(LinkError::QueueFull {
                        bound: self.config.outbound_queue_bound,
                    });
                }
                self.queue.push_back(frame);
                Ok(Outbound::Queued)
            }
        }
    }

    /// Puts frames that could not be written back at the head of the queue.
    pub fn requeue_front(&mut self, frames: Vec<Frame>) {
        for frame in frames.into_iter().rev() {
            self.queue.push_front(frame);
        }
    }

    /// Session ended for any reason. Returns the reconnect delay, or `None`
    /// once the link is closed.
    pub fn on_closed(&mut self) -> Option<Duration> {
        if self.state == LinkState::Closed {
            return None;
        }
        self.failures = self.failures.saturating_add(1);
        self.state = LinkState::Disconnected;
        let delay = backoff_delay(self.failures);
        info!(
            failures = self.failures,
            retry_ms = delay.as_millis() as u64,
            "connection closed, reconnecting"
        );
        Some(delay)
    }

    /// Owner teardown. Queued frames are dropped.
    pub fn close(&mut self) {
        if self.state != LinkState::Closed {
            debug!(dropped = self.queue.len(), "link closed by owner");
        }
        self.state = LinkState::Closed;
        self.queue.clear();
    }
}
