//! Stream Connection State Machine
//!
//! Defines the lifecycle of one subscription and decides how the next
//! attempt is made after it ends: immediately with a fresh credential, or
//! after a backoff delay.

use std::time::Duration;

/// Lifecycle of a single subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Request sent, no response yet
    Connecting,
    /// 200 received, reading events
    Open,
    /// Closed by the server or because the credential was rejected
    Closed,
    /// Transport or credential exchange failure
    Failed,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Subscription answered with 200
    Opened,
    /// Subscription answered with 401, or the server revoked the credential
    Unauthorized,
    /// Minting a new credential failed
    AuthFailed,
    /// Body ended (premature EOF)
    StreamEnded,
    /// Request, read or timeout error
    TransportFailed,
    /// Start the next attempt
    Retry,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(StreamState),
    /// Mint a new credential, after `delay`, then retry
    Reauthenticate { delay: Duration },
    /// Wait `delay` before retrying
    Backoff { delay: Duration },
    /// Transition was invalid from current state
    Invalid { from: StreamState, event: LinkEvent },
}

/// Growing delay between failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// A policy that always waits `delay`
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
        }
    }
}

/// The connection state machine for the command stream
#[derive(Debug)]
pub struct StreamStateMachine {
    current_state: StreamState,
    policy: BackoffPolicy,
    next_delay: Duration,
    /// A fresh credential was minted and no subscription has opened since
    reauthenticated: bool,
    consecutive_failures: u32,
}

impl StreamStateMachine {
    /// Create a new state machine about to connect
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current_state: StreamState::Connecting,
            policy,
            next_delay: policy.initial,
            reauthenticated: false,
            consecutive_failures: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> StreamState {
        self.current_state
    }

    /// Failed attempts since the last successful open
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        use LinkEvent::*;
        use StreamState::*;

        match (self.current_state, event) {
            (Connecting, Opened) => {
                self.current_state = Open;
                self.next_delay = self.policy.initial;
                self.reauthenticated = false;
                self.consecutive_failures = 0;
                TransitionResult::Success(Open)
            }

            // Token rotation is expected; only a rejection of a token we just
            // minted is treated as a fault
            (Connecting | Open, Unauthorized) => {
                self.current_state = Closed;
                let delay = if self.reauthenticated {
                    self.take_backoff()
                } else {
                    Duration::ZERO
                };
                self.reauthenticated = true;
                TransitionResult::Reauthenticate { delay }
            }

            (Connecting | Closed | Failed, AuthFailed) => {
                self.current_state = Failed;
                TransitionResult::Backoff {
                    delay: self.take_backoff(),
                }
            }

            (Open, StreamEnded) => {
                self.current_state = Closed;
                TransitionResult::Backoff {
                    delay: self.take_backoff(),
                }
            }

            (Connecting | Open, TransportFailed) => {
                self.current_state = Failed;
                TransitionResult::Backoff {
                    delay: self.take_backoff(),
                }
            }

            (Closed | Failed, Retry) => {
                self.current_state = Connecting;
                TransitionResult::Success(Connecting)
            }

            (from, event) => TransitionResult::Invalid { from, event },
        }
    }

    fn take_backoff(&mut self) -> Duration {
        let delay = self.next_delay;
        self.next_delay = std::cmp::min(delay * 2, self.policy.max);
        self.consecutive_failures += 1;
        delay
    }
}
