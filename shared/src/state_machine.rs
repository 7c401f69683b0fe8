//! Listener State Machine
//!
//! Tracks the lifecycle of one listening socket:
//! ```text
//! Stopped -> Starting -> Listening <-> Recovering
//!               |            |              |
//!               +---------> Stopped <-------+
//! ```

/// Lifecycle state of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerState {
    #[default]
    Stopped,
    /// Bind in progress
    Starting,
    /// Accept loop running
    Listening,
    /// Last accept failed, retrying
    Recovering,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    /// Caller asked for the listener to start
    StartRequested,
    /// Listening socket bound (initially or after recreation)
    Bound,
    /// Initial bind failed
    BindFailed,
    /// A connection was accepted
    Accepted,
    /// accept() failed, or recreating the socket failed
    AcceptFailed,
    /// Stop flag observed, or the accept loop exited
    StopRequested,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(ListenerState),
    /// Transition was invalid from current state
    Invalid {
        from: ListenerState,
        event: ListenerEvent,
    },
    /// Too many consecutive accept failures; listener is now stopped
    RetriesExhausted { attempts: u32 },
}

/// The state machine for one listener binding
#[derive(Debug)]
pub struct ListenerStateMachine {
    current_state: ListenerState,
    consecutive_failures: u32,
    max_retries: u32,
}

impl ListenerStateMachine {
    /// Create a new state machine in Stopped state
    pub fn new(max_retries: u32) -> Self {
        Self {
            current_state: ListenerState::Stopped,
            consecutive_failures: 0,
            max_retries,
        }
    }

    /// Get current state
    pub fn state(&self) -> ListenerState {
        self.current_state
    }

    /// Accept failures since the last successful accept
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: ListenerEvent) -> TransitionResult {
        use ListenerEvent::*;
        use ListenerState::*;

        match (self.current_state, event) {
            (_, StopRequested) => self.enter(Stopped),

            (Stopped, StartRequested) => {
                self.consecutive_failures = 0;
                self.enter(Starting)
            }
            (Starting, Bound) | (Recovering, Bound) => self.enter(Listening),
            (Starting, BindFailed) => self.enter(Stopped),

            (Listening | Recovering, Accepted) => {
                self.consecutive_failures = 0;
                self.enter(Listening)
            }
            (Listening | Recovering, AcceptFailed) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures > self.max_retries {
                    self.current_state = Stopped;
                    TransitionResult::RetriesExhausted {
                        attempts: self.consecutive_failures,
                    }
                } else {
                    self.enter(Recovering)
                }
            }

            (from, _) => TransitionResult::Invalid { from, event },
        }
    }

    fn enter(&mut self, state: ListenerState) -> TransitionResult {
        self.current_state = state;
        TransitionResult::Success(state)
    }
}
