use crate::error::{Error, Result};
use crate::server::ServerId;
use std::sync::Mutex;
use std::time::Instant;

/// Maximum number of events kept per handle
const EVENT_HISTORY: usize = 256;

/// State of a server handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Launched, not yet reporting ready
    Starting,
    /// Reported ready
    Running,
    /// Shutdown requested
    ShuttingDown,
    /// Process exited and channel closed
    Stopped,
    /// Unexpected exit or unrecoverable channel error
    Failed,
}

impl ServerState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, ShuttingDown)
                | (Running, ShuttingDown)
                | (ShuttingDown, Stopped)
                | (Starting | Running | ShuttingDown, Failed)
        )
    }

    /// No further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, ServerState::Stopped | ServerState::Failed)
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::ShuttingDown => "shutting-down",
            ServerState::Stopped => "stopped",
            ServerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Server lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLifecycleEvent {
    /// Process launched
    Launched,
    /// Attached to a server that was already running
    Attached,
    /// Readiness check reported running
    Ready,
    /// Shutdown requested
    ShutdownRequested,
    /// Process gone and channel closed
    Stopped,
    /// Something went wrong that cannot be recovered
    Failed,
}

impl ServerLifecycleEvent {
    fn target_state(self) -> ServerState {
        match self {
            ServerLifecycleEvent::Launched => ServerState::Starting,
            ServerLifecycleEvent::Attached | ServerLifecycleEvent::Ready => ServerState::Running,
            ServerLifecycleEvent::ShutdownRequested => ServerState::ShuttingDown,
            ServerLifecycleEvent::Stopped => ServerState::Stopped,
            ServerLifecycleEvent::Failed => ServerState::Failed,
        }
    }
}

/// Server lifecycle event
#[derive(Debug, Clone)]
pub struct ServerEvent {
    /// Handle ID
    pub id: ServerId,
    /// Event type
    pub event: ServerLifecycleEvent,
    /// State after the event
    pub state: ServerState,
    /// Event timestamp
    pub timestamp: Instant,
    /// Event details
    pub details: Option<String>,
}

/// State machine of one server handle, with its event history.
pub struct ServerLifecycle {
    id: ServerId,
    state: Mutex<ServerState>,
    events: Mutex<Vec<ServerEvent>>,
}

impl ServerLifecycle {
    /// Starts the machine with `initial`, which must be `Launched` or `Attached`.
    pub fn new(id: ServerId, initial: ServerLifecycleEvent, details: Option<String>) -> Self {
        let state = match initial {
            ServerLifecycleEvent::Attached => ServerState::Running,
            _ => ServerState::Starting,
        };
        Self {
            id,
            state: Mutex::new(state),
            events: Mutex::new(vec![ServerEvent {
                id,
                event: initial,
                state,
                timestamp: Instant::now(),
                details,
            }]),
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> Result<ServerState> {
        self.state
            .lock()
            .map(|state| *state)
            .map_err(|_| Error::Other("Failed to lock server state".to_string()))
    }

    /// Records an event and applies its transition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the transition is not allowed; the
    /// state is left unchanged.
    pub fn record_event(
        &self,
        event: ServerLifecycleEvent,
        details: Option<String>,
    ) -> Result<ServerState> {
        let next = event.target_state();
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| Error::Other("Failed to lock server state".to_string()))?;
            if !state.can_transition_to(next) {
                return Err(Error::InvalidState(format!(
                    "Cannot move from {} to {}",
                    *state, next
                )));
            }
            *state = next;
        }

        tracing::debug!(id = %self.id, ?event, state = %next, "Server state changed");

        let mut events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?;
        events.push(ServerEvent {
            id: self.id,
            event,
            state: next,
            timestamp: Instant::now(),
            details,
        });
        if events.len() > EVENT_HISTORY {
            events.remove(0);
        }

        Ok(next)
    }

    /// Moves to Failed unless already terminal
    pub fn fail(&self, details: impl Into<String>) -> Result<()> {
        if self.state()?.is_terminal() {
            return Ok(());
        }
        self.record_event(ServerLifecycleEvent::Failed, Some(details.into()))
            .map(|_| ())
    }

    /// Recent events, newest first
    pub fn events(&self, limit: Option<usize>) -> Result<Vec<ServerEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock server events".to_string()))?;

        let mut recent: Vec<ServerEvent> = events.iter().rev().cloned().collect();
        if let Some(limit) = limit {
            recent.truncate(limit);
        }
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let lifecycle = ServerLifecycle::new(ServerId::new(), ServerLifecycleEvent::Launched, None);
        assert_eq!(lifecycle.state().unwrap(), ServerState::Starting);

        for event in [
            ServerLifecycleEvent::Ready,
            ServerLifecycleEvent::ShutdownRequested,
            ServerLifecycleEvent::Stopped,
        ] {
            lifecycle.record_event(event, None).unwrap();
        }
        assert_eq!(lifecycle.state().unwrap(), ServerState::Stopped);

        let events = lifecycle.events(Some(2)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, ServerLifecycleEvent::Stopped);
        assert_eq!(events[1].event, ServerLifecycleEvent::ShutdownRequested);
    }

    #[test]
    fn test_stopped_cannot_fail_or_restart() {
        let lifecycle = ServerLifecycle::new(ServerId::new(), ServerLifecycleEvent::Attached, None);
        lifecycle
            .record_event(ServerLifecycleEvent::ShutdownRequested, None)
            .unwrap();
        lifecycle
            .record_event(ServerLifecycleEvent::Stopped, None)
            .unwrap();

        assert!(matches!(
            lifecycle.record_event(ServerLifecycleEvent::Failed, None),
            Err(Error::InvalidState(_))
        ));
        assert!(lifecycle.record_event(ServerLifecycleEvent::Ready, None).is_err());
        lifecycle.fail("ignored").unwrap();
        assert_eq!(lifecycle.state().unwrap(), ServerState::Stopped);
    }

    #[test]
    fn test_any_live_state_can_fail() {
        for state in [ServerState::Starting, ServerState::Running, ServerState::ShuttingDown] {
            assert!(state.can_transition_to(ServerState::Failed));
        }
        assert!(!ServerState::Failed.can_transition_to(ServerState::Running));
    }
}
