//! Command enum for the route actor
//!
//! Every command carries the diagnostic session id of the external event or
//! API call that produced it, so log lines across the bridge and the actor
//! can be correlated. `QueryState` is the one request-response command; it
//! returns the current state through a oneshot channel.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use super::types::RouteState;

/// Allocate the next diagnostic session id
pub(crate) fn next_session() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Commands processed by the route actor, one at a time, in order
pub enum RouteCommand {
    /// A new device was registered; create its state slot
    DeviceAdded { session: u64, address: String },

    /// A registered device was lost; park its state slot for cleanup and
    /// fall back to the actual hardware state if it was the current target
    DeviceLost { session: u64, address: String },

    /// Route call audio to `address`, or to a fallback device when `None`
    Connect {
        session: u64,
        address: Option<String>,
    },

    /// Stop routing call audio to Bluetooth
    Disconnect { session: u64 },

    /// Delayed re-attempt after a failed connect. `epoch` invalidates
    /// retries scheduled before the last successful connection.
    RetryConnect {
        session: u64,
        address: String,
        retry_count: u32,
        epoch: u64,
    },

    /// The stack confirmed audio is on for `address`
    AudioConfirmed { session: u64, address: String },

    /// The stack reported audio lost for `address` (`None` when the report
    /// does not name a device, e.g. a cleared hearing-aid active device)
    AudioLost {
        session: u64,
        address: Option<String>,
    },

    /// A pending connection sat unconfirmed for too long. `generation`
    /// identifies which Connecting entry scheduled it.
    ConnectionTimeout { session: u64, generation: u64 },

    /// Deliver the current state through the response channel
    QueryState {
        session: u64,
        response: oneshot::Sender<RouteState>,
    },

    /// Stop the actor loop
    Shutdown,
}

// Manual Debug because QueryState holds a oneshot sender.
impl std::fmt::Debug for RouteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteCommand::DeviceAdded { session, address } => f
                .debug_struct("DeviceAdded")
                .field("session", session)
                .field("address", address)
                .finish(),
            RouteCommand::DeviceLost { session, address } => f
                .debug_struct("DeviceLost")
                .field("session", session)
                .field("address", address)
                .finish(),
            RouteCommand::Connect { session, address } => f
                .debug_struct("Connect")
                .field("session", session)
                .field("address", address)
                .finish(),
            RouteCommand::Disconnect { session } => f
                .debug_struct("Disconnect")
                .field("session", session)
                .finish(),
            RouteCommand::RetryConnect {
                session,
                address,
                retry_count,
                epoch,
            } => f
                .debug_struct("RetryConnect")
                .field("session", session)
                .field("address", address)
                .field("retry_count", retry_count)
                .field("epoch", epoch)
                .finish(),
            RouteCommand::AudioConfirmed { session, address } => f
                .debug_struct("AudioConfirmed")
                .field("session", session)
                .field("address", address)
                .finish(),
            RouteCommand::AudioLost { session, address } => f
                .debug_struct("AudioLost")
                .field("session", session)
                .field("address", address)
                .finish(),
            RouteCommand::ConnectionTimeout {
                session,
                generation,
            } => f
                .debug_struct("ConnectionTimeout")
                .field("session", session)
                .field("generation", generation)
                .finish(),
            RouteCommand::QueryState { session, .. } => f
                .debug_struct("QueryState")
                .field("session", session)
                .finish_non_exhaustive(),
            RouteCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_are_unique() {
        let a = next_session();
        let b = next_session();
        assert_ne!(a, b);
    }

    #[test]
    fn test_command_debug() {
        let cmd = RouteCommand::Connect {
            session: 7,
            address: Some("00:00:00:00:00:01".to_string()),
        };
        let debug_str = format!("{:?}", cmd);
        assert!(debug_str.contains("Connect"));
        assert!(debug_str.contains("00:00:00:00:00:01"));

        let (tx, _rx) = oneshot::channel();
        let cmd = RouteCommand::QueryState {
            session: 8,
            response: tx,
        };
        assert!(format!("{:?}", cmd).contains("QueryState"));

        assert_eq!(format!("{:?}", RouteCommand::Shutdown), "Shutdown");
    }
}
