//! RouteHandle - channel-backed interface to the route actor
//!
//! Fire-and-forget methods for commands, plus the one deliberately blocking
//! point: `query_state`, a synchronous round trip through the actor's
//! queue bounded by the configured query timeout.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::commands::{next_session, RouteCommand};
use super::types::RouteState;

/// Clonable handle for sending commands to the route actor
#[derive(Clone)]
pub struct RouteHandle {
    command_tx: mpsc::UnboundedSender<RouteCommand>,
    query_timeout: Duration,
}

impl RouteHandle {
    pub(crate) fn new(
        command_tx: mpsc::UnboundedSender<RouteCommand>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            command_tx,
            query_timeout,
        }
    }

    // =========================================================================
    // Fire-and-forget commands
    // =========================================================================

    /// Attempt to route call audio to `address`, or to a fallback device
    /// when `None`. A synchronously failing attempt is retried later.
    pub fn connect_audio(&self, address: Option<String>) {
        let _ = self.command_tx.send(RouteCommand::Connect {
            session: next_session(),
            address,
        });
    }

    /// Stop routing call audio to Bluetooth.
    pub fn disconnect_audio(&self) {
        let _ = self.command_tx.send(RouteCommand::Disconnect {
            session: next_session(),
        });
    }

    /// Report a newly registered device. `session` ties the command to the
    /// external event that produced it.
    pub fn device_added(&self, session: u64, address: String) {
        let _ = self
            .command_tx
            .send(RouteCommand::DeviceAdded { session, address });
    }

    /// Report a lost device.
    pub fn device_lost(&self, session: u64, address: String) {
        let _ = self
            .command_tx
            .send(RouteCommand::DeviceLost { session, address });
    }

    /// Report stack-confirmed audio for a device.
    pub fn audio_confirmed(&self, session: u64, address: String) {
        let _ = self
            .command_tx
            .send(RouteCommand::AudioConfirmed { session, address });
    }

    /// Report stack-reported audio loss.
    pub fn audio_lost(&self, session: u64, address: Option<String>) {
        let _ = self
            .command_tx
            .send(RouteCommand::AudioLost { session, address });
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Fetch the current state through the actor's queue.
    ///
    /// Waits at most the configured query timeout; a timeout (or a dead
    /// actor) yields `None` and the caller should assume audio is off.
    pub async fn query_state(&self) -> Option<RouteState> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = RouteCommand::QueryState {
            session: next_session(),
            response: response_tx,
        };
        if self.command_tx.send(cmd).is_err() {
            return None;
        }

        match tokio::time::timeout(self.query_timeout, response_rx).await {
            Ok(Ok(state)) => Some(state),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!("no state response from route actor in time, assuming audio off");
                None
            }
        }
    }

    /// Whether audio is routed or a routing attempt is pending.
    pub async fn is_audio_connected_or_pending(&self) -> bool {
        matches!(self.query_state().await, Some(state) if !state.is_off())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// False once the actor has terminated.
    pub fn is_alive(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Ask the actor to stop processing commands.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(RouteCommand::Shutdown);
    }
}
