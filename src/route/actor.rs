//! RouteActor - the audio-routing state machine
//!
//! A single sequential task owns the routing state and processes commands
//! from one ordered channel, so transitions never race and no locking is
//! needed around the state itself. Timers (connection timeout, retry
//! backoff) are delayed self-sends into the same channel; stale deliveries
//! are filtered by generation/epoch stamps since a queued message cannot be
//! surgically removed the way an exited state would want.
//!
//! The actor trusts the hardware over its own bookkeeping: whenever events
//! contradict the current state, it re-derives the actual state from the
//! profile proxies instead of asserting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::actor_handle::RouteHandle;
use super::commands::{next_session, RouteCommand};
use super::types::{ActiveDeviceCache, RouteState};
use crate::config::RouteConfig;
use crate::device::{AudioState, Device};
use crate::listener::RouteListener;
use crate::registry::DeviceRegistry;

/// Maximum number of retries for one connection attempt chain
pub const MAX_CONNECTION_RETRIES: u32 = 2;

/// Per-address state slot, created lazily and dropped once the device is
/// gone and the machine passes through AudioOff
#[derive(Debug, Default)]
struct DeviceSlot;

/// Actor owning the routing state machine
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────────────────────────┐
/// │                      RouteActor                          │
/// │  state: AudioOff | Connecting(addr) | Connected(addr)    │
/// │  device_slots: HashMap<address, DeviceSlot>              │
/// │  slots_to_clean_up: HashSet<address>                     │
/// │  most_recently_used: Vec<address>                        │
/// │                          ▲                               │
/// │                          │ commands                      │
/// │  command_rx (UnboundedReceiver<RouteCommand>)            │
/// └─────────────────────────────────────────────────────────┘
/// ```
pub struct RouteActor {
    /// The one current state
    state: RouteState,

    /// Addresses with instantiated state slots
    device_slots: HashMap<String, DeviceSlot>,

    /// Slots of lost devices, dropped on the next AudioOff entry
    slots_to_clean_up: HashSet<String>,

    /// Addresses that ever reached Connected, most recent last
    most_recently_used: Vec<String>,

    registry: Arc<DeviceRegistry>,
    active_devices: Arc<ActiveDeviceCache>,
    listener: Arc<dyn RouteListener>,
    config: RouteConfig,

    command_rx: mpsc::UnboundedReceiver<RouteCommand>,
    /// Sender for delayed self-sends (timeout, retry)
    command_tx: mpsc::UnboundedSender<RouteCommand>,

    /// Stamp of the connection timeout scheduled by the current Connecting
    timeout_generation: u64,
    timeout_task: Option<JoinHandle<()>>,

    /// Retries scheduled before this epoch are stale
    retry_epoch: u64,
    retry_tasks: Vec<JoinHandle<()>>,
}

impl RouteActor {
    /// Spawn the actor and return a handle for interacting with it
    pub fn spawn(
        config: RouteConfig,
        registry: Arc<DeviceRegistry>,
        active_devices: Arc<ActiveDeviceCache>,
        listener: Arc<dyn RouteListener>,
    ) -> RouteHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let query_timeout = config.query_timeout();

        let actor = RouteActor {
            state: RouteState::AudioOff,
            device_slots: HashMap::new(),
            slots_to_clean_up: HashSet::new(),
            most_recently_used: Vec::new(),
            registry,
            active_devices,
            listener,
            config,
            command_rx,
            command_tx: command_tx.clone(),
            timeout_generation: 0,
            timeout_task: None,
            retry_epoch: 0,
            retry_tasks: Vec::new(),
        };
        tokio::spawn(actor.run());

        info!("route actor spawned");
        RouteHandle::new(command_tx, query_timeout)
    }

    /// Main run loop: enter the initial state, then process commands until
    /// shutdown or channel closure.
    async fn run(mut self) {
        debug!("route actor loop started");
        self.enter_audio_off();

        while let Some(cmd) = self.command_rx.recv().await {
            debug!(?cmd, state = %self.state, "processing command");
            if !self.handle_command(cmd) {
                break;
            }
        }

        self.cancel_connection_timeout();
        self.cancel_pending_retries();
        info!(state = %self.state, "route actor loop terminated");
    }

    /// Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: RouteCommand) -> bool {
        match cmd {
            RouteCommand::Shutdown => {
                info!("route actor received shutdown command");
                return false;
            }
            RouteCommand::QueryState { response, .. } => {
                let _ = response.send(self.state.clone());
            }
            RouteCommand::DeviceAdded { address, .. } => {
                self.add_device(&address);
            }
            RouteCommand::DeviceLost { address, .. } => {
                self.remove_device(&address);
                if self.state.address() == Some(address.as_str()) {
                    self.transition_to_actual_state();
                }
            }
            RouteCommand::Connect { address, .. } => {
                self.handle_connect(address.as_deref());
            }
            RouteCommand::Disconnect { .. } => {
                self.handle_disconnect();
            }
            RouteCommand::RetryConnect {
                address,
                retry_count,
                epoch,
                ..
            } => {
                self.handle_retry(&address, retry_count, epoch);
            }
            RouteCommand::AudioConfirmed { address, .. } => {
                self.handle_audio_confirmed(&address);
            }
            RouteCommand::AudioLost { address, .. } => {
                self.handle_audio_lost(address.as_deref());
            }
            RouteCommand::ConnectionTimeout { generation, .. } => {
                self.handle_connection_timeout(generation);
            }
        }
        true
    }

    // =========================================================================
    // Command handlers
    // =========================================================================

    fn handle_connect(&mut self, address: Option<&str>) {
        if let (Some(current), Some(requested)) = (self.state.address(), address) {
            if current == requested {
                // Repeated connection attempt to the current target.
                debug!(address = requested, "already targeting device, ignoring connect");
                return;
            }
        }
        match self.connect_bt_audio(address, 0) {
            Some(actual) => {
                let next = self.connecting_state_for(&actual, "connect");
                self.set_state(next);
            }
            None => {
                warn!(requested = ?address, "failed to connect to any device");
            }
        }
    }

    fn handle_disconnect(&mut self) {
        match self.state {
            // Already off; nothing to tear down.
            RouteState::AudioOff => {}
            RouteState::Connecting { .. } | RouteState::Connected { .. } => {
                // Routing to AudioOff happens later, via AudioLost.
                self.registry.disconnect_audio();
            }
        }
    }

    fn handle_retry(&mut self, address: &str, retry_count: u32, epoch: u64) {
        if epoch != self.retry_epoch {
            debug!(address, "stale retry superseded by a successful connection, dropping");
            return;
        }
        if self.state.address() == Some(address) {
            debug!(address, state = %self.state, "retry for the current target, ignoring");
            return;
        }
        info!(address, retry_count, "retrying audio connection");
        match self.connect_bt_audio(Some(address), retry_count) {
            Some(actual) => {
                let next = self.connecting_state_for(&actual, "retry");
                self.set_state(next);
            }
            None => {
                info!(address, "retry failed");
            }
        }
    }

    fn handle_audio_confirmed(&mut self, address: &str) {
        match self.state.clone() {
            RouteState::AudioOff => {
                warn!(address, "audio unexpectedly turned on while off");
                let next = self.connected_state_for(address, "audio-off/confirmed");
                self.set_state(next);
            }
            RouteState::Connecting { address: current } => {
                if current == address {
                    info!(address, "connection success");
                    let next = self.connected_state_for(address, "connecting/confirmed");
                    self.set_state(next);
                } else {
                    warn!(
                        expected = %current,
                        actual = address,
                        "different device confirmed audio while connecting, following it"
                    );
                    let next = self.connected_state_for(address, "connecting/confirmed-other");
                    self.set_state(next);
                }
            }
            RouteState::Connected { address: current } => {
                if current == address {
                    info!(address, "redundant audio confirmation");
                } else {
                    warn!(
                        expected = %current,
                        actual = address,
                        "different device confirmed audio while connected, following it"
                    );
                    let next = self.connected_state_for(address, "connected/confirmed-other");
                    self.set_state(next);
                }
            }
        }
    }

    fn handle_audio_lost(&mut self, address: Option<&str>) {
        match self.state.clone() {
            RouteState::AudioOff => {
                info!(address = ?address, "audio lost while already off");
                self.listener.on_unexpected_state_change();
            }
            RouteState::Connecting { address: current } => {
                if address.is_none() || address == Some(current.as_str()) {
                    info!(address = %current, "connection attempt failed");
                    self.transition_to_actual_state();
                } else {
                    warn!(
                        lost = ?address,
                        connecting = %current,
                        "audio lost for a device we are not connecting to"
                    );
                    self.listener.on_unexpected_state_change();
                }
            }
            RouteState::Connected { address: current } => {
                if address.is_none() || address == Some(current.as_str()) {
                    info!(address = %current, "audio connection lost");
                    self.transition_to_actual_state();
                } else {
                    warn!(
                        lost = ?address,
                        connected = %current,
                        "audio lost for a device we are not connected to"
                    );
                    self.listener.on_unexpected_state_change();
                }
            }
        }
    }

    fn handle_connection_timeout(&mut self, generation: u64) {
        match &self.state {
            RouteState::Connecting { address } => {
                if generation != self.timeout_generation {
                    debug!(generation, "stale connection timeout, ignoring");
                    return;
                }
                info!(address = %address, "connection attempt timed out");
                self.transition_to_actual_state();
            }
            RouteState::Connected { .. } => {
                warn!("received connection timeout while connected");
            }
            RouteState::AudioOff => {}
        }
    }

    // =========================================================================
    // Connect algorithm
    // =========================================================================

    /// Try to route audio to `address`, falling back to the stack-reported
    /// active device, then to an arbitrary registered device.
    ///
    /// On collaborator failure a retry is scheduled (bounded by
    /// [`MAX_CONNECTION_RETRIES`]) and `None` is returned either way; the
    /// retry is asynchronous. On success, returns the address actually
    /// targeted, which may differ from the one requested.
    fn connect_bt_audio(&mut self, address: Option<&str>, retry_count: u32) -> Option<String> {
        let devices = self.registry.connected_devices();
        let requested_available = address
            .map(|a| devices.iter().any(|d| d.address == a))
            .unwrap_or(false);

        let actual = if requested_available {
            address.map(String::from)
        } else {
            self.active_devices.active_device_address()
        };
        let actual = match actual {
            Some(actual) => actual,
            None => {
                info!("no requested device and no stack-active device, trying arbitrary device");
                match devices.first() {
                    Some(device) => device.address.clone(),
                    None => {
                        info!("no devices available at all, not connecting");
                        return None;
                    }
                }
            }
        };
        if address.is_some() && !requested_available {
            info!(
                requested = ?address,
                actual = %actual,
                "requested device not available, using fallback"
            );
        }

        if !self.registry.connect_audio(&actual) {
            let should_retry = retry_count < MAX_CONNECTION_RETRIES;
            warn!(
                address = %actual,
                retry = should_retry,
                "could not connect audio"
            );
            if should_retry {
                self.schedule_retry(actual, retry_count + 1);
            }
            return None;
        }

        Some(actual)
    }

    fn schedule_retry(&mut self, address: String, retry_count: u32) {
        let tx = self.command_tx.clone();
        let delay = self.config.retry_backoff();
        let epoch = self.retry_epoch;
        self.retry_tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(RouteCommand::RetryConnect {
                session: next_session(),
                address,
                retry_count,
                epoch,
            });
        }));
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn set_state(&mut self, next: RouteState) {
        debug!(from = %self.state, to = %next, "state transition");
        if matches!(self.state, RouteState::Connecting { .. }) {
            self.cancel_connection_timeout();
        }
        self.state = next;
        match self.state.clone() {
            RouteState::AudioOff => self.enter_audio_off(),
            RouteState::Connecting { .. } => self.enter_connecting(),
            RouteState::Connected { address } => self.enter_connected(&address),
        }
    }

    /// Entry actions for AudioOff: reconcile with hardware truth, drop
    /// slots of lost devices, notify the listener.
    fn enter_audio_off(&mut self) {
        let stale = self.audio_connected_device();
        if let Some(device) = &stale {
            warn!(
                device = %device,
                "entering AudioOff but a device appears connected, switching to its connected state"
            );
        }
        self.cleanup_disconnected_slots();
        self.listener.on_audio_disconnected();
        if let Some(device) = stale {
            let next = self.connected_state_for(&device.address, "audio-off-entry");
            self.set_state(next);
        }
    }

    /// Entry actions for Connecting: bound the attempt with a timeout and
    /// optimistically report audio as connected so upstream call routing
    /// treats the attempt as already succeeded.
    fn enter_connecting(&mut self) {
        self.schedule_connection_timeout();
        self.listener.on_audio_connected();
    }

    /// Entry actions for Connected: a successful connection supersedes any
    /// pending retries for stale targets; promote the device in the
    /// most-recently-used order and notify the listener.
    fn enter_connected(&mut self, address: &str) {
        self.cancel_pending_retries();
        self.most_recently_used.retain(|a| a != address);
        self.most_recently_used.push(address.to_string());
        self.listener.on_audio_connected();
    }

    /// Re-derive the current state from what the stack actually reports.
    fn transition_to_actual_state(&mut self) {
        match self.audio_connected_device() {
            Some(device) => {
                info!(device = %device, "device already audio-connected, going to connected");
                let next = self.connected_state_for(&device.address, "actual-state");
                self.set_state(next);
            }
            None => self.set_state(RouteState::AudioOff),
        }
    }

    /// The device that currently carries audio, per the profile proxies.
    ///
    /// A hands-free device counts only when its audio state is not
    /// disconnected; a hearing aid counts when it is active. When both
    /// profiles report one simultaneously, the most recently reported
    /// active device wins, stale or not.
    fn audio_connected_device(&self) -> Option<Device> {
        let hands_free = self.registry.hands_free_service();
        let hearing_aid = self.registry.hearing_aid_service();
        if hands_free.is_none() && hearing_aid.is_none() {
            info!("no profile service available");
            return None;
        }

        let hands_free_device = hands_free.and_then(|service| {
            service
                .active_device()
                .filter(|device| service.audio_state(device) != AudioState::Disconnected)
        });
        let hearing_aid_device =
            hearing_aid.and_then(|service| service.active_devices().into_iter().next());

        match (hands_free_device, hearing_aid_device) {
            (Some(_), Some(_)) => {
                info!("both profiles report active devices, using the most recently reported");
                self.active_devices.most_recently_reported()
            }
            (Some(device), None) => Some(device),
            (None, hearing_aid_device) => hearing_aid_device,
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn schedule_connection_timeout(&mut self) {
        self.cancel_connection_timeout();
        self.timeout_generation += 1;
        let generation = self.timeout_generation;
        let tx = self.command_tx.clone();
        let delay = self.config.pending_timeout();
        self.timeout_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(RouteCommand::ConnectionTimeout {
                session: next_session(),
                generation,
            });
        }));
    }

    fn cancel_connection_timeout(&mut self) {
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }

    fn cancel_pending_retries(&mut self) {
        self.retry_epoch += 1;
        for task in self.retry_tasks.drain(..) {
            task.abort();
        }
    }

    // =========================================================================
    // Per-address state slots
    // =========================================================================

    fn add_device(&mut self, address: &str) -> bool {
        if self.slots_to_clean_up.remove(address) {
            // The device came back before its parked slot was dropped.
            return true;
        }
        if self.device_slots.contains_key(address) {
            info!(address, "attempting to add device twice");
            return false;
        }
        self.device_slots.insert(address.to_string(), DeviceSlot);
        true
    }

    /// Park a lost device's slot for cleanup. The slot itself survives
    /// until the next AudioOff entry, when it cannot be the current state.
    fn remove_device(&mut self, address: &str) -> bool {
        if !self.device_slots.contains_key(address) || self.slots_to_clean_up.contains(address) {
            info!(address, "attempting to remove already-removed device");
            return false;
        }
        self.slots_to_clean_up.insert(address.to_string());
        self.most_recently_used.retain(|a| a != address);
        true
    }

    fn connecting_state_for(&mut self, address: &str, context: &str) -> RouteState {
        if !self.device_slots.contains_key(address) {
            warn!(address, context, "device being connected to has no state slot");
            self.add_device(address);
        }
        RouteState::Connecting {
            address: address.to_string(),
        }
    }

    fn connected_state_for(&mut self, address: &str, context: &str) -> RouteState {
        if !self.device_slots.contains_key(address) {
            warn!(address, context, "device already connected has no state slot");
            self.add_device(address);
        }
        RouteState::Connected {
            address: address.to_string(),
        }
    }

    /// Drop slots parked by `remove_device`, keeping any whose address has
    /// been re-registered in the meantime. Runs on AudioOff entry, when
    /// none of them can be the current state.
    fn cleanup_disconnected_slots(&mut self) {
        let registered: HashSet<String> = self
            .registry
            .connected_devices()
            .into_iter()
            .map(|d| d.address)
            .collect();
        for address in self.slots_to_clean_up.drain() {
            if !registered.contains(&address) {
                self.device_slots.remove(&address);
                debug!(address = %address, "dropped state slot for disconnected device");
            }
        }
    }
}
