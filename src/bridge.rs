//! Event bridge - external stack events into internal commands
//!
//! Consumes raw hardware/profile events from one channel and translates
//! them into registry mutations and route commands. Each inbound event is
//! tagged with a fresh session id that travels with everything it produces,
//! so a routing decision can be traced back to the event that caused it.
//!
//! Audio-state events are gated on an externally supplied "call in
//! progress" flag: Bluetooth audio activity outside a call (media playback,
//! voice assistants) must not perturb call routing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::device::{AudioState, ConnectionState, Device, ProfileType};
use crate::profile::{HandsFreeProxy, HearingAidProxy};
use crate::route::{next_session, RouteManager};

/// Raw events delivered by the external stack
pub enum ExternalEvent {
    /// A device's profile-level connection state changed
    ConnectionStateChanged {
        device: Device,
        old_state: ConnectionState,
        new_state: ConnectionState,
    },

    /// A hands-free device's audio (SCO) state changed
    AudioStateChanged { device: Device, state: AudioState },

    /// A profile's active device changed (`None` clears it)
    ActiveDeviceChanged {
        device: Option<Device>,
        profile: ProfileType,
    },

    /// The hands-free profile service became available
    HandsFreeServiceConnected { proxy: HandsFreeProxy },

    /// The hearing-aid profile service became available
    HearingAidServiceConnected { proxy: HearingAidProxy },

    /// A profile service went away; its devices are gone with it
    ServiceDisconnected { profile: ProfileType },
}

// Manual Debug because the service events hold trait objects.
impl std::fmt::Debug for ExternalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalEvent::ConnectionStateChanged {
                device,
                old_state,
                new_state,
            } => f
                .debug_struct("ConnectionStateChanged")
                .field("device", device)
                .field("old_state", old_state)
                .field("new_state", new_state)
                .finish(),
            ExternalEvent::AudioStateChanged { device, state } => f
                .debug_struct("AudioStateChanged")
                .field("device", device)
                .field("state", state)
                .finish(),
            ExternalEvent::ActiveDeviceChanged { device, profile } => f
                .debug_struct("ActiveDeviceChanged")
                .field("device", device)
                .field("profile", profile)
                .finish(),
            ExternalEvent::HandsFreeServiceConnected { .. } => f
                .debug_struct("HandsFreeServiceConnected")
                .finish_non_exhaustive(),
            ExternalEvent::HearingAidServiceConnected { .. } => f
                .debug_struct("HearingAidServiceConnected")
                .finish_non_exhaustive(),
            ExternalEvent::ServiceDisconnected { profile } => f
                .debug_struct("ServiceDisconnected")
                .field("profile", profile)
                .finish(),
        }
    }
}

/// Handle for feeding events into the bridge and toggling the call gate
#[derive(Clone)]
pub struct EventBridgeHandle {
    event_tx: mpsc::UnboundedSender<ExternalEvent>,
    in_call: Arc<AtomicBool>,
}

impl EventBridgeHandle {
    /// Deliver one external event. Returns false if the bridge is gone.
    pub fn deliver(&self, event: ExternalEvent) -> bool {
        self.event_tx.send(event).is_ok()
    }

    /// Tell the bridge whether a call is currently in progress.
    pub fn set_in_call(&self, in_call: bool) {
        self.in_call.store(in_call, Ordering::Relaxed);
    }

    pub fn is_in_call(&self) -> bool {
        self.in_call.load(Ordering::Relaxed)
    }
}

/// Task translating external events into coordinator actions
pub struct EventBridge {
    manager: Arc<RouteManager>,
    event_rx: mpsc::UnboundedReceiver<ExternalEvent>,
    in_call: Arc<AtomicBool>,
}

impl EventBridge {
    /// Spawn the bridge task and return its handle.
    pub fn spawn(manager: Arc<RouteManager>) -> EventBridgeHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let in_call = Arc::new(AtomicBool::new(false));
        let bridge = EventBridge {
            manager,
            event_rx,
            in_call: in_call.clone(),
        };
        tokio::spawn(bridge.run());
        info!("event bridge spawned");
        EventBridgeHandle { event_tx, in_call }
    }

    async fn run(mut self) {
        debug!("event bridge loop started");
        while let Some(event) = self.event_rx.recv().await {
            let session = next_session();
            debug!(session, ?event, "external event");
            self.dispatch(session, event);
        }
        info!("event bridge loop terminated");
    }

    fn dispatch(&self, session: u64, event: ExternalEvent) {
        match event {
            ExternalEvent::ConnectionStateChanged {
                device,
                old_state,
                new_state,
            } => self.on_connection_state_changed(session, device, old_state, new_state),
            ExternalEvent::AudioStateChanged { device, state } => {
                self.on_audio_state_changed(session, device, state)
            }
            ExternalEvent::ActiveDeviceChanged { device, profile } => {
                self.on_active_device_changed(session, device, profile)
            }
            ExternalEvent::HandsFreeServiceConnected { proxy } => {
                self.manager.registry().bind_hands_free(proxy);
            }
            ExternalEvent::HearingAidServiceConnected { proxy } => {
                self.manager.registry().bind_hearing_aid(proxy);
            }
            ExternalEvent::ServiceDisconnected { profile } => {
                self.on_service_disconnected(session, profile)
            }
        }
    }

    fn on_connection_state_changed(
        &self,
        session: u64,
        device: Device,
        old_state: ConnectionState,
        new_state: ConnectionState,
    ) {
        info!(
            session,
            device = %device,
            from = %old_state,
            to = %new_state,
            "connection state changed"
        );
        match new_state {
            ConnectionState::Connected => {
                if self.manager.registry().on_device_connected(&device) {
                    self.manager.device_added(session, device.address);
                }
            }
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {
                if self.manager.registry().on_device_disconnected(&device) {
                    self.manager.device_lost(session, device.address);
                }
            }
            ConnectionState::Connecting => {}
        }
    }

    fn on_audio_state_changed(&self, session: u64, device: Device, state: AudioState) {
        if !self.is_in_call() {
            info!(
                session,
                device = %device,
                state = %state,
                "ignoring audio state change outside of a call"
            );
            return;
        }
        match state {
            AudioState::Connected => self
                .manager
                .handle()
                .audio_confirmed(session, device.address),
            AudioState::Disconnected => self
                .manager
                .handle()
                .audio_lost(session, Some(device.address)),
            AudioState::Connecting => {}
        }
    }

    fn on_active_device_changed(
        &self,
        session: u64,
        device: Option<Device>,
        profile: ProfileType,
    ) {
        info!(session, device = ?device.as_ref().map(|d| d.to_string()), profile = %profile, "active device changed");
        self.manager.active_device_changed(device.clone(), profile);

        // Hearing aids have no audio-state event; an active-device change
        // is how they signal audio presence.
        if profile == ProfileType::HearingAid {
            match device {
                None => self.manager.handle().audio_lost(session, None),
                Some(device) => {
                    if self.is_in_call() {
                        self.manager
                            .handle()
                            .audio_confirmed(session, device.address);
                    } else {
                        info!(session, "ignoring hearing aid audio on, not in a call");
                    }
                }
            }
        }
    }

    fn on_service_disconnected(&self, session: u64, profile: ProfileType) {
        let lost = self.manager.registry().unbind(profile);
        self.manager.active_device_changed(None, profile);
        for device in lost {
            self.manager.device_lost(session, device.address);
        }
    }

    fn is_in_call(&self) -> bool {
        self.in_call.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::listener::RouteListener;
    use crate::registry::DeviceRegistry;
    use crate::route::RouteState;
    use crate::sim::{CountingListener, SimHandsFree, SimHearingAid};
    use std::sync::atomic::Ordering as AtomicOrdering;
    use std::time::Duration;

    struct Harness {
        manager: Arc<RouteManager>,
        bridge: EventBridgeHandle,
        hearing_aid: Arc<SimHearingAid>,
        listener: Arc<CountingListener>,
    }

    fn setup() -> Harness {
        let registry = Arc::new(DeviceRegistry::new());
        let hands_free = SimHandsFree::new();
        let hearing_aid = SimHearingAid::new();
        let listener = CountingListener::new();
        let manager = Arc::new(RouteManager::new(
            RouteConfig::default(),
            registry,
            listener.clone() as Arc<dyn RouteListener>,
        ));
        let bridge = EventBridge::spawn(manager.clone());
        bridge.deliver(ExternalEvent::HandsFreeServiceConnected {
            proxy: hands_free.clone(),
        });
        bridge.deliver(ExternalEvent::HearingAidServiceConnected {
            proxy: hearing_aid.clone(),
        });
        Harness {
            manager,
            bridge,
            hearing_aid,
            listener,
        }
    }

    fn hfp(address: &str) -> Device {
        Device::new(address, ProfileType::HandsFree)
    }

    fn aid(address: &str) -> Device {
        Device::new(address, ProfileType::HearingAid)
    }

    fn connected(device: Device) -> ExternalEvent {
        ExternalEvent::ConnectionStateChanged {
            device,
            old_state: ConnectionState::Connecting,
            new_state: ConnectionState::Connected,
        }
    }

    /// Let the bridge and actor drain their queues.
    async fn settle(harness: &Harness) -> RouteState {
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.manager.handle().query_state().await.unwrap()
    }

    #[tokio::test]
    async fn test_connection_events_update_registry() {
        let harness = setup();
        harness.bridge.deliver(connected(hfp("00:00:00:00:00:01")));
        let state = settle(&harness).await;

        assert!(state.is_off());
        assert!(harness.manager.is_available());
        assert_eq!(
            harness.listener.device_list_changed.load(AtomicOrdering::Relaxed),
            1
        );

        harness.bridge.deliver(ExternalEvent::ConnectionStateChanged {
            device: hfp("00:00:00:00:00:01"),
            old_state: ConnectionState::Connected,
            new_state: ConnectionState::Disconnecting,
        });
        settle(&harness).await;
        assert!(!harness.manager.is_available());
        assert_eq!(
            harness.listener.device_list_changed.load(AtomicOrdering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn test_audio_events_ignored_outside_call() {
        let harness = setup();
        harness.bridge.deliver(connected(hfp("00:00:00:00:00:01")));
        harness.bridge.deliver(ExternalEvent::AudioStateChanged {
            device: hfp("00:00:00:00:00:01"),
            state: AudioState::Connected,
        });
        let state = settle(&harness).await;
        assert!(state.is_off());
    }

    #[tokio::test]
    async fn test_audio_events_route_during_call() {
        let harness = setup();
        harness.bridge.set_in_call(true);
        harness.bridge.deliver(connected(hfp("00:00:00:00:00:01")));
        harness.bridge.deliver(ExternalEvent::AudioStateChanged {
            device: hfp("00:00:00:00:00:01"),
            state: AudioState::Connected,
        });
        let state = settle(&harness).await;
        assert_eq!(state.name(), "Connected:00:00:00:00:00:01");
    }

    #[tokio::test]
    async fn test_active_device_presence_edges() {
        let harness = setup();
        harness.bridge.deliver(ExternalEvent::ActiveDeviceChanged {
            device: Some(hfp("00:00:00:00:00:01")),
            profile: ProfileType::HandsFree,
        });
        settle(&harness).await;
        assert!(harness.manager.has_active_device());
        assert_eq!(
            harness
                .listener
                .active_device_present
                .load(AtomicOrdering::Relaxed),
            1
        );

        harness.bridge.deliver(ExternalEvent::ActiveDeviceChanged {
            device: None,
            profile: ProfileType::HandsFree,
        });
        settle(&harness).await;
        assert!(!harness.manager.has_active_device());
        assert_eq!(
            harness
                .listener
                .active_device_gone
                .load(AtomicOrdering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_hearing_aid_active_device_synthesizes_audio() {
        let harness = setup();
        harness.bridge.set_in_call(true);
        harness.hearing_aid.set_hi_sync_id("00:00:00:00:00:02", 7);
        harness.bridge.deliver(connected(aid("00:00:00:00:00:02")));
        harness.bridge.deliver(ExternalEvent::ActiveDeviceChanged {
            device: Some(aid("00:00:00:00:00:02")),
            profile: ProfileType::HearingAid,
        });
        let state = settle(&harness).await;
        assert_eq!(state.name(), "Connected:00:00:00:00:00:02");

        // Clearing the active device reports audio lost; with no other
        // audio-connected device the machine falls back to off.
        harness.hearing_aid.put_active_devices(vec![]);
        harness.bridge.deliver(ExternalEvent::ActiveDeviceChanged {
            device: None,
            profile: ProfileType::HearingAid,
        });
        let state = settle(&harness).await;
        assert!(state.is_off());
    }

    #[tokio::test]
    async fn test_hearing_aid_synthesis_gated_outside_call() {
        let harness = setup();
        harness.hearing_aid.set_hi_sync_id("00:00:00:00:00:02", 7);
        harness.bridge.deliver(connected(aid("00:00:00:00:00:02")));
        harness.bridge.deliver(ExternalEvent::ActiveDeviceChanged {
            device: Some(aid("00:00:00:00:00:02")),
            profile: ProfileType::HearingAid,
        });
        let state = settle(&harness).await;
        // The cache is updated, but no audio message is synthesized.
        assert!(harness.manager.has_active_device());
        assert!(state.is_off());
    }

    #[tokio::test]
    async fn test_service_loss_drops_devices() {
        let harness = setup();
        harness.bridge.deliver(connected(hfp("00:00:00:00:00:01")));
        harness.hearing_aid.set_hi_sync_id("00:00:00:00:00:02", 7);
        harness.bridge.deliver(connected(aid("00:00:00:00:00:02")));
        settle(&harness).await;
        assert_eq!(harness.manager.registry().device_count(), 2);

        harness.bridge.deliver(ExternalEvent::ServiceDisconnected {
            profile: ProfileType::HandsFree,
        });
        settle(&harness).await;
        assert_eq!(harness.manager.registry().device_count(), 1);
        assert_eq!(
            harness.listener.device_list_changed.load(AtomicOrdering::Relaxed),
            3
        );
    }
}
