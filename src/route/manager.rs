//! RouteManager - facade over the registry, the actor and the listener
//!
//! Owns the wiring: it spawns the actor, shares the active-device cache
//! with the event bridge, and exposes the public routing API consumed by
//! the call-routing layer.

use std::sync::Arc;

use crate::config::RouteConfig;
use crate::device::{Device, ProfileType};
use crate::listener::RouteListener;
use crate::registry::DeviceRegistry;

use super::actor::RouteActor;
use super::actor_handle::RouteHandle;
use super::types::{ActiveDeviceCache, PresenceChange};

/// Coordinator facade for Bluetooth call-audio routing
pub struct RouteManager {
    handle: RouteHandle,
    registry: Arc<DeviceRegistry>,
    active_devices: Arc<ActiveDeviceCache>,
    listener: Arc<dyn RouteListener>,
}

impl RouteManager {
    /// Build the coordinator and spawn its actor.
    pub fn new(
        config: RouteConfig,
        registry: Arc<DeviceRegistry>,
        listener: Arc<dyn RouteListener>,
    ) -> Self {
        let active_devices = Arc::new(ActiveDeviceCache::new());
        let handle = RouteActor::spawn(
            config,
            registry.clone(),
            active_devices.clone(),
            listener.clone(),
        );
        Self {
            handle,
            registry,
            active_devices,
            listener,
        }
    }

    pub fn handle(&self) -> &RouteHandle {
        &self.handle
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    // =========================================================================
    // Public routing API
    // =========================================================================

    /// Attempt to connect call audio to `address`, or to a fallback device
    /// when `None`. Synchronous failures are retried with backoff.
    pub fn connect_audio(&self, address: Option<String>) {
        self.handle.connect_audio(address);
    }

    /// Disconnect Bluetooth call audio.
    pub fn disconnect_audio(&self) {
        self.handle.disconnect_audio();
    }

    /// Whether audio is routed to Bluetooth or a routing attempt is
    /// pending. Round-trips through the actor; see
    /// [`RouteHandle::query_state`] for the timeout behavior.
    pub async fn is_audio_connected_or_pending(&self) -> bool {
        self.handle.is_audio_connected_or_pending().await
    }

    /// Whether any device is available to route audio to.
    pub fn is_available(&self) -> bool {
        !self.registry.is_empty()
    }

    /// Connected devices with hearing-aid pairs deduplicated.
    pub fn connected_devices(&self) -> Vec<Device> {
        self.registry.unique_connected_devices()
    }

    /// Whether any profile currently reports an active device.
    pub fn has_active_device(&self) -> bool {
        self.active_devices.has_active_device()
    }

    /// Tear down only the hands-free audio link.
    pub fn disconnect_sco(&self) {
        self.registry.disconnect_sco();
    }

    /// Park the active hearing aid across a ringer interruption.
    pub fn cache_hearing_aid_device(&self) {
        self.registry.cache_hearing_aid_device();
    }

    /// Restore a previously parked hearing aid.
    pub fn restore_hearing_aid_device(&self) {
        self.registry.restore_hearing_aid_device();
    }

    /// Whether the headset rings in-band over the audio link.
    pub fn is_inband_ringing_enabled(&self) -> bool {
        self.registry.is_inband_ringing_enabled()
    }

    // =========================================================================
    // Bridge-facing notifications
    // =========================================================================

    /// A device joined the registry: tell the actor and the listener.
    pub(crate) fn device_added(&self, session: u64, address: String) {
        self.handle.device_added(session, address);
        self.listener.on_device_list_changed();
    }

    /// A device left the registry: tell the actor and the listener.
    pub(crate) fn device_lost(&self, session: u64, address: String) {
        self.handle.device_lost(session, address);
        self.listener.on_device_list_changed();
    }

    /// Record an active-device report and fire presence edges.
    pub(crate) fn active_device_changed(&self, device: Option<Device>, profile: ProfileType) {
        match self.active_devices.on_active_device_changed(device, profile) {
            Some(PresenceChange::Appeared) => self.listener.on_active_device_present(),
            Some(PresenceChange::Gone) => self.listener.on_active_device_gone(),
            None => {}
        }
    }
}
