//! Device registry - connected audio-capable peripherals per profile
//!
//! Tracks the devices the stack currently reports as connected, keyed by
//! address, in insertion order, together with the hearing-aid sync-group
//! ids used to coalesce earpiece pairs. The registry also owns the bound
//! profile proxies and performs the actual connect/disconnect-audio calls
//! against them.
//!
//! The registry is written from the event-bridge task and read from the
//! actor task and from external query calls, so all state lives behind a
//! single mutex. The lock guards internal state only and is never held
//! across a profile-proxy call.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::device::{Device, ProfileType};
use crate::profile::{HandsFreeProxy, HearingAidProxy};

#[derive(Default)]
struct RegistryInner {
    /// Connected hands-free devices, insertion order preserved
    hands_free: Vec<Device>,
    /// Connected hearing-aid devices, insertion order preserved
    hearing_aid: Vec<Device>,
    /// Hearing-aid address -> sync-group id
    sync_ids: HashMap<String, u64>,
    hands_free_service: Option<HandsFreeProxy>,
    hearing_aid_service: Option<HearingAidProxy>,
    /// Active hearing aid parked across a ringer interruption
    cached_hearing_aid_device: Option<Device>,
}

impl RegistryInner {
    fn contains_address(&self, address: &str) -> bool {
        self.hands_free.iter().any(|d| d.address == address)
            || self.hearing_aid.iter().any(|d| d.address == address)
    }
}

/// Registry of connected call-audio peripherals
#[derive(Default)]
pub struct DeviceRegistry {
    inner: Mutex<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Profile service lifecycle
    // =========================================================================

    /// Bind the hands-free profile proxy
    pub fn bind_hands_free(&self, proxy: HandsFreeProxy) {
        self.inner.lock().hands_free_service = Some(proxy);
        info!("hands-free profile service bound");
    }

    /// Bind the hearing-aid profile proxy
    pub fn bind_hearing_aid(&self, proxy: HearingAidProxy) {
        self.inner.lock().hearing_aid_service = Some(proxy);
        info!("hearing-aid profile service bound");
    }

    /// Unbind a profile proxy, dropping every device tracked on it.
    ///
    /// Returns the devices that were lost so the caller can report each of
    /// them (and a cleared active device) to the route state machine.
    pub fn unbind(&self, profile: ProfileType) -> Vec<Device> {
        let mut inner = self.inner.lock();
        let lost = match profile {
            ProfileType::HandsFree => {
                inner.hands_free_service = None;
                std::mem::take(&mut inner.hands_free)
            }
            ProfileType::HearingAid => {
                inner.hearing_aid_service = None;
                inner.sync_ids.clear();
                std::mem::take(&mut inner.hearing_aid)
            }
        };
        info!(
            profile = %profile,
            lost = lost.len(),
            "profile service unbound, dropping tracked devices"
        );
        lost
    }

    pub fn hands_free_service(&self) -> Option<HandsFreeProxy> {
        self.inner.lock().hands_free_service.clone()
    }

    pub fn hearing_aid_service(&self) -> Option<HearingAidProxy> {
        self.inner.lock().hearing_aid_service.clone()
    }

    // =========================================================================
    // Device tracking
    // =========================================================================

    /// Register a device reported connected by the stack.
    ///
    /// Hearing aids have their sync-group id queried and recorded first.
    /// Returns false (a no-op) if the device is already tracked or the
    /// profile's service is unbound.
    pub fn on_device_connected(&self, device: &Device) -> bool {
        match device.profile {
            ProfileType::HearingAid => {
                let service = self.inner.lock().hearing_aid_service.clone();
                let Some(service) = service else {
                    warn!(device = %device, "hearing aid service unbound while adding device");
                    return false;
                };
                // Proxy call happens outside the lock.
                let sync_id = service.hi_sync_id(device);
                let mut inner = self.inner.lock();
                if inner.contains_address(&device.address) {
                    return false;
                }
                inner.sync_ids.insert(device.address.clone(), sync_id);
                inner.hearing_aid.push(device.clone());
                debug!(device = %device, sync_id, "hearing aid device added");
                true
            }
            ProfileType::HandsFree => {
                let mut inner = self.inner.lock();
                if inner.hands_free_service.is_none() {
                    warn!(device = %device, "headset service unbound while adding device");
                    return false;
                }
                if inner.contains_address(&device.address) {
                    return false;
                }
                inner.hands_free.push(device.clone());
                debug!(device = %device, "hands-free device added");
                true
            }
        }
    }

    /// Unregister a device. Idempotent; returns whether anything changed.
    pub fn on_device_disconnected(&self, device: &Device) -> bool {
        let mut inner = self.inner.lock();
        let removed = match device.profile {
            ProfileType::HearingAid => {
                inner.sync_ids.remove(&device.address);
                let before = inner.hearing_aid.len();
                inner.hearing_aid.retain(|d| d.address != device.address);
                before != inner.hearing_aid.len()
            }
            ProfileType::HandsFree => {
                let before = inner.hands_free.len();
                inner.hands_free.retain(|d| d.address != device.address);
                before != inner.hands_free.len()
            }
        };
        if removed {
            debug!(device = %device, "device removed");
        }
        removed
    }

    pub fn device_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.hands_free.len() + inner.hearing_aid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.device_count() == 0
    }

    /// All connected devices: hands-free first, then hearing aids, each in
    /// insertion order.
    pub fn connected_devices(&self) -> Vec<Device> {
        let inner = self.inner.lock();
        let mut result = inner.hands_free.clone();
        result.extend(inner.hearing_aid.iter().cloned());
        result
    }

    /// Connected devices with hearing-aid earpiece pairs coalesced.
    ///
    /// The currently active hearing aid (as reported by the proxy) comes
    /// first and claims its sync-group id; the remaining hearing aids are
    /// included only if their id has not been seen yet, so one physical aid
    /// never shows up as two routable destinations.
    pub fn unique_connected_devices(&self) -> Vec<Device> {
        let (mut result, hearing_aids, sync_ids, service) = {
            let inner = self.inner.lock();
            (
                inner.hands_free.clone(),
                inner.hearing_aid.clone(),
                inner.sync_ids.clone(),
                inner.hearing_aid_service.clone(),
            )
        };
        let mut seen_sync_ids = std::collections::HashSet::new();
        if let Some(service) = service {
            if let Some(active) = service.active_devices().into_iter().next() {
                seen_sync_ids.insert(sync_ids.get(&active.address).copied().unwrap_or(0));
                result.push(active);
            }
        }
        for device in hearing_aids {
            let sync_id = sync_ids.get(&device.address).copied().unwrap_or(0);
            if seen_sync_ids.insert(sync_id) {
                result.push(device);
            }
        }
        result
    }

    // =========================================================================
    // Audio control
    // =========================================================================

    /// Route call audio to the device at `address`, dispatching to the
    /// profile the device is tracked on.
    ///
    /// Hands-free devices are made active and then have the audio link
    /// brought up unless it already is; hearing aids only need to be made
    /// active. Returns false for unknown addresses or unbound services.
    pub fn connect_audio(&self, address: &str) -> bool {
        enum Target {
            HearingAid(Device, Option<HearingAidProxy>),
            HandsFree(Device, Option<HandsFreeProxy>),
            Unknown,
        }
        let target = {
            let inner = self.inner.lock();
            if let Some(device) = inner.hearing_aid.iter().find(|d| d.address == address) {
                Target::HearingAid(device.clone(), inner.hearing_aid_service.clone())
            } else if let Some(device) = inner.hands_free.iter().find(|d| d.address == address) {
                Target::HandsFree(device.clone(), inner.hands_free_service.clone())
            } else {
                Target::Unknown
            }
        };
        match target {
            Target::HearingAid(device, Some(service)) => service.set_active_device(Some(&device)),
            Target::HearingAid(_, None) => {
                warn!(address, "turning on audio with no hearing aid service bound");
                false
            }
            Target::HandsFree(device, Some(service)) => {
                if !service.set_active_device(Some(&device)) {
                    warn!(address, "could not set active device");
                    return false;
                }
                if !service.is_audio_on() {
                    service.connect_audio()
                } else {
                    true
                }
            }
            Target::HandsFree(_, None) => {
                warn!(address, "turning on audio with no headset service bound");
                false
            }
            Target::Unknown => {
                warn!(address, "turning on audio for a disconnected device");
                false
            }
        }
    }

    /// Stop routing call audio to Bluetooth: clear the active hearing aid
    /// (if any) and tear down the hands-free audio link.
    pub fn disconnect_audio(&self) {
        let service = self.inner.lock().hearing_aid_service.clone();
        match service {
            Some(service) => {
                if !service.active_devices().is_empty() {
                    service.set_active_device(None);
                }
            }
            None => warn!("disconnecting audio with no hearing aid service bound"),
        }
        self.disconnect_sco();
    }

    /// Tear down only the hands-free audio link.
    pub fn disconnect_sco(&self) {
        let service = self.inner.lock().hands_free_service.clone();
        match service {
            Some(service) => service.disconnect_audio(),
            None => warn!("disconnecting audio with no headset service bound"),
        }
    }

    /// Park the currently active hearing aid so it can be restored after a
    /// ringer interruption.
    pub fn cache_hearing_aid_device(&self) {
        let service = self.inner.lock().hearing_aid_service.clone();
        if let Some(service) = service {
            if let Some(active) = service.active_devices().into_iter().next() {
                self.inner.lock().cached_hearing_aid_device = Some(active);
            }
        }
    }

    /// Re-activate a previously parked hearing aid, consuming the cache.
    pub fn restore_hearing_aid_device(&self) {
        let (cached, service) = {
            let mut inner = self.inner.lock();
            if inner.hearing_aid_service.is_none() {
                return;
            }
            (
                inner.cached_hearing_aid_device.take(),
                inner.hearing_aid_service.clone(),
            )
        };
        if let (Some(cached), Some(service)) = (cached, service) {
            service.set_active_device(Some(&cached));
        }
    }

    /// Whether the headset rings in-band; false with no service bound.
    pub fn is_inband_ringing_enabled(&self) -> bool {
        let service = self.inner.lock().hands_free_service.clone();
        match service {
            Some(service) => service.is_inband_ringing_enabled(),
            None => {
                info!("in-band ringing query with no headset service bound");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::HearingAidProfile;
    use crate::sim::{SimHandsFree, SimHearingAid};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn registry_with_services() -> (DeviceRegistry, Arc<SimHandsFree>, Arc<SimHearingAid>) {
        let registry = DeviceRegistry::new();
        let hands_free = SimHandsFree::new();
        let hearing_aid = SimHearingAid::new();
        registry.bind_hands_free(hands_free.clone());
        registry.bind_hearing_aid(hearing_aid.clone());
        (registry, hands_free, hearing_aid)
    }

    fn hfp(address: &str) -> Device {
        Device::new(address, ProfileType::HandsFree)
    }

    fn aid(address: &str) -> Device {
        Device::new(address, ProfileType::HearingAid)
    }

    #[test]
    fn test_add_remove_round_trip() {
        let (registry, _, _) = registry_with_services();
        let device = hfp("00:00:00:00:00:01");

        assert!(registry.on_device_connected(&device));
        assert_eq!(registry.device_count(), 1);

        assert!(registry.on_device_disconnected(&device));
        assert!(registry.is_empty());
        assert!(registry.connected_devices().is_empty());
    }

    #[test]
    fn test_duplicate_add_is_a_no_op() {
        let (registry, _, _) = registry_with_services();
        let device = hfp("00:00:00:00:00:01");

        assert!(registry.on_device_connected(&device));
        assert!(!registry.on_device_connected(&device));
        assert_eq!(registry.device_count(), 1);
    }

    #[test]
    fn test_remove_absent_is_a_no_op() {
        let (registry, _, _) = registry_with_services();
        assert!(!registry.on_device_disconnected(&hfp("00:00:00:00:00:01")));
    }

    #[test]
    fn test_add_without_service_is_rejected() {
        let registry = DeviceRegistry::new();
        assert!(!registry.on_device_connected(&hfp("00:00:00:00:00:01")));
        assert!(!registry.on_device_connected(&aid("00:00:00:00:00:02")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unique_devices_coalesce_sync_group() {
        let (registry, _, hearing_aid) = registry_with_services();
        hearing_aid.set_hi_sync_id("00:00:00:00:00:01", 7);
        hearing_aid.set_hi_sync_id("00:00:00:00:00:02", 7);

        assert!(registry.on_device_connected(&aid("00:00:00:00:00:01")));
        assert!(registry.on_device_connected(&aid("00:00:00:00:00:02")));

        let unique = registry.unique_connected_devices();
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].address, "00:00:00:00:00:01");
    }

    #[test]
    fn test_unique_devices_list_active_hearing_aid_first() {
        let (registry, _, hearing_aid) = registry_with_services();
        hearing_aid.set_hi_sync_id("00:00:00:00:00:01", 7);
        hearing_aid.set_hi_sync_id("00:00:00:00:00:02", 7);
        hearing_aid.set_hi_sync_id("00:00:00:00:00:03", 8);

        for address in ["00:00:00:00:00:01", "00:00:00:00:00:02", "00:00:00:00:00:03"] {
            assert!(registry.on_device_connected(&aid(address)));
        }
        hearing_aid.put_active_devices(vec![aid("00:00:00:00:00:02")]);

        let unique = registry.unique_connected_devices();
        let addresses: Vec<_> = unique.iter().map(|d| d.address.as_str()).collect();
        assert_eq!(addresses, vec!["00:00:00:00:00:02", "00:00:00:00:00:03"]);
    }

    #[test]
    fn test_unique_devices_mix_profiles() {
        let (registry, _, hearing_aid) = registry_with_services();
        hearing_aid.set_hi_sync_id("00:00:00:00:00:02", 7);

        assert!(registry.on_device_connected(&hfp("00:00:00:00:00:01")));
        assert!(registry.on_device_connected(&aid("00:00:00:00:00:02")));

        let unique = registry.unique_connected_devices();
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].address, "00:00:00:00:00:01");
    }

    #[test]
    fn test_connect_audio_hands_free_path() {
        let (registry, hands_free, _) = registry_with_services();
        let device = hfp("00:00:00:00:00:01");
        assert!(registry.on_device_connected(&device));

        assert!(registry.connect_audio("00:00:00:00:00:01"));
        assert_eq!(hands_free.attempts_for("00:00:00:00:00:01"), 1);
        assert_eq!(hands_free.connect_audio_calls(), 1);
    }

    #[test]
    fn test_connect_audio_skips_sco_setup_when_audio_already_on() {
        let (registry, hands_free, _) = registry_with_services();
        let device = hfp("00:00:00:00:00:01");
        assert!(registry.on_device_connected(&device));
        hands_free.set_audio_on(true);

        assert!(registry.connect_audio("00:00:00:00:00:01"));
        assert_eq!(hands_free.connect_audio_calls(), 0);
    }

    #[test]
    fn test_connect_audio_hearing_aid_path() {
        let (registry, hands_free, hearing_aid) = registry_with_services();
        hearing_aid.set_hi_sync_id("00:00:00:00:00:02", 7);
        assert!(registry.on_device_connected(&aid("00:00:00:00:00:02")));

        assert!(registry.connect_audio("00:00:00:00:00:02"));
        assert_eq!(
            hearing_aid.active_devices(),
            vec![aid("00:00:00:00:00:02")]
        );
        assert_eq!(hands_free.connect_audio_calls(), 0);
    }

    #[test]
    fn test_connect_audio_unknown_address_fails() {
        let (registry, _, _) = registry_with_services();
        assert!(!registry.connect_audio("00:00:00:00:00:99"));
    }

    #[test]
    fn test_unbind_drops_profile_devices() {
        let (registry, _, hearing_aid) = registry_with_services();
        hearing_aid.set_hi_sync_id("00:00:00:00:00:02", 7);
        assert!(registry.on_device_connected(&hfp("00:00:00:00:00:01")));
        assert!(registry.on_device_connected(&aid("00:00:00:00:00:02")));

        let lost = registry.unbind(ProfileType::HearingAid);
        assert_eq!(lost, vec![aid("00:00:00:00:00:02")]);
        assert_eq!(registry.device_count(), 1);
        assert!(registry.hearing_aid_service().is_none());
    }

    #[test]
    fn test_cache_and_restore_hearing_aid_device() {
        let (registry, _, hearing_aid) = registry_with_services();
        hearing_aid.put_active_devices(vec![aid("00:00:00:00:00:02")]);

        registry.cache_hearing_aid_device();
        hearing_aid.put_active_devices(vec![]);

        registry.restore_hearing_aid_device();
        assert_eq!(
            hearing_aid.active_devices(),
            vec![aid("00:00:00:00:00:02")]
        );

        // The cache is consumed by the restore.
        hearing_aid.put_active_devices(vec![]);
        registry.restore_hearing_aid_device();
        assert!(hearing_aid.active_devices().is_empty());
    }

    proptest! {
        #[test]
        fn prop_add_then_remove_leaves_registry_empty(suffixes in prop::collection::vec(0u8..32, 1..16)) {
            let (registry, _, _) = registry_with_services();
            let devices: Vec<Device> = suffixes
                .iter()
                .map(|s| hfp(&format!("00:00:00:00:00:{s:02X}")))
                .collect();

            for device in &devices {
                registry.on_device_connected(device);
            }
            for device in &devices {
                registry.on_device_disconnected(device);
                // A second removal must be a no-op.
                prop_assert!(!registry.on_device_disconnected(device));
            }
            prop_assert!(registry.is_empty());
        }
    }
}
