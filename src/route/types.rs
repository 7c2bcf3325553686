//! Route state and active-device cache types

use parking_lot::Mutex;

use crate::device::{Device, ProfileType};

/// Name of the off state, also used as the prefix-less state label
pub const AUDIO_OFF_STATE_NAME: &str = "AudioOff";
/// Prefix for connecting-state names ("Connecting:<address>")
pub const CONNECTING_STATE_NAME_PREFIX: &str = "Connecting";
/// Prefix for connected-state names ("Connected:<address>")
pub const CONNECTED_STATE_NAME_PREFIX: &str = "Connected";

/// Current routing state of call audio
///
/// Exactly one value is current at any time. `Connecting`/`Connected`
/// carry the address of the device the attempt or route is pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteState {
    /// No call audio routed to Bluetooth
    AudioOff,
    /// A connection attempt to `address` is pending confirmation
    Connecting { address: String },
    /// Call audio is routed to `address`
    Connected { address: String },
}

impl RouteState {
    /// Diagnostic name, e.g. "Connecting:00:00:00:00:00:01"
    pub fn name(&self) -> String {
        match self {
            RouteState::AudioOff => AUDIO_OFF_STATE_NAME.to_string(),
            RouteState::Connecting { address } => {
                format!("{CONNECTING_STATE_NAME_PREFIX}:{address}")
            }
            RouteState::Connected { address } => {
                format!("{CONNECTED_STATE_NAME_PREFIX}:{address}")
            }
        }
    }

    pub fn is_off(&self) -> bool {
        matches!(self, RouteState::AudioOff)
    }

    /// The address this state is pinned to, if any
    pub fn address(&self) -> Option<&str> {
        match self {
            RouteState::AudioOff => None,
            RouteState::Connecting { address } | RouteState::Connected { address } => {
                Some(address.as_str())
            }
        }
    }
}

impl std::fmt::Display for RouteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Edge produced by an active-device report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// No profile had an active device; now one does
    Appeared,
    /// Some profile had an active device; now none does
    Gone,
}

#[derive(Default)]
struct ActiveDevices {
    hands_free: Option<Device>,
    hearing_aid: Option<Device>,
    /// Tie-break when both profiles claim an active device. A single value
    /// with no history; it may be stale and is used anyway.
    most_recent: Option<Device>,
}

/// Last active device reported per profile, shared between the event
/// bridge (writer) and the route actor (reader)
#[derive(Default)]
pub struct ActiveDeviceCache {
    inner: Mutex<ActiveDevices>,
}

impl ActiveDeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an active-device report and detect presence edges.
    pub fn on_active_device_changed(
        &self,
        device: Option<Device>,
        profile: ProfileType,
    ) -> Option<PresenceChange> {
        let mut inner = self.inner.lock();
        let was_present = inner.hands_free.is_some() || inner.hearing_aid.is_some();
        match profile {
            ProfileType::HandsFree => inner.hands_free = device.clone(),
            ProfileType::HearingAid => inner.hearing_aid = device.clone(),
        }
        if let Some(device) = device {
            inner.most_recent = Some(device);
        }
        let is_present = inner.hands_free.is_some() || inner.hearing_aid.is_some();
        match (was_present, is_present) {
            (false, true) => Some(PresenceChange::Appeared),
            (true, false) => Some(PresenceChange::Gone),
            _ => None,
        }
    }

    pub fn has_active_device(&self) -> bool {
        let inner = self.inner.lock();
        inner.hands_free.is_some() || inner.hearing_aid.is_some()
    }

    /// Address of the cached active device, preferring hands-free.
    pub fn active_device_address(&self) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .hands_free
            .as_ref()
            .or(inner.hearing_aid.as_ref())
            .map(|d| d.address.clone())
    }

    /// The most recently reported active device, regardless of profile.
    pub fn most_recently_reported(&self) -> Option<Device> {
        self.inner.lock().most_recent.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(address: &str, profile: ProfileType) -> Device {
        Device::new(address, profile)
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RouteState::AudioOff.name(), "AudioOff");
        let connecting = RouteState::Connecting {
            address: "00:00:00:00:00:01".to_string(),
        };
        assert_eq!(connecting.name(), "Connecting:00:00:00:00:00:01");
        assert_eq!(connecting.address(), Some("00:00:00:00:00:01"));
        assert!(!connecting.is_off());
    }

    #[test]
    fn test_presence_edges() {
        let cache = ActiveDeviceCache::new();
        let hfp = device("00:00:00:00:00:01", ProfileType::HandsFree);
        let aid = device("00:00:00:00:00:02", ProfileType::HearingAid);

        assert_eq!(
            cache.on_active_device_changed(Some(hfp.clone()), ProfileType::HandsFree),
            Some(PresenceChange::Appeared)
        );
        // Second profile appearing is not an edge.
        assert_eq!(
            cache.on_active_device_changed(Some(aid), ProfileType::HearingAid),
            None
        );
        assert_eq!(
            cache.on_active_device_changed(None, ProfileType::HearingAid),
            None
        );
        assert_eq!(
            cache.on_active_device_changed(None, ProfileType::HandsFree),
            Some(PresenceChange::Gone)
        );
        assert!(!cache.has_active_device());
    }

    #[test]
    fn test_active_address_prefers_hands_free() {
        let cache = ActiveDeviceCache::new();
        cache.on_active_device_changed(
            Some(device("00:00:00:00:00:02", ProfileType::HearingAid)),
            ProfileType::HearingAid,
        );
        cache.on_active_device_changed(
            Some(device("00:00:00:00:00:01", ProfileType::HandsFree)),
            ProfileType::HandsFree,
        );
        assert_eq!(
            cache.active_device_address().as_deref(),
            Some("00:00:00:00:00:01")
        );
        // Most recent is the hands-free device, reported last.
        assert_eq!(
            cache.most_recently_reported().unwrap().address,
            "00:00:00:00:00:01"
        );
    }
}
