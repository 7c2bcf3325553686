//! Bluetooth device identity types
//!
//! Defines the core types shared by the registry, the route state machine,
//! and the event bridge.

use serde::{Deserialize, Serialize};

/// Bluetooth profile a call-audio capable device belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileType {
    /// Classic hands-free profile (headsets, car kits)
    HandsFree,
    /// Hearing-aid profile (earpiece pairs sharing a sync id)
    HearingAid,
}

impl std::fmt::Display for ProfileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileType::HandsFree => write!(f, "hands-free"),
            ProfileType::HearingAid => write!(f, "hearing-aid"),
        }
    }
}

/// Immutable identity of a connected peripheral
///
/// The address is the unique key; the registry tracks an address on at most
/// one profile at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// MAC address, e.g. "00:00:00:00:00:01"
    pub address: String,
    /// Profile the device was reported on
    pub profile: ProfileType,
}

impl Device {
    pub fn new(address: impl Into<String>, profile: ProfileType) -> Self {
        Self {
            address: address.into(),
            profile,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.address, self.profile)
    }
}

/// Profile-level connection state as reported by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Hands-free audio path (SCO) state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for AudioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioState::Disconnected => write!(f, "disconnected"),
            AudioState::Connecting => write!(f, "connecting"),
            AudioState::Connected => write!(f, "connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        let device = Device::new("00:00:00:00:00:01", ProfileType::HandsFree);
        assert_eq!(device.to_string(), "00:00:00:00:00:01 (hands-free)");
    }

    #[test]
    fn test_profile_serde_names() {
        let yaml = serde_yaml::to_string(&ProfileType::HearingAid).unwrap();
        assert_eq!(yaml.trim(), "hearing-aid");
    }
}
