//! Profile proxy seams to the Bluetooth stack
//!
//! The coordinator never talks to the radio directly; it goes through these
//! traits. Production code binds real stack proxies, tests and the demo
//! binary bind the in-memory implementations from [`crate::sim`].
//!
//! All calls are synchronous and fast: they surface an immediate boolean or
//! value, never a later callback. Failures are reported through events
//! delivered to the [`crate::bridge::EventBridge`].

use std::sync::Arc;

use crate::device::{AudioState, Device};

/// Proxy for the hands-free (HFP) profile service
pub trait HandsFreeProfile: Send + Sync {
    /// Make `device` the stack's active hands-free device (`None` clears it).
    /// Returns false if the stack rejected the request.
    fn set_active_device(&self, device: Option<&Device>) -> bool;

    /// Start the audio (SCO) link to the active device.
    fn connect_audio(&self) -> bool;

    /// Tear down the audio link.
    fn disconnect_audio(&self);

    /// Whether an audio link is currently up.
    fn is_audio_on(&self) -> bool;

    /// The device the stack currently considers the audio destination.
    fn active_device(&self) -> Option<Device>;

    /// Audio path state for a specific device.
    fn audio_state(&self, device: &Device) -> AudioState;

    /// Whether the headset rings in-band over the audio link.
    fn is_inband_ringing_enabled(&self) -> bool;
}

/// Proxy for the hearing-aid profile service
///
/// Hearing aids have no dedicated audio-state API; audio presence is
/// signalled through active-device changes instead.
pub trait HearingAidProfile: Send + Sync {
    /// Make `device` the active hearing aid (`None` clears it).
    fn set_active_device(&self, device: Option<&Device>) -> bool;

    /// Currently active hearing-aid devices (typically zero or one pair
    /// member; the first entry is the one that counts).
    fn active_devices(&self) -> Vec<Device>;

    /// Sync-group id linking the two earpieces of one physical aid.
    fn hi_sync_id(&self, device: &Device) -> u64;
}

/// Shared handle to a bound hands-free proxy
pub type HandsFreeProxy = Arc<dyn HandsFreeProfile>;

/// Shared handle to a bound hearing-aid proxy
pub type HearingAidProxy = Arc<dyn HearingAidProfile>;
