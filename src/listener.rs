//! Outward notification contract
//!
//! The call-routing layer registers a [`RouteListener`] to hear about
//! device-list, active-device and audio-path changes. Callbacks are invoked
//! from the actor task or the event bridge task; implementations must be
//! cheap and must not call back into the coordinator synchronously.

/// Notifications consumed by the external call-routing logic
pub trait RouteListener: Send + Sync {
    /// The set of connected devices changed.
    fn on_device_list_changed(&self);

    /// At least one profile now reports an active device.
    fn on_active_device_present(&self);

    /// No profile reports an active device anymore.
    fn on_active_device_gone(&self);

    /// Call audio is routed (or optimistically being routed) to Bluetooth.
    fn on_audio_connected(&self);

    /// Call audio is no longer routed to Bluetooth.
    fn on_audio_disconnected(&self);

    /// The stack reported something inconsistent with our bookkeeping.
    /// The listener should re-derive its own view of reality rather than
    /// trust any cached routing state.
    fn on_unexpected_state_change(&self);
}

/// Listener that ignores every notification
pub struct NullListener;

impl RouteListener for NullListener {
    fn on_device_list_changed(&self) {}
    fn on_active_device_present(&self) {}
    fn on_active_device_gone(&self) {}
    fn on_audio_connected(&self) {}
    fn on_audio_disconnected(&self) {}
    fn on_unexpected_state_change(&self) {}
}
