//! Simulated Bluetooth stack
//!
//! In-memory profile proxies with scriptable results, plus counting and
//! logging listeners. The demo binary drives the coordinator with these,
//! and the test suite uses them as its fakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::device::{AudioState, Device};
use crate::listener::RouteListener;
use crate::profile::{HandsFreeProfile, HearingAidProfile};

#[derive(Default)]
struct SimHandsFreeState {
    active_device: Option<Device>,
    audio_on: bool,
    connect_audio_result: bool,
    set_active_result: bool,
    inband_ringing: bool,
    /// Every address passed to `set_active_device`, in call order
    active_requests: Vec<String>,
    connect_audio_calls: u64,
}

/// Scriptable hands-free profile proxy
pub struct SimHandsFree {
    state: Mutex<SimHandsFreeState>,
}

impl SimHandsFree {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimHandsFreeState {
                connect_audio_result: true,
                set_active_result: true,
                ..Default::default()
            }),
        })
    }

    /// Script whether `connect_audio` succeeds.
    pub fn set_connect_audio_result(&self, result: bool) {
        self.state.lock().connect_audio_result = result;
    }

    /// Script whether `set_active_device` succeeds.
    pub fn set_set_active_result(&self, result: bool) {
        self.state.lock().set_active_result = result;
    }

    /// Force the audio-link state.
    pub fn set_audio_on(&self, on: bool) {
        self.state.lock().audio_on = on;
    }

    /// Force the stack-reported active device.
    pub fn put_active_device(&self, device: Option<Device>) {
        self.state.lock().active_device = device;
    }

    pub fn set_inband_ringing(&self, enabled: bool) {
        self.state.lock().inband_ringing = enabled;
    }

    /// Number of `set_active_device` calls that targeted `address`.
    pub fn attempts_for(&self, address: &str) -> usize {
        self.state
            .lock()
            .active_requests
            .iter()
            .filter(|a| a.as_str() == address)
            .count()
    }

    pub fn connect_audio_calls(&self) -> u64 {
        self.state.lock().connect_audio_calls
    }
}

impl HandsFreeProfile for SimHandsFree {
    fn set_active_device(&self, device: Option<&Device>) -> bool {
        let mut state = self.state.lock();
        if let Some(device) = device {
            state.active_requests.push(device.address.clone());
        }
        if state.set_active_result {
            state.active_device = device.cloned();
        }
        state.set_active_result
    }

    fn connect_audio(&self) -> bool {
        let mut state = self.state.lock();
        state.connect_audio_calls += 1;
        state.connect_audio_result
    }

    fn disconnect_audio(&self) {
        self.state.lock().audio_on = false;
    }

    fn is_audio_on(&self) -> bool {
        self.state.lock().audio_on
    }

    fn active_device(&self) -> Option<Device> {
        self.state.lock().active_device.clone()
    }

    fn audio_state(&self, device: &Device) -> AudioState {
        let state = self.state.lock();
        let is_active = state
            .active_device
            .as_ref()
            .map(|d| d.address == device.address)
            .unwrap_or(false);
        if is_active && state.audio_on {
            AudioState::Connected
        } else {
            AudioState::Disconnected
        }
    }

    fn is_inband_ringing_enabled(&self) -> bool {
        self.state.lock().inband_ringing
    }
}

#[derive(Default)]
struct SimHearingAidState {
    active_devices: Vec<Device>,
    sync_ids: HashMap<String, u64>,
    set_active_result: bool,
}

/// Scriptable hearing-aid profile proxy
pub struct SimHearingAid {
    state: Mutex<SimHearingAidState>,
}

impl SimHearingAid {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimHearingAidState {
                set_active_result: true,
                ..Default::default()
            }),
        })
    }

    /// Script the sync-group id reported for `address`.
    pub fn set_hi_sync_id(&self, address: &str, sync_id: u64) {
        self.state
            .lock()
            .sync_ids
            .insert(address.to_string(), sync_id);
    }

    /// Force the stack-reported active devices.
    pub fn put_active_devices(&self, devices: Vec<Device>) {
        self.state.lock().active_devices = devices;
    }

    pub fn set_set_active_result(&self, result: bool) {
        self.state.lock().set_active_result = result;
    }
}

impl HearingAidProfile for SimHearingAid {
    fn set_active_device(&self, device: Option<&Device>) -> bool {
        let mut state = self.state.lock();
        if state.set_active_result {
            state.active_devices = device.cloned().into_iter().collect();
        }
        state.set_active_result
    }

    fn active_devices(&self) -> Vec<Device> {
        self.state.lock().active_devices.clone()
    }

    fn hi_sync_id(&self, device: &Device) -> u64 {
        // Devices with no scripted id share id 0, like unknown aids do.
        self.state
            .lock()
            .sync_ids
            .get(&device.address)
            .copied()
            .unwrap_or(0)
    }
}

/// Listener counting every notification, for assertions
#[derive(Default)]
pub struct CountingListener {
    pub device_list_changed: AtomicU64,
    pub active_device_present: AtomicU64,
    pub active_device_gone: AtomicU64,
    pub audio_connected: AtomicU64,
    pub audio_disconnected: AtomicU64,
    pub unexpected_state_change: AtomicU64,
}

impl CountingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl RouteListener for CountingListener {
    fn on_device_list_changed(&self) {
        self.device_list_changed.fetch_add(1, Ordering::Relaxed);
    }
    fn on_active_device_present(&self) {
        self.active_device_present.fetch_add(1, Ordering::Relaxed);
    }
    fn on_active_device_gone(&self) {
        self.active_device_gone.fetch_add(1, Ordering::Relaxed);
    }
    fn on_audio_connected(&self) {
        self.audio_connected.fetch_add(1, Ordering::Relaxed);
    }
    fn on_audio_disconnected(&self) {
        self.audio_disconnected.fetch_add(1, Ordering::Relaxed);
    }
    fn on_unexpected_state_change(&self) {
        self.unexpected_state_change.fetch_add(1, Ordering::Relaxed);
    }
}

/// Listener that logs every notification, for the demo binary
pub struct LogListener;

impl RouteListener for LogListener {
    fn on_device_list_changed(&self) {
        info!("listener: device list changed");
    }
    fn on_active_device_present(&self) {
        info!("listener: active device present");
    }
    fn on_active_device_gone(&self) {
        info!("listener: active device gone");
    }
    fn on_audio_connected(&self) {
        info!("listener: audio connected");
    }
    fn on_audio_disconnected(&self) {
        info!("listener: audio disconnected");
    }
    fn on_unexpected_state_change(&self) {
        info!("listener: unexpected state change");
    }
}
