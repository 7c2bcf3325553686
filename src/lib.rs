//! btroute - Bluetooth call-audio route coordination
//!
//! Decides which Bluetooth peripheral (hands-free or hearing aid) carries
//! call audio, drives the asynchronous connect/disconnect handshake with
//! it, retries failed attempts with bounded backoff, times out stuck
//! attempts, and reconciles its own state with whatever the hardware
//! actually reports.
//!
//! The core pieces:
//! - [`registry::DeviceRegistry`] tracks connected peripherals per profile
//!   and talks to the profile proxies.
//! - [`route::RouteManager`] wraps the routing state machine, a sequential
//!   actor processing one ordered command queue.
//! - [`bridge::EventBridge`] turns raw stack events into registry updates
//!   and route commands.

pub mod bridge;
pub mod config;
pub mod device;
pub mod listener;
pub mod profile;
pub mod registry;
pub mod route;
pub mod sim;

pub use bridge::{EventBridge, EventBridgeHandle, ExternalEvent};
pub use config::{ConfigError, RouteConfig};
pub use device::{AudioState, ConnectionState, Device, ProfileType};
pub use listener::{NullListener, RouteListener};
pub use registry::DeviceRegistry;
pub use route::{RouteHandle, RouteManager, RouteState};
