//! Route state machine - who carries call audio, and in what state
//!
//! The actor processes all routing events sequentially: connect and
//! disconnect requests from the call-routing layer, device and audio
//! events from the bridge, and its own timeout/retry timers. The handle
//! and manager wrap it behind a channel-based API.

mod actor;
mod actor_handle;
mod commands;
mod manager;
mod types;


pub use actor::MAX_CONNECTION_RETRIES;
pub use actor_handle::RouteHandle;
pub use manager::RouteManager;
pub use types::{
    ActiveDeviceCache, PresenceChange, RouteState, AUDIO_OFF_STATE_NAME,
    CONNECTED_STATE_NAME_PREFIX, CONNECTING_STATE_NAME_PREFIX,
};

pub(crate) use commands::next_session;
