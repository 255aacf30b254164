//! Device operations executed over a live broker session.
//!
//! Each operation takes the session's [`CorrelatedClient`] (and the
//! [`StateStore`] where it caches); acquiring the session and persisting
//! afterwards are the caller's responsibility.
//!
//! [`CorrelatedClient`]: leapgate_broker::CorrelatedClient
//! [`StateStore`]: crate::StateStore

pub mod commands;
pub mod devices;
pub mod programming;
pub mod scenes;

pub use commands::{ZoneCommand, all_off, press_and_release, send_zone_command};
pub use devices::get_devices;
pub use programming::{PRESET_CACHE_KEY, get_programming_models};
pub use scenes::{activate_scene, activate_scene_by_name, get_scenes};
