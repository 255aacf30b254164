//! Wire and response shapes for the broker's device graph.
//!
//! The broker addresses everything by href. Raw `Raw*` types mirror the
//! broker's envelope bodies exactly; the output types are the reshaped
//! views the HTTP surface returns.

pub mod device;
pub mod preset;
pub mod scene;

pub use device::{DeviceInfo, DeviceListResponse, RawDevice, RawZoneStatus, ZoneStatusResponse};
pub use preset::{
    DimmedLevelAssignment, Preset, ProgrammingModel, ProgrammingModelListResponse,
    RawProgrammingModel, SwitchedLevelAssignment,
};
pub use scene::{VirtualButton, VirtualButtonListResponse};

use serde::{Deserialize, Serialize};

/// An href reference to another broker resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "href", default)]
    pub href: String,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}
