//! Device and zone-status shapes.

use serde::{Deserialize, Serialize};

use super::Link;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawDevice {
    #[serde(default)]
    pub fully_qualified_name: Vec<String>,
    #[serde(default)]
    pub local_zones: Vec<Link>,
    #[serde(default)]
    pub device_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawZoneStatus {
    #[serde(default)]
    pub level: i32,
    #[serde(default = "zone_link_default")]
    pub zone: Link,
}

fn zone_link_default() -> Link {
    Link::new("")
}

/// Body of a `/device` read.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceListResponse {
    #[serde(default)]
    pub devices: Vec<RawDevice>,
}

/// Body of a `/zone/status` read.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZoneStatusResponse {
    #[serde(default)]
    pub zone_statuses: Vec<RawZoneStatus>,
}

/// A device joined with its zone's current level. `level` and `zone`
/// serialize as explicit nulls for zoneless devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    pub fully_qualified_name: Vec<String>,
    pub device_type: String,
    pub level: Option<i32>,
    pub zone: Option<String>,
}
