//! Device listing: `/device` joined with `/zone/status`.

use std::collections::HashMap;

use leapgate_broker::CorrelatedClient;
use tracing::debug;

use crate::error::Error;
use crate::model::{DeviceInfo, DeviceListResponse, RawZoneStatus, ZoneStatusResponse};

/// List every device, attaching the current level of its local zone
/// where one is reported.
pub async fn get_devices(client: &CorrelatedClient) -> Result<Vec<DeviceInfo>, Error> {
    let devices: DeviceListResponse = client.read("/device").await?;
    let zones: ZoneStatusResponse = client.read("/zone/status").await?;

    let by_zone: HashMap<&str, &RawZoneStatus> = zones
        .zone_statuses
        .iter()
        .map(|status| (status.zone.href.as_str(), status))
        .collect();

    let joined = devices
        .devices
        .into_iter()
        .map(|device| {
            let mut info = DeviceInfo {
                fully_qualified_name: device.fully_qualified_name,
                device_type: device.device_type,
                level: None,
                zone: None,
            };
            for zone in &device.local_zones {
                if let Some(status) = by_zone.get(zone.href.as_str()) {
                    info.level = Some(status.level);
                    info.zone = Some(zone.href.clone());
                }
            }
            info
        })
        .collect::<Vec<_>>();

    debug!(devices = joined.len(), "device listing complete");
    Ok(joined)
}
