//! Zone and button commands.
//!
//! Commands are `CreateRequest`s against a resource's `commandprocessor`
//! endpoint. Input validation happens here so the HTTP layer can map
//! [`Error::InvalidCommand`] straight to a 400.

use leapgate_broker::CorrelatedClient;
use serde_json::json;
use tracing::{debug, info};

use crate::error::Error;
use crate::model::DeviceInfo;
use crate::ops::devices::get_devices;

/// A validated zone command, ready to serialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneCommand {
    GoToLevel { level: u8 },
    GoToDimmedLevel { level: u8 },
    GoToSwitchedLevel { level: u8 },
    Raise,
    Lower,
    Stop,
}

impl ZoneCommand {
    /// Parse a command from its query-string form. `Raise`, `Lower`,
    /// and `Stop` take no level; everything else requires one in 0–100.
    pub fn parse(command_type: &str, level: Option<&str>) -> Result<Self, Error> {
        match command_type {
            "Raise" => return Ok(Self::Raise),
            "Lower" => return Ok(Self::Lower),
            "Stop" => return Ok(Self::Stop),
            _ => {}
        }

        let level = level
            .unwrap_or_default()
            .parse::<u8>()
            .ok()
            .filter(|level| *level <= 100)
            .ok_or_else(|| Error::invalid_command("level must be an integer in 0-100"))?;

        match command_type {
            "GoToLevel" => Ok(Self::GoToLevel { level }),
            "GoToDimmedLevel" => Ok(Self::GoToDimmedLevel { level }),
            "GoToSwitchedLevel" => Ok(Self::GoToSwitchedLevel { level }),
            other => Err(Error::invalid_command(format!(
                "unknown command type: {other}"
            ))),
        }
    }

    /// The `commandprocessor` request body.
    pub fn body(&self) -> serde_json::Value {
        let command = match self {
            Self::GoToLevel { level } => json!({
                "CommandType": "GoToLevel",
                "Parameter": { "Type": "Level", "Value": level },
            }),
            Self::GoToDimmedLevel { level } => json!({
                "CommandType": "GoToDimmedLevel",
                "DimmedLevelParameters": { "Level": level },
            }),
            Self::GoToSwitchedLevel { level } => json!({
                "CommandType": "GoToSwitchedLevel",
                "SwitchedLevelParameters": {
                    "SwitchedLevel": if *level == 0 { "Off" } else { "On" },
                },
            }),
            Self::Raise => json!({ "CommandType": "Raise" }),
            Self::Lower => json!({ "CommandType": "Lower" }),
            Self::Stop => json!({ "CommandType": "Stop" }),
        };
        json!({ "Command": command })
    }
}

/// Send `command` to a zone identified by its numeric id.
pub async fn send_zone_command(
    client: &CorrelatedClient,
    zone: &str,
    command: &ZoneCommand,
) -> Result<(), Error> {
    require_numeric("zone", zone)?;
    info!(zone, command = ?command, "sending zone command");
    client
        .create(&format!("/zone/{zone}/commandprocessor"), command.body())
        .await?;
    Ok(())
}

/// Press-and-release a physical button by its numeric id.
pub async fn press_and_release(client: &CorrelatedClient, button: &str) -> Result<(), Error> {
    require_numeric("button", button)?;
    info!(button, "sending press-and-release");
    client
        .create(
            &format!("/button/{button}/commandprocessor"),
            press_and_release_body(),
        )
        .await?;
    Ok(())
}

/// Turn every controllable zone off.
///
/// Shades (`QsWirelessShade`) and zoneless devices are left alone;
/// `WallSwitch` devices take a switched `Off`, everything else a dimmed
/// level of zero.
pub async fn all_off(client: &CorrelatedClient) -> Result<(), Error> {
    let devices = get_devices(client).await?;
    for device in devices {
        let Some(command) = all_off_command(&device) else {
            continue;
        };
        let zone = device.zone.unwrap_or_default();
        debug!(zone, device_type = device.device_type, "all-off command");
        client
            .create(&format!("{zone}/commandprocessor"), command.body())
            .await?;
    }
    Ok(())
}

fn all_off_command(device: &DeviceInfo) -> Option<ZoneCommand> {
    if device.zone.as_deref().unwrap_or_default().is_empty() {
        return None;
    }
    if device.device_type == "QsWirelessShade" {
        return None;
    }
    if device.device_type == "WallSwitch" {
        Some(ZoneCommand::GoToSwitchedLevel { level: 0 })
    } else {
        Some(ZoneCommand::GoToDimmedLevel { level: 0 })
    }
}

pub(crate) fn press_and_release_body() -> serde_json::Value {
    json!({ "Command": { "CommandType": "PressAndRelease" } })
}

fn require_numeric(what: &str, value: &str) -> Result<(), Error> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid_command(format!("invalid {what}: {value:?}")));
    }
    Ok(())
}
