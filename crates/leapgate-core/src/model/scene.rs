//! Virtual button (scene) shapes.

use serde::{Deserialize, Serialize};

/// A scene as the broker models it: a virtual button on the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VirtualButton {
    #[serde(rename = "href", default)]
    pub href: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_programmed: bool,
    #[serde(default)]
    pub button_number: i32,
}

/// Body of a `/virtualbutton` read.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VirtualButtonListResponse {
    #[serde(default)]
    pub virtual_buttons: Vec<VirtualButton>,
}
