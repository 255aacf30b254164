//! Programming model and preset shapes.
//!
//! Presets are immutable once created on the broker, which is what makes
//! them safe to cache as a single composite entry. The cached form is
//! the output [`Preset`] shape, so those types derive both `Serialize`
//! and `Deserialize`; the `Href` field accepts the broker's lowercase
//! `href` spelling on the way in.

use serde::{Deserialize, Serialize};

use super::Link;

// ── Wire shapes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawProgrammingModel {
    #[serde(rename = "href", default)]
    pub href: String,
    #[serde(default)]
    pub programming_model_type: String,
    pub direction: Option<String>,
    pub preset: Option<Link>,
    pub dual_action_properties: Option<DualActionProperties>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DualActionProperties {
    pub press_preset: Link,
    pub release_preset: Link,
}

/// Body of a `/programmingmodel` read.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProgrammingModelListResponse {
    #[serde(default)]
    pub programming_models: Vec<RawProgrammingModel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPreset {
    pub preset: RawPresetInner,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPresetInner {
    #[serde(rename = "href", default)]
    pub href: String,
    pub dimmed_level_assignment: Option<Link>,
    #[serde(default)]
    pub dimmed_level_assignments: Vec<Link>,
    pub switched_level_assignment: Option<Link>,
    #[serde(default)]
    pub switched_level_assignments: Vec<Link>,
}

impl RawPresetInner {
    /// The broker uses a singular field for one assignment and a plural
    /// field for several; merge both spellings.
    pub fn all_dimmed_level_assignments(&self) -> Vec<Link> {
        let mut all = self.dimmed_level_assignments.clone();
        if let Some(single) = &self.dimmed_level_assignment {
            all.push(single.clone());
        }
        all
    }

    pub fn all_switched_level_assignments(&self) -> Vec<Link> {
        let mut all = self.switched_level_assignments.clone();
        if let Some(single) = &self.switched_level_assignment {
            all.push(single.clone());
        }
        all
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawDimmedLevelAssignment {
    pub dimmed_level_assignment: DimmedLevelAssignment,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawSwitchedLevelAssignment {
    pub switched_level_assignment: SwitchedLevelAssignment,
}

// ── Output / cached shapes ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DimmedLevelAssignment {
    #[serde(rename = "Href", alias = "href", default)]
    pub href: String,
    #[serde(default)]
    pub fade_time: String,
    #[serde(default)]
    pub delay_time: String,
    #[serde(default)]
    pub level: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwitchedLevelAssignment {
    #[serde(rename = "Href", alias = "href", default)]
    pub href: String,
    #[serde(default)]
    pub delay_time: String,
    #[serde(default)]
    pub switched_level: String,
}

/// A preset with its level assignments resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Preset {
    #[serde(rename = "Href", alias = "href", default)]
    pub href: String,
    #[serde(default)]
    pub dimmed_level_assignments: Vec<DimmedLevelAssignment>,
    #[serde(default)]
    pub switched_level_assignments: Vec<SwitchedLevelAssignment>,
}

/// A programming model joined with its preset(s). Single-action models
/// carry `preset`; dual-action models carry the press/release pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProgrammingModel {
    pub href: String,
    pub programming_model_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub press_preset: Option<Preset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_preset: Option<Preset>,
}
