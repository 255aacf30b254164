//! Programming model listing with the preset read-through cache.
//!
//! Presets never change once created, but fetching them is the most
//! expensive read the gateway performs: one call per preset plus one per
//! level assignment. The resolved presets are therefore cached as a
//! single composite entry keyed by [`PRESET_CACHE_KEY`]; each listing
//! fetches only the presets the cache is missing and writes the merged
//! map back, evicting entries no programming model references anymore.

use std::collections::{BTreeSet, HashMap};

use leapgate_broker::CorrelatedClient;
use tracing::debug;

use crate::error::Error;
use crate::model::preset::{RawDimmedLevelAssignment, RawPreset, RawSwitchedLevelAssignment};
use crate::model::{Preset, ProgrammingModel, ProgrammingModelListResponse};
use crate::state::StateStore;

/// Composite cache key holding every resolved preset.
pub const PRESET_CACHE_KEY: &str = "presets";

/// List every programming model with its preset(s) resolved.
pub async fn get_programming_models(
    client: &CorrelatedClient,
    store: &StateStore,
) -> Result<HashMap<String, ProgrammingModel>, Error> {
    let models: ProgrammingModelListResponse = client.read("/programmingmodel").await?;

    let mut wanted: BTreeSet<String> = BTreeSet::new();
    for model in &models.programming_models {
        if let Some(preset) = &model.preset {
            wanted.insert(preset.href.clone());
        } else if let Some(dual) = &model.dual_action_properties {
            wanted.insert(dual.press_preset.href.clone());
            wanted.insert(dual.release_preset.href.clone());
        }
    }

    // Cache hits shrink the fetch set; anything cached but no longer
    // referenced is dropped when the merged map is written back.
    let mut presets: HashMap<String, Preset> = HashMap::new();
    if let Some(cached) = store.cache_get(PRESET_CACHE_KEY) {
        let cached: HashMap<String, Preset> = serde_json::from_value(cached)
            .map_err(|e| Error::decode("cached presets", e))?;
        for (href, preset) in cached {
            if wanted.remove(&href) {
                presets.insert(href, preset);
            }
        }
    }
    debug!(
        cached = presets.len(),
        to_fetch = wanted.len(),
        "preset cache consulted"
    );

    presets.extend(fetch_presets(client, &wanted).await?);
    let encoded =
        serde_json::to_value(&presets).map_err(|e| Error::encode("cached presets", e))?;
    store.cache_set(PRESET_CACHE_KEY, encoded);

    let mut results = HashMap::new();
    for model in models.programming_models {
        let mut out = ProgrammingModel {
            href: model.href.clone(),
            programming_model_type: model.programming_model_type,
            direction: model.direction,
            preset: None,
            press_preset: None,
            release_preset: None,
        };
        if let Some(preset) = &model.preset {
            out.preset = presets.get(&preset.href).cloned();
        } else if let Some(dual) = &model.dual_action_properties {
            out.press_preset = presets.get(&dual.press_preset.href).cloned();
            out.release_preset = presets.get(&dual.release_preset.href).cloned();
        }
        results.insert(model.href, out);
    }
    Ok(results)
}

/// Batch-fetch `urls` worth of presets, then their level assignments.
async fn fetch_presets(
    client: &CorrelatedClient,
    urls: &BTreeSet<String>,
) -> Result<HashMap<String, Preset>, Error> {
    let raw_presets: HashMap<String, RawPreset> = client.read_many(urls).await?;

    let mut dimmed_urls = BTreeSet::new();
    let mut switched_urls = BTreeSet::new();
    for raw in raw_presets.values() {
        for link in raw.preset.all_dimmed_level_assignments() {
            dimmed_urls.insert(link.href);
        }
        for link in raw.preset.all_switched_level_assignments() {
            switched_urls.insert(link.href);
        }
    }

    let dimmed: HashMap<String, RawDimmedLevelAssignment> = client.read_many(&dimmed_urls).await?;
    let switched: HashMap<String, RawSwitchedLevelAssignment> =
        client.read_many(&switched_urls).await?;

    let mut results = HashMap::new();
    for (url, raw) in raw_presets {
        let dimmed_assignments = raw
            .preset
            .all_dimmed_level_assignments()
            .into_iter()
            .filter_map(|link| dimmed.get(&link.href))
            .map(|raw| raw.dimmed_level_assignment.clone())
            .collect();
        let switched_assignments = raw
            .preset
            .all_switched_level_assignments()
            .into_iter()
            .filter_map(|link| switched.get(&link.href))
            .map(|raw| raw.switched_level_assignment.clone())
            .collect();
        results.insert(
            url,
            Preset {
                href: raw.preset.href,
                dimmed_level_assignments: dimmed_assignments,
                switched_level_assignments: switched_assignments,
            },
        );
    }
    Ok(results)
}
