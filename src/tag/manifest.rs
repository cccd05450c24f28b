//! Extra tag manifest data presented by some registries (e.g. GCR)
//!
//! The `tags/list` response of those registries carries an additional
//! `manifest` object keyed by digest; its timestamps come as millisecond
//! strings and need normalization before they are usable.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{LstagsError, Result};

/// Raw, unprocessed manifest structure as found on the wire
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawManifest {
    #[serde(rename = "imageSizeBytes", default)]
    pub image_size_bytes: String,
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    #[serde(rename = "tag", default)]
    pub tags: Vec<String>,
    #[serde(rename = "timeCreatedMs", default)]
    pub time_created_ms: String,
    #[serde(rename = "timeUploadedMs", default)]
    pub time_uploaded_ms: String,
}

/// Normalized manifest with second-precision timestamps
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub id: String,
    pub image_size_bytes: i64,
    pub media_type: String,
    pub tags: Vec<String>,
    pub time_created: i64,
    pub time_uploaded: i64,
}

impl Manifest {
    /// Image creation time; falls back to upload time when unknown
    pub fn created(&self) -> i64 {
        if self.time_created != 0 {
            return self.time_created;
        }

        self.time_uploaded
    }
}

fn parse_ms(value: &str, what: &str) -> Result<i64> {
    if value.is_empty() {
        return Ok(0);
    }

    let ms: i64 = value
        .parse()
        .map_err(|e| LstagsError::Tag(format!("bad manifest {} '{}': {}", what, value, e)))?;

    Ok(ms / 1000)
}

/// Normalizes one raw manifest keyed by its digest id
pub fn parse(id: &str, raw: &RawManifest) -> Result<Manifest> {
    let image_size_bytes: i64 = if raw.image_size_bytes.is_empty() {
        0
    } else {
        raw.image_size_bytes.parse().map_err(|e| {
            LstagsError::Tag(format!(
                "bad manifest image size '{}': {}",
                raw.image_size_bytes, e
            ))
        })?
    };

    Ok(Manifest {
        id: id.to_string(),
        image_size_bytes,
        media_type: raw.media_type.clone(),
        tags: raw.tags.clone(),
        time_created: parse_ms(&raw.time_created_ms, "creation time")?,
        time_uploaded: parse_ms(&raw.time_uploaded_ms, "upload time")?,
    })
}

/// Re-keys digest-keyed manifests by the tag names they reference
pub fn map_by_tag(manifests: &HashMap<String, Manifest>) -> HashMap<String, Manifest> {
    let mut mapped: HashMap<String, Manifest> = HashMap::new();

    for manifest in manifests.values() {
        for tag_name in &manifest.tags {
            mapped.insert(tag_name.clone(), manifest.clone());
        }
    }

    mapped
}

/// Normalizes a whole digest-keyed raw manifest map
pub fn parse_map(raw: &HashMap<String, RawManifest>) -> Result<HashMap<String, Manifest>> {
    let mut manifests: HashMap<String, Manifest> = HashMap::new();

    for (id, raw_manifest) in raw {
        manifests.insert(id.clone(), parse(id, raw_manifest)?);
    }

    Ok(manifests)
}

/// Merges manifest maps from consecutive listing pages
pub fn merge_maps(
    mut map_a: HashMap<String, Manifest>,
    map_b: HashMap<String, Manifest>,
) -> HashMap<String, Manifest> {
    map_a.extend(map_b);

    map_a
}
