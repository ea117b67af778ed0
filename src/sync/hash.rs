//! Content hashing for baseline snapshots.
//!
//! A snapshot entry stores the SHA256 of its serialized properties so a
//! tampered or truncated baseline file is detected on load.

use sha2::{Digest, Sha256};

use crate::model::PropertyMap;

/// SHA256 of the canonical JSON form of a property map.
///
/// `PropertyMap` is ordered by name and values are normalized before
/// hashing, so equivalent maps hash the same.
#[must_use]
pub fn content_hash(properties: &PropertyMap) -> String {
    let normalized: PropertyMap = properties
        .iter()
        .map(|(k, v)| (k.clone(), v.normalized()))
        .collect();
    // PropertyValue serialization is infallible: no maps with non-string keys.
    let json = serde_json::to_string(&normalized).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether `current` differs from a stored hash. No stored hash counts as changed.
#[must_use]
pub fn has_changed(current_hash: &str, stored_hash: Option<&str>) -> bool {
    stored_hash.is_none_or(|h| h != current_hash)
}
