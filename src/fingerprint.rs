//! Content fingerprints for change detection.
//!
//! A unit is re-embedded only when its fingerprint differs from the hash
//! recorded at its last successful sync. The fingerprint covers everything
//! that ends up in the index for that unit: the embedded text and the
//! payload (deprecated flag, mapped equivalent, chunk position, names).

use sha2::{Digest, Sha256};

use crate::models::{EntityType, UnitPayload};

/// SHA-256 over length-prefixed, labelled fields in a fixed order.
pub fn fingerprint(entity_type: EntityType, text: &str, payload: &UnitPayload) -> String {
    // Struct fields serialize in declaration order, so this is canonical.
    let payload_json = serde_json::to_string(payload).unwrap_or_default();

    let mut hasher = Sha256::new();
    for (label, value) in [
        ("type", entity_type.as_str()),
        ("text", text),
        ("payload", payload_json.as_str()),
    ] {
        hasher.update(label.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}
