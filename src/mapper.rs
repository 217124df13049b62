//! Cross-version command equivalence.
//!
//! Mappings are undirected: a `(v3, v4)` pair answers lookups from
//! either side. The table is loaded once per sync run; the synchronizer
//! copies the equivalent command into each payload so queries never
//! consult it.

use std::collections::HashMap;

use crate::models::{CommandKey, Version, VersionMapping};

#[derive(Debug, Clone, Default)]
pub struct VersionMapper {
    v3_to_v4: HashMap<i64, i64>,
    v4_to_v3: HashMap<i64, i64>,
}

impl VersionMapper {
    /// Build from mapping rows. When a command appears in several rows the
    /// lowest counterpart id wins, so the result does not depend on row order.
    pub fn from_mappings(mappings: &[VersionMapping]) -> Self {
        let mut v3_to_v4: HashMap<i64, i64> = HashMap::new();
        let mut v4_to_v3: HashMap<i64, i64> = HashMap::new();
        for m in mappings {
            v3_to_v4
                .entry(m.v3_command_id)
                .and_modify(|v| *v = (*v).min(m.v4_command_id))
                .or_insert(m.v4_command_id);
            v4_to_v3
                .entry(m.v4_command_id)
                .and_modify(|v| *v = (*v).min(m.v3_command_id))
                .or_insert(m.v3_command_id);
        }
        Self { v3_to_v4, v4_to_v3 }
    }

    pub fn equivalent_of(&self, key: CommandKey) -> Option<CommandKey> {
        match key.version {
            Version::V3 => self
                .v3_to_v4
                .get(&key.id)
                .map(|id| CommandKey::new(Version::V4, *id)),
            Version::V4 => self
                .v4_to_v3
                .get(&key.id)
                .map(|id| CommandKey::new(Version::V3, *id)),
        }
    }

    pub fn len(&self) -> usize {
        self.v3_to_v4.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v3_to_v4.is_empty()
    }
}
