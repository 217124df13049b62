//! Core data models used throughout cmdex.
//!
//! Source records mirror the relational store (commands, parameters,
//! examples, documentation sections, version mappings). Indexable units,
//! their payloads and sync records are what the synchronizer derives from
//! them; search results are what the query engine hands back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::sparse::SparseTerms;

// ============ Versions and entity types ============

/// Toolkit generation. Serialized as the bare number `3` or `4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Version {
    V3,
    V4,
}

impl Version {
    pub const ALL: [Version; 2] = [Version::V3, Version::V4];

    pub fn as_u8(self) -> u8 {
        match self {
            Version::V3 => 3,
            Version::V4 => 4,
        }
    }
}

impl TryFrom<u8> for Version {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(Version::V3),
            4 => Ok(Version::V4),
            other => Err(format!("unsupported toolkit version: {}", other)),
        }
    }
}

impl From<Version> for u8 {
    fn from(v: Version) -> u8 {
        v.as_u8()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Command,
    Parameter,
    Example,
    DocChunk,
}

impl EntityType {
    /// Tie-break rank for equal fused scores; lower sorts first.
    pub fn priority(self) -> u8 {
        match self {
            EntityType::Command => 0,
            EntityType::Example => 1,
            EntityType::Parameter => 2,
            EntityType::DocChunk => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Command => "Command",
            EntityType::Parameter => "Parameter",
            EntityType::Example => "Example",
            EntityType::DocChunk => "DocChunk",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "command" => Ok(EntityType::Command),
            "parameter" => Ok(EntityType::Parameter),
            "example" => Ok(EntityType::Example),
            "docchunk" | "doc" => Ok(EntityType::DocChunk),
            _ => Err(format!(
                "unknown entity type '{}': expected Command, Parameter, Example or DocChunk",
                s
            )),
        }
    }
}

/// Identity of a command across both id spaces: the v3 and v4 tables
/// number their rows independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandKey {
    pub version: Version,
    pub id: i64,
}

impl CommandKey {
    pub fn new(version: Version, id: i64) -> Self {
        Self { version, id }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}/{}", self.version, self.id)
    }
}

impl FromStr for CommandKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ver, id) = s
            .strip_prefix('v')
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(|| format!("invalid command key: {}", s))?;
        let version = ver
            .parse::<u8>()
            .map_err(|e| format!("invalid command key {}: {}", s, e))
            .and_then(Version::try_from)?;
        let id = id
            .parse::<i64>()
            .map_err(|e| format!("invalid command key {}: {}", s, e))?;
        Ok(Self { version, id })
    }
}

// ============ Source records (relational store) ============

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: i64,
    pub version: Version,
    pub name: String,
    pub synopsis: String,
    pub description: String,
    pub syntax: String,
    pub is_deprecated: bool,
}

impl Command {
    pub fn key(&self) -> CommandKey {
        CommandKey::new(self.version, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub id: i64,
    pub command_id: i64,
    pub name: String,
    pub type_name: Option<String>,
    pub description: String,
    pub is_required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub id: i64,
    pub command_id: i64,
    pub title: String,
    pub code: String,
    pub description: Option<String>,
}

/// A long-form documentation section. `version` is `None` for sections
/// that apply to both toolkit generations.
#[derive(Debug, Clone, PartialEq)]
pub struct DocSection {
    pub path: String,
    pub heading: String,
    pub body: String,
    pub version: Option<Version>,
}

impl DocSection {
    pub fn entity_key(&self) -> String {
        format!("doc/{}#{}", self.path, self.heading)
    }
}

/// Undirected equivalence between a v3 and a v4 command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionMapping {
    pub v3_command_id: i64,
    pub v4_command_id: i64,
}

// ============ Index payloads ============

/// Summary of the equivalent command in the other toolkit generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedCommand {
    pub command_id: i64,
    pub version: Version,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub command_id: i64,
    pub version: Version,
    pub name: String,
    pub synopsis: String,
    pub is_deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_command: Option<MappedCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterPayload {
    pub parameter_id: i64,
    pub command_id: i64,
    pub command_name: String,
    pub version: Version,
    pub name: String,
    pub is_required: bool,
    pub is_deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_command: Option<MappedCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamplePayload {
    pub example_id: i64,
    pub command_id: i64,
    pub command_name: String,
    pub version: Version,
    pub title: String,
    pub is_deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_command: Option<MappedCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocChunkPayload {
    /// Entity key of the documentation section the chunk came from.
    pub parent_id: String,
    pub path: String,
    pub heading: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    pub chunk_index: u32,
    pub chunk_total: u32,
    pub snippet: String,
}

/// Metadata stored next to each vector, one closed variant per entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entityType")]
pub enum UnitPayload {
    Command(CommandPayload),
    Parameter(ParameterPayload),
    Example(ExamplePayload),
    DocChunk(DocChunkPayload),
}

impl UnitPayload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            UnitPayload::Command(_) => EntityType::Command,
            UnitPayload::Parameter(_) => EntityType::Parameter,
            UnitPayload::Example(_) => EntityType::Example,
            UnitPayload::DocChunk(_) => EntityType::DocChunk,
        }
    }

    pub fn version(&self) -> Option<Version> {
        match self {
            UnitPayload::Command(p) => Some(p.version),
            UnitPayload::Parameter(p) => Some(p.version),
            UnitPayload::Example(p) => Some(p.version),
            UnitPayload::DocChunk(p) => p.version,
        }
    }

    /// Documentation chunks carry no deprecated flag and count as current.
    pub fn is_deprecated(&self) -> bool {
        match self {
            UnitPayload::Command(p) => p.is_deprecated,
            UnitPayload::Parameter(p) => p.is_deprecated,
            UnitPayload::Example(p) => p.is_deprecated,
            UnitPayload::DocChunk(_) => false,
        }
    }

    /// The command this unit belongs to (itself for commands).
    pub fn command_key(&self) -> Option<CommandKey> {
        match self {
            UnitPayload::Command(p) => Some(CommandKey::new(p.version, p.command_id)),
            UnitPayload::Parameter(p) => Some(CommandKey::new(p.version, p.command_id)),
            UnitPayload::Example(p) => Some(CommandKey::new(p.version, p.command_id)),
            UnitPayload::DocChunk(_) => None,
        }
    }

    pub fn mapped_command(&self) -> Option<&MappedCommand> {
        match self {
            UnitPayload::Command(p) => p.mapped_command.as_ref(),
            UnitPayload::Parameter(p) => p.mapped_command.as_ref(),
            UnitPayload::Example(p) => p.mapped_command.as_ref(),
            UnitPayload::DocChunk(_) => None,
        }
    }

    /// Key under which search results collapse: all chunks of one
    /// documentation section share it, every other unit is its own group.
    pub fn dedup_key<'a>(&'a self, unit_id: &'a str) -> &'a str {
        match self {
            UnitPayload::DocChunk(p) => &p.parent_id,
            _ => unit_id,
        }
    }

    /// Short human-readable label for CLI output.
    pub fn title(&self) -> String {
        match self {
            UnitPayload::Command(p) => p.name.clone(),
            UnitPayload::Parameter(p) => format!("{} -{}", p.command_name, p.name),
            UnitPayload::Example(p) => format!("{}: {}", p.command_name, p.title),
            UnitPayload::DocChunk(p) => format!(
                "{} / {} ({}/{})",
                p.path,
                p.heading,
                p.chunk_index + 1,
                p.chunk_total
            ),
        }
    }
}

// ============ Indexable units ============

/// The atomic thing that gets embedded and indexed.
#[derive(Debug, Clone)]
pub struct IndexableUnit {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_key: String,
    /// Command key for commands and their children, section key for chunks.
    pub parent_key: String,
    pub chunk_index: u32,
    pub chunk_total: u32,
    pub version: Option<Version>,
    pub text: String,
    pub sparse: SparseTerms,
    pub payload: UnitPayload,
    pub content_hash: String,
}

// ============ Sync bookkeeping ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Embedded,
    Indexed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Embedded => "embedded",
            SyncStatus::Indexed => "indexed",
            SyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "embedded" => Ok(SyncStatus::Embedded),
            "indexed" => Ok(SyncStatus::Indexed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status: {}", other)),
        }
    }
}

/// Sync state of one indexable unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    pub unit_id: String,
    pub entity_type: EntityType,
    pub entity_key: String,
    pub parent_key: String,
    pub chunk_index: u32,
    pub chunk_total: u32,
    pub last_hash: String,
    pub last_synced_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
}

impl SyncRecord {
    pub fn for_unit(unit: &IndexableUnit, status: SyncStatus) -> Self {
        Self {
            unit_id: unit.id.clone(),
            entity_type: unit.entity_type,
            entity_key: unit.entity_key.clone(),
            parent_key: unit.parent_key.clone(),
            chunk_index: unit.chunk_index,
            chunk_total: unit.chunk_total,
            last_hash: unit.content_hash.clone(),
            last_synced_at: Utc::now(),
            status,
            error_message: None,
        }
    }
}

// ============ Search results ============

/// A ranked search hit, request-scoped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub entity_type: EntityType,
    /// Normalized dense (semantic) score in `[0, 1]`.
    pub score: f64,
    /// Normalized sparse (keyword) score in `[0, 1]`.
    pub keyword_score: f64,
    pub fused_score: f64,
    pub payload: UnitPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<MappedCommand>,
}
