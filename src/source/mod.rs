//! Read-only access to the relational store of command documentation.
//!
//! The [`SourceStore`] trait is all the synchronizer knows about where
//! commands, parameters, examples, documentation sections and version
//! mappings live. Large tables are read in pages.
//!
//! Backends:
//! - [`SqliteSource`]: sqlx over the `commands`, `parameters`,
//!   `examples`, `doc_sections` and `version_mappings` tables
//! - [`MemorySource`]: in-process vectors, mutable, for tests and demos

pub mod memory;
pub mod sqlite;

pub use memory::MemorySource;
pub use sqlite::SqliteSource;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Command, CommandKey, DocSection, Example, Parameter, Version, VersionMapping};

/// A window into an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self {
            offset: 0,
            limit: limit.max(1),
        }
    }

    pub fn next(self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Commands of one version ordered by id.
    async fn list_commands(&self, version: Version, page: Page) -> Result<Vec<Command>>;

    /// Parameters of a command ordered by id.
    async fn list_parameters(&self, command: CommandKey) -> Result<Vec<Parameter>>;

    /// Examples of a command ordered by id.
    async fn list_examples(&self, command: CommandKey) -> Result<Vec<Example>>;

    /// Documentation sections ordered by path, then heading.
    async fn list_doc_sections(&self, page: Page) -> Result<Vec<DocSection>>;

    async fn list_version_mappings(&self) -> Result<Vec<VersionMapping>>;
}
