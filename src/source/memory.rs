//! In-memory [`SourceStore`] for tests and demos.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Page, SourceStore};
use crate::error::Result;
use crate::models::{Command, CommandKey, DocSection, Example, Parameter, Version, VersionMapping};

#[derive(Default)]
struct Tables {
    commands: Vec<Command>,
    /// Parameters and examples are tagged with their command's version.
    parameters: Vec<(Version, Parameter)>,
    examples: Vec<(Version, Example)>,
    doc_sections: Vec<DocSection>,
    mappings: Vec<VersionMapping>,
}

#[derive(Default)]
pub struct MemorySource {
    tables: RwLock<Tables>,
}

fn window<T: Clone>(items: &[T], page: Page) -> Vec<T> {
    items
        .iter()
        .skip(page.offset)
        .take(page.limit)
        .cloned()
        .collect()
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a command by key.
    pub async fn put_command(&self, command: Command) {
        let mut t = self.tables.write().await;
        t.commands.retain(|c| c.key() != command.key());
        t.commands.push(command);
    }

    /// Remove a command together with its parameters and examples.
    pub async fn remove_command(&self, key: CommandKey) {
        let mut t = self.tables.write().await;
        t.commands.retain(|c| c.key() != key);
        t.parameters
            .retain(|(v, p)| !(*v == key.version && p.command_id == key.id));
        t.examples
            .retain(|(v, e)| !(*v == key.version && e.command_id == key.id));
    }

    pub async fn put_parameter(&self, version: Version, parameter: Parameter) {
        let mut t = self.tables.write().await;
        t.parameters
            .retain(|(v, p)| !(*v == version && p.id == parameter.id));
        t.parameters.push((version, parameter));
    }

    pub async fn put_example(&self, version: Version, example: Example) {
        let mut t = self.tables.write().await;
        t.examples
            .retain(|(v, e)| !(*v == version && e.id == example.id));
        t.examples.push((version, example));
    }

    /// Insert or replace a documentation section by path and heading.
    pub async fn put_doc_section(&self, section: DocSection) {
        let mut t = self.tables.write().await;
        t.doc_sections
            .retain(|d| !(d.path == section.path && d.heading == section.heading));
        t.doc_sections.push(section);
    }

    pub async fn remove_doc_section(&self, path: &str, heading: &str) {
        let mut t = self.tables.write().await;
        t.doc_sections
            .retain(|d| !(d.path == path && d.heading == heading));
    }

    pub async fn put_mapping(&self, mapping: VersionMapping) {
        let mut t = self.tables.write().await;
        if !t.mappings.contains(&mapping) {
            t.mappings.push(mapping);
        }
    }

    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn list_commands(&self, version: Version, page: Page) -> Result<Vec<Command>> {
        let t = self.tables.read().await;
        let mut commands: Vec<Command> = t
            .commands
            .iter()
            .filter(|c| c.version == version)
            .cloned()
            .collect();
        commands.sort_by_key(|c| c.id);
        Ok(window(&commands, page))
    }

    async fn list_parameters(&self, command: CommandKey) -> Result<Vec<Parameter>> {
        let t = self.tables.read().await;
        let mut params: Vec<Parameter> = t
            .parameters
            .iter()
            .filter(|(v, p)| *v == command.version && p.command_id == command.id)
            .map(|(_, p)| p.clone())
            .collect();
        params.sort_by_key(|p| p.id);
        Ok(params)
    }

    async fn list_examples(&self, command: CommandKey) -> Result<Vec<Example>> {
        let t = self.tables.read().await;
        let mut examples: Vec<Example> = t
            .examples
            .iter()
            .filter(|(v, e)| *v == command.version && e.command_id == command.id)
            .map(|(_, e)| e.clone())
            .collect();
        examples.sort_by_key(|e| e.id);
        Ok(examples)
    }

    async fn list_doc_sections(&self, page: Page) -> Result<Vec<DocSection>> {
        let t = self.tables.read().await;
        let mut sections = t.doc_sections.clone();
        sections.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.heading.cmp(&b.heading)));
        Ok(window(&sections, page))
    }

    async fn list_version_mappings(&self) -> Result<Vec<VersionMapping>> {
        Ok(self.tables.read().await.mappings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(version: Version, id: i64) -> Command {
        Command {
            id,
            version,
            name: format!("Cmd-{}", id),
            synopsis: String::new(),
            description: String::new(),
            syntax: String::new(),
            is_deprecated: false,
        }
    }

    #[tokio::test]
    async fn test_commands_are_paged_per_version() {
        let source = MemorySource::new();
        for id in (1..=5).rev() {
            source.put_command(command(Version::V3, id)).await;
        }
        source.put_command(command(Version::V4, 1)).await;

        let first = source.list_commands(Version::V3, Page::first(2)).await.unwrap();
        assert_eq!(first.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);
        let third = source
            .list_commands(Version::V3, Page::first(2).next().next())
            .await
            .unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(source.list_commands(Version::V4, Page::first(10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_command_cascades() {
        let source = MemorySource::new();
        source.put_command(command(Version::V3, 1)).await;
        source
            .put_parameter(
                Version::V3,
                Parameter {
                    id: 10,
                    command_id: 1,
                    name: "Force".into(),
                    type_name: None,
                    description: String::new(),
                    is_required: false,
                },
            )
            .await;
        let key = CommandKey::new(Version::V3, 1);
        assert_eq!(source.list_parameters(key).await.unwrap().len(), 1);
        source.remove_command(key).await;
        assert!(source.list_parameters(key).await.unwrap().is_empty());
    }
}
