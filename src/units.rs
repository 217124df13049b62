//! Turning source records into [`IndexableUnit`]s.
//!
//! Each builder assembles the embedded text, the payload, the sparse terms
//! and the fingerprint. Unit ids are name-based UUIDs over
//! `(entity type, entity key, chunk index)`, so the same source entity
//! always lands on the same index point.
//!
//! | Entity | Key | Text |
//! |--------|-----|------|
//! | Command | `v3/12` | `{name}: {synopsis}` / description / syntax |
//! | Parameter | `v3/p5` | `{command} -{name} [{type}]: {description}` |
//! | Example | `v3/e7` | `{command} example: {title}` / description / code |
//! | DocChunk | `doc/{path}#{heading}` | chunk of `# {heading}` + body |

use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::fingerprint::fingerprint;
use crate::models::{
    Command, CommandPayload, DocChunkPayload, DocSection, EntityType, Example, ExamplePayload,
    IndexableUnit, MappedCommand, Parameter, ParameterPayload, UnitPayload, Version,
};
use crate::sparse;

/// Namespace for unit id UUIDs.
const UNIT_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_2a7e_93d4_4b0e_8f5a_d2c3_b1e0_7a64);

const SNIPPET_CHARS: usize = 240;

pub fn unit_id(entity_type: EntityType, entity_key: &str, chunk_index: u32) -> String {
    let name = format!("{}|{}|{}", entity_type.as_str(), entity_key, chunk_index);
    Uuid::new_v5(&UNIT_NAMESPACE, name.as_bytes()).to_string()
}

pub fn parameter_key(version: Version, id: i64) -> String {
    format!("v{}/p{}", version, id)
}

pub fn example_key(version: Version, id: i64) -> String {
    format!("v{}/e{}", version, id)
}

fn join_nonempty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn command_text(command: &Command) -> String {
    let head = if command.synopsis.trim().is_empty() {
        command.name.clone()
    } else {
        format!("{}: {}", command.name, command.synopsis.trim())
    };
    join_nonempty(&[&head, &command.description, &command.syntax])
}

pub fn parameter_text(command_name: &str, parameter: &Parameter) -> String {
    let mut text = format!("{} -{}", command_name, parameter.name);
    if let Some(t) = parameter.type_name.as_deref().filter(|t| !t.trim().is_empty()) {
        text.push_str(&format!(" [{}]", t.trim()));
    }
    if !parameter.description.trim().is_empty() {
        text.push_str(": ");
        text.push_str(parameter.description.trim());
    }
    text
}

pub fn example_text(command_name: &str, example: &Example) -> String {
    let head = format!("{} example: {}", command_name, example.title);
    join_nonempty(&[
        &head,
        example.description.as_deref().unwrap_or(""),
        &example.code,
    ])
}

pub fn doc_text(section: &DocSection) -> String {
    format!("# {}\n\n{}", section.heading, section.body)
}

#[allow(clippy::too_many_arguments)]
fn finish(
    entity_type: EntityType,
    entity_key: String,
    parent_key: String,
    chunk_index: u32,
    chunk_total: u32,
    version: Option<Version>,
    text: String,
    payload: UnitPayload,
) -> IndexableUnit {
    let content_hash = fingerprint(entity_type, &text, &payload);
    IndexableUnit {
        id: unit_id(entity_type, &entity_key, chunk_index),
        entity_type,
        entity_key,
        parent_key,
        chunk_index,
        chunk_total,
        version,
        sparse: sparse::encode(&text),
        text,
        payload,
        content_hash,
    }
}

pub fn command_unit(command: &Command, mapped: Option<MappedCommand>) -> IndexableUnit {
    let key = command.key().to_string();
    let payload = UnitPayload::Command(CommandPayload {
        command_id: command.id,
        version: command.version,
        name: command.name.clone(),
        synopsis: command.synopsis.clone(),
        is_deprecated: command.is_deprecated,
        mapped_command: mapped,
    });
    finish(
        EntityType::Command,
        key.clone(),
        key,
        0,
        1,
        Some(command.version),
        command_text(command),
        payload,
    )
}

pub fn parameter_unit(
    command: &Command,
    parameter: &Parameter,
    mapped: Option<MappedCommand>,
) -> IndexableUnit {
    let payload = UnitPayload::Parameter(ParameterPayload {
        parameter_id: parameter.id,
        command_id: command.id,
        command_name: command.name.clone(),
        version: command.version,
        name: parameter.name.clone(),
        is_required: parameter.is_required,
        is_deprecated: command.is_deprecated,
        mapped_command: mapped,
    });
    finish(
        EntityType::Parameter,
        parameter_key(command.version, parameter.id),
        command.key().to_string(),
        0,
        1,
        Some(command.version),
        parameter_text(&command.name, parameter),
        payload,
    )
}

pub fn example_unit(
    command: &Command,
    example: &Example,
    mapped: Option<MappedCommand>,
) -> IndexableUnit {
    let payload = UnitPayload::Example(ExamplePayload {
        example_id: example.id,
        command_id: command.id,
        command_name: command.name.clone(),
        version: command.version,
        title: example.title.clone(),
        is_deprecated: command.is_deprecated,
        mapped_command: mapped,
    });
    finish(
        EntityType::Example,
        example_key(command.version, example.id),
        command.key().to_string(),
        0,
        1,
        Some(command.version),
        example_text(&command.name, example),
        payload,
    )
}

/// One unit per chunk of the section.
pub fn doc_units(section: &DocSection, max_chars: usize, overlap_headers: bool) -> Vec<IndexableUnit> {
    let key = section.entity_key();
    chunk_text(&doc_text(section), max_chars, overlap_headers)
        .into_iter()
        .map(|chunk| {
            let payload = UnitPayload::DocChunk(DocChunkPayload {
                parent_id: key.clone(),
                path: section.path.clone(),
                heading: section.heading.clone(),
                version: section.version,
                chunk_index: chunk.index,
                chunk_total: chunk.total,
                snippet: chunk.text.chars().take(SNIPPET_CHARS).collect(),
            });
            finish(
                EntityType::DocChunk,
                key.clone(),
                key.clone(),
                chunk.index,
                chunk.total,
                section.version,
                chunk.text,
                payload,
            )
        })
        .collect()
}
