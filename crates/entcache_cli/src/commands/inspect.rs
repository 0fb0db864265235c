//! Inspect command implementation.

use super::{load_metadata, CliError};
use entcache_core::{EntityType, MetadataStore};
use serde::Serialize;
use std::path::Path;

/// Catalog inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Metadata file path.
    pub path: String,
    /// Number of entity types.
    pub entity_type_count: usize,
    /// One summary per entity type, sorted by name.
    pub entity_types: Vec<TypeSummary>,
}

/// Summary of a single entity type.
#[derive(Debug, Serialize)]
pub struct TypeSummary {
    /// Type name.
    pub name: String,
    /// Resource the type is queried from.
    pub resource: String,
    /// Key property names.
    pub keys: Vec<String>,
    /// Key generation mode.
    pub key_generation: String,
    /// Number of data properties.
    pub data_property_count: usize,
    /// Navigations as `Name -> Target` or `Name -> Target[*]`.
    pub navigations: Vec<String>,
    /// Concurrency token property names.
    pub concurrency_tokens: Vec<String>,
}

impl TypeSummary {
    fn new(entity_type: &EntityType) -> Self {
        Self {
            name: entity_type.name.clone(),
            resource: entity_type.resource_name().to_string(),
            keys: entity_type.key_names.clone(),
            key_generation: format!("{:?}", entity_type.auto_generated_key),
            data_property_count: entity_type.data_properties.len(),
            navigations: entity_type
                .navigation_properties
                .iter()
                .map(|nav| {
                    let arity = if nav.is_scalar { "" } else { "[*]" };
                    format!("{} -> {}{arity}", nav.name, nav.target_type)
                })
                .collect(),
            concurrency_tokens: entity_type
                .concurrency_properties()
                .map(|p| p.name.clone())
                .collect(),
        }
    }
}

/// Builds the inspection result for a loaded catalog.
pub fn inspect(path: &Path, metadata: &MetadataStore) -> InspectResult {
    let mut entity_types: Vec<TypeSummary> =
        metadata.entity_types().map(TypeSummary::new).collect();
    entity_types.sort_by(|a, b| a.name.cmp(&b.name));
    InspectResult {
        path: path.display().to_string(),
        entity_type_count: entity_types.len(),
        entity_types,
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect_file(path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Catalog: {}", result.path);
    println!("Entity types: {}", result.entity_type_count);
    for summary in &result.entity_types {
        println!();
        println!("{} ({})", summary.name, summary.resource);
        println!("  Key:        {} [{}]", summary.keys.join(", "), summary.key_generation);
        println!("  Properties: {}", summary.data_property_count);
        if !summary.navigations.is_empty() {
            println!("  Navigation: {}", summary.navigations.join(", "));
        }
        if !summary.concurrency_tokens.is_empty() {
            println!("  Tokens:     {}", summary.concurrency_tokens.join(", "));
        }
    }
}

/// Loads and inspects a catalog file.
pub fn inspect_file(path: &Path) -> Result<InspectResult, CliError> {
    let metadata = load_metadata(path)?;
    tracing::debug!(types = metadata.len(), "loaded metadata");
    Ok(inspect(path, &metadata))
}
