//! Verify command implementation.

use super::{read_file, CliError};
use entcache_core::{AutoGeneratedKey, MetadataStore};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of entity types checked.
    pub types_checked: usize,
    /// Problems that make the catalog unusable.
    pub errors: Vec<String>,
    /// Legal declarations that are probably mistakes.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks a metadata document.
pub fn verify(text: &str) -> VerifyResult {
    let mut result = VerifyResult::default();

    let document: serde_json::Value = match serde_json::from_str(text) {
        Ok(document) => document,
        Err(e) => {
            result.errors.push(format!("not valid JSON: {e}"));
            return result;
        }
    };
    let metadata = match MetadataStore::from_value(document) {
        Ok(metadata) => metadata,
        Err(e) => {
            result.errors.push(e.to_string());
            return result;
        }
    };

    let mut types: Vec<_> = metadata.entity_types().collect();
    types.sort_by(|a, b| a.name.cmp(&b.name));
    for entity_type in types {
        result.types_checked += 1;
        let name = &entity_type.name;

        if entity_type.resource_name.is_none() {
            result
                .warnings
                .push(format!("{name}: no resourceName, queries go to '{name}'"));
        }
        if entity_type.auto_generated_key == AutoGeneratedKey::Identity {
            for key in entity_type.key_properties() {
                if !key.data_type.is_integer() {
                    result.warnings.push(format!(
                        "{name}.{}: identity key is {:?}, not an integer",
                        key.name, key.data_type
                    ));
                }
            }
        }
        for nav in entity_type.scalar_navigations() {
            if nav.inverse.is_none() {
                result.warnings.push(format!(
                    "{name}.{}: no inverse, {} will not list {name} entities",
                    nav.name, nav.target_type
                ));
            }
        }
    }
    result
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying catalog at {:?}", path);
    println!();

    let result = verify_file(path)?;
    print_result(&result);

    if result.is_ok() {
        Ok(())
    } else {
        Err(format!("verification failed with {} error(s)", result.errors.len()).into())
    }
}

fn print_result(result: &VerifyResult) {
    println!("  Entity types checked: {}", result.types_checked);
    for error in &result.errors {
        println!("  ERROR: {error}");
    }
    for warning in &result.warnings {
        println!("  WARN:  {warning}");
    }
    if result.is_ok() {
        println!("  Status: OK");
    } else {
        println!("  Status: FAILED");
    }
}

/// Reads and checks a catalog file.
pub fn verify_file(path: &Path) -> Result<VerifyResult, CliError> {
    Ok(verify(&read_file(path)?))
}
