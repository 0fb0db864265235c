//! Client-side validation of entity values.

use crate::entity::EntityKey;
use crate::metadata::{AutoGeneratedKey, DataType, EntityType};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Category of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationKind {
    /// A non-nullable property has no value.
    Required,
    /// The value does not fit the declared data type.
    DataType,
    /// Text is longer than the declared maximum.
    MaxLength,
    /// Reported by the server during a save.
    Server,
    /// Added by application code.
    Custom,
}

/// A validation failure on one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Entity the error belongs to.
    pub entity_key: EntityKey,
    /// Offending property, if the error is property specific.
    pub property_name: Option<String>,
    /// Human readable description.
    pub message: String,
    /// Category.
    pub kind: ValidationKind,
}

impl ValidationError {
    /// Creates an error for a property.
    pub fn property(
        entity_key: EntityKey,
        property: impl Into<String>,
        message: impl Into<String>,
        kind: ValidationKind,
    ) -> Self {
        Self {
            entity_key,
            property_name: Some(property.into()),
            message: message.into(),
            kind,
        }
    }

    /// Creates an entity-level error.
    pub fn entity(entity_key: EntityKey, message: impl Into<String>, kind: ValidationKind) -> Self {
        Self {
            entity_key,
            property_name: None,
            message: message.into(),
            kind,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property_name {
            Some(property) => write!(f, "{}.{}: {}", self.entity_key, property, self.message),
            None => write!(f, "{}: {}", self.entity_key, self.message),
        }
    }
}

/// Checks every data property of an entity against its metadata.
///
/// Key properties generated by the server are not required while the
/// entity still carries a temporary key.
pub(crate) fn validate_values(
    entity_type: &EntityType,
    key: &EntityKey,
    values: &BTreeMap<String, Value>,
    has_temp_key: bool,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for property in &entity_type.data_properties {
        let value = values.get(&property.name).unwrap_or(&Value::Null);
        let server_generated = has_temp_key
            && entity_type.auto_generated_key == AutoGeneratedKey::Identity
            && entity_type.is_key_property(&property.name);

        if !property.is_nullable && !server_generated {
            let missing = match value {
                Value::Null => true,
                Value::Text(s) => property.data_type == DataType::String && s.is_empty(),
                _ => false,
            };
            if missing {
                errors.push(ValidationError::property(
                    key.clone(),
                    &property.name,
                    format!("{} is required", property.name),
                    ValidationKind::Required,
                ));
                continue;
            }
        }

        if !value.matches_type(property.data_type) {
            errors.push(ValidationError::property(
                key.clone(),
                &property.name,
                format!("{} must be {:?}, got {}", property.name, property.data_type, value.kind()),
                ValidationKind::DataType,
            ));
            continue;
        }

        if let (Some(max), Value::Text(s)) = (property.max_length, value) {
            let len = s.chars().count();
            if len > max {
                errors.push(ValidationError::property(
                    key.clone(),
                    &property.name,
                    format!("{} is {len} characters, maximum is {max}", property.name),
                    ValidationKind::MaxLength,
                ));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DataProperty;

    fn customer() -> EntityType {
        EntityType::new("Customer")
            .with_key(["CustomerId"])
            .with_auto_generated_key(AutoGeneratedKey::Identity)
            .with_data_property(DataProperty::new("CustomerId", DataType::Int32).not_null())
            .with_data_property(
                DataProperty::new("CompanyName", DataType::String)
                    .not_null()
                    .with_max_length(5),
            )
            .with_data_property(DataProperty::new("Rating", DataType::Int32))
    }

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn valid_entity_has_no_errors() {
        let key = EntityKey::single("Customer", 1);
        let vals = values(&[("CustomerId", 1.into()), ("CompanyName", "Acme".into())]);
        assert!(validate_values(&customer(), &key, &vals, false).is_empty());
    }

    #[test]
    fn required_and_max_length() {
        let key = EntityKey::single("Customer", 1);
        let vals = values(&[("CustomerId", 1.into()), ("CompanyName", "".into())]);
        let errors = validate_values(&customer(), &key, &vals, false);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ValidationKind::Required);

        let vals = values(&[("CustomerId", 1.into()), ("CompanyName", "Too long".into())]);
        let errors = validate_values(&customer(), &key, &vals, false);
        assert_eq!(errors[0].kind, ValidationKind::MaxLength);
        assert_eq!(errors[0].property_name.as_deref(), Some("CompanyName"));
    }

    #[test]
    fn data_type_mismatch() {
        let key = EntityKey::single("Customer", 1);
        let vals = values(&[
            ("CustomerId", 1.into()),
            ("CompanyName", "Acme".into()),
            ("Rating", "high".into()),
        ]);
        let errors = validate_values(&customer(), &key, &vals, false);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ValidationKind::DataType);
    }

    #[test]
    fn display_names_property() {
        let err = ValidationError::property(
            EntityKey::single("Customer", 1),
            "CompanyName",
            "CompanyName is required",
            ValidationKind::Required,
        );
        assert_eq!(err.to_string(), "Customer:(1).CompanyName: CompanyName is required");
    }
}
