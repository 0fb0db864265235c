//! Entity type descriptions.

use serde::{Deserialize, Serialize};

/// Primitive type of a data property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// UTF-8 text.
    String,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Double precision float.
    Double,
    /// Decimal, carried as a double on the client.
    Decimal,
    /// Boolean.
    Boolean,
    /// Date/time, carried as ISO-8601 text.
    DateTime,
    /// GUID.
    Guid,
}

impl DataType {
    /// Returns true if values of this type can form an entity key.
    pub fn is_key_compatible(self) -> bool {
        matches!(
            self,
            DataType::String | DataType::Int32 | DataType::Int64 | DataType::Guid
        )
    }

    /// Returns true for integer types.
    pub fn is_integer(self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    /// Returns true if a foreign key of type `self` can reference a key of type `other`.
    pub fn is_compatible_with(self, other: DataType) -> bool {
        self == other || (self.is_integer() && other.is_integer())
    }
}

/// How the key of a new entity is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoGeneratedKey {
    /// The caller always supplies the key.
    #[default]
    None,
    /// The server assigns the key on insert; the client uses a temporary key until then.
    Identity,
    /// The client generates the key and the server may replace it.
    KeyGenerator,
}

/// A scalar property of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProperty {
    /// Property name.
    pub name: String,
    /// Primitive type.
    pub data_type: DataType,
    /// Whether null is a legal value.
    #[serde(default = "default_nullable")]
    pub is_nullable: bool,
    /// Maximum text length, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Whether the server uses this property for optimistic concurrency.
    #[serde(default)]
    pub is_concurrency_token: bool,
}

fn default_nullable() -> bool {
    true
}

impl DataProperty {
    /// Creates a nullable data property.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_nullable: true,
            max_length: None,
            is_concurrency_token: false,
        }
    }

    /// Marks the property as required.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Sets the maximum text length.
    #[must_use]
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Marks the property as a concurrency token.
    #[must_use]
    pub fn concurrency_token(mut self) -> Self {
        self.is_concurrency_token = true;
        self
    }
}

/// A property that references related entities.
///
/// Scalar navigations own their foreign keys. Collection navigations are
/// the inverse side of a scalar navigation declared on the target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationProperty {
    /// Property name.
    pub name: String,
    /// Name of the related entity type.
    pub target_type: String,
    /// True for a single reference, false for a collection.
    pub is_scalar: bool,
    /// Foreign key properties on this type (scalar navigations only),
    /// in the order of the target's key properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_key_names: Vec<String>,
    /// Name of the paired navigation on the target type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

impl NavigationProperty {
    /// Creates a scalar navigation backed by the given foreign keys.
    pub fn scalar<I, S>(
        name: impl Into<String>,
        target_type: impl Into<String>,
        foreign_keys: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            target_type: target_type.into(),
            is_scalar: true,
            foreign_key_names: foreign_keys.into_iter().map(Into::into).collect(),
            inverse: None,
        }
    }

    /// Creates a collection navigation whose inverse is a scalar navigation on the target.
    pub fn collection(
        name: impl Into<String>,
        target_type: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target_type: target_type.into(),
            is_scalar: false,
            foreign_key_names: Vec::new(),
            inverse: Some(inverse.into()),
        }
    }

    /// Sets the inverse navigation.
    #[must_use]
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }
}

/// Metadata describing one kind of entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    /// Short type name (no namespace).
    pub name: String,
    /// Resource path queried for this type. Defaults to the type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    /// Key property names, in key order.
    pub key_names: Vec<String>,
    /// Data properties.
    #[serde(default)]
    pub data_properties: Vec<DataProperty>,
    /// Navigation properties.
    #[serde(default)]
    pub navigation_properties: Vec<NavigationProperty>,
    /// Key generation mode.
    #[serde(default)]
    pub auto_generated_key: AutoGeneratedKey,
}

impl EntityType {
    /// Creates an entity type with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_name: None,
            key_names: Vec::new(),
            data_properties: Vec::new(),
            navigation_properties: Vec::new(),
            auto_generated_key: AutoGeneratedKey::None,
        }
    }

    /// Sets the key property names.
    #[must_use]
    pub fn with_key<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the resource name.
    #[must_use]
    pub fn with_resource_name(mut self, resource: impl Into<String>) -> Self {
        self.resource_name = Some(resource.into());
        self
    }

    /// Adds a data property.
    #[must_use]
    pub fn with_data_property(mut self, property: DataProperty) -> Self {
        self.data_properties.push(property);
        self
    }

    /// Adds a navigation property.
    #[must_use]
    pub fn with_navigation(mut self, navigation: NavigationProperty) -> Self {
        self.navigation_properties.push(navigation);
        self
    }

    /// Sets the key generation mode.
    #[must_use]
    pub fn with_auto_generated_key(mut self, mode: AutoGeneratedKey) -> Self {
        self.auto_generated_key = mode;
        self
    }

    /// Resource path for queries against this type.
    pub fn resource_name(&self) -> &str {
        self.resource_name.as_deref().unwrap_or(&self.name)
    }

    /// Looks up a data property.
    pub fn data_property(&self, name: &str) -> Option<&DataProperty> {
        self.data_properties.iter().find(|p| p.name == name)
    }

    /// Looks up a navigation property.
    pub fn navigation(&self, name: &str) -> Option<&NavigationProperty> {
        self.navigation_properties.iter().find(|n| n.name == name)
    }

    /// Returns true if `name` is one of the key properties.
    pub fn is_key_property(&self, name: &str) -> bool {
        self.key_names.iter().any(|k| k == name)
    }

    /// Key properties in key order.
    pub fn key_properties(&self) -> impl Iterator<Item = &DataProperty> {
        self.key_names.iter().filter_map(|k| self.data_property(k))
    }

    /// Scalar navigations on this type.
    pub fn scalar_navigations(&self) -> impl Iterator<Item = &NavigationProperty> {
        self.navigation_properties.iter().filter(|n| n.is_scalar)
    }

    /// Scalar navigations whose foreign keys include `property`.
    pub fn navigations_for_foreign_key<'a>(
        &'a self,
        property: &'a str,
    ) -> impl Iterator<Item = &'a NavigationProperty> + 'a {
        self.scalar_navigations()
            .filter(move |n| n.foreign_key_names.iter().any(|fk| fk == property))
    }

    /// Properties the server checks for optimistic concurrency.
    pub fn concurrency_properties(&self) -> impl Iterator<Item = &DataProperty> {
        self.data_properties.iter().filter(|p| p.is_concurrency_token)
    }
}
