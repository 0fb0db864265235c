//! Entity key.

use crate::value::KeyValue;
use std::fmt;

/// Identity of an entity: its type name plus ordered key values.
///
/// Keys are immutable and compare structurally. Composite keys compare
/// every part in declared key order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    entity_type: String,
    values: Vec<KeyValue>,
}

impl EntityKey {
    /// Creates a key.
    pub fn new(entity_type: impl Into<String>, values: Vec<KeyValue>) -> Self {
        Self {
            entity_type: entity_type.into(),
            values,
        }
    }

    /// Creates a single-part key.
    pub fn single(entity_type: impl Into<String>, value: impl Into<KeyValue>) -> Self {
        Self::new(entity_type, vec![value.into()])
    }

    /// Entity type name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Key values in declared key order.
    pub fn values(&self) -> &[KeyValue] {
        &self.values
    }

    /// Returns true if this is a client-generated temporary integer key.
    pub fn is_negative_integer(&self) -> bool {
        matches!(self.values.as_slice(), [KeyValue::Integer(i)] if *i < 0)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:(", self.entity_type)?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn display_single_and_composite() {
        assert_eq!(EntityKey::single("Customer", 1).to_string(), "Customer:(1)");
        let key = EntityKey::new("OrderDetail", vec![10.into(), 3.into()]);
        assert_eq!(key.to_string(), "OrderDetail:(10,3)");
    }

    #[test]
    fn structural_equality() {
        let a = EntityKey::new("OrderDetail", vec![10.into(), 3.into()]);
        let b = EntityKey::new("OrderDetail", vec![KeyValue::Integer(10), KeyValue::Integer(3)]);
        let c = EntityKey::new("OrderDetail", vec![3.into(), 10.into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn type_is_part_of_identity() {
        assert_ne!(EntityKey::single("Order", 1), EntityKey::single("Customer", 1));
    }
}
