//! Query request serialization.
//!
//! An [`EntityQuery`] travels as a GET against its resource path with
//! OData v3 system options in the query string. Literals are written
//! according to the data type of the property they are compared with, so
//! `Customer.City eq 'Berlin'` and `OrderId eq guid'...'` come out the way
//! the service expects.

use crate::error::ProtocolResult;
use entcache_core::{DataType, EntityQuery, EntityType, MetadataStore, Operator, Predicate, Value};

/// A query ready to send: resource path plus encoded query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Resource path relative to the service root.
    pub resource: String,
    /// Encoded query string without the leading `?`. May be empty.
    pub query_string: String,
}

impl QueryRequest {
    /// Renders a query against the given catalog.
    pub fn from_query(query: &EntityQuery, metadata: &MetadataStore) -> ProtocolResult<Self> {
        let resource = query.resource(metadata)?;
        let entity_type = query.resolve_type(metadata)?;

        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(predicate) = &query.predicate {
            params.push((
                "$filter".into(),
                format_filter(predicate, metadata, entity_type),
            ));
        }
        if !query.order_by.is_empty() {
            let order = query
                .order_by
                .iter()
                .map(|o| {
                    let path = odata_path(&o.property);
                    if o.descending {
                        format!("{path} desc")
                    } else {
                        path
                    }
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("$orderby".into(), order));
        }
        if !query.expand.is_empty() {
            let expand = query
                .expand
                .iter()
                .map(|p| odata_path(p))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("$expand".into(), expand));
        }
        if let Some(skip) = query.skip {
            params.push(("$skip".into(), skip.to_string()));
        }
        if let Some(take) = query.take {
            params.push(("$top".into(), take.to_string()));
        }
        if query.inline_count {
            params.push(("$inlinecount".into(), "allpages".into()));
        }

        let mut query_string = params
            .iter()
            .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>();
        query_string.extend(query.parameters.iter().map(|(name, value)| {
            format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            )
        }));

        Ok(Self {
            resource,
            query_string: query_string.join("&"),
        })
    }

    /// Path and query relative to the service root (`Customers?$top=5`).
    pub fn path_and_query(&self) -> String {
        if self.query_string.is_empty() {
            self.resource.clone()
        } else {
            format!("{}?{}", self.resource, self.query_string)
        }
    }

    /// Absolute URL under `base`.
    pub fn url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.path_and_query())
    }
}

/// Renders a predicate as an OData `$filter` expression (unencoded).
pub fn format_filter(
    predicate: &Predicate,
    metadata: &MetadataStore,
    entity_type: &EntityType,
) -> String {
    match predicate {
        Predicate::Compare {
            property,
            operator,
            value,
        } => {
            let path = odata_path(property);
            let literal = format_literal(value, property_type(metadata, entity_type, property));
            match operator {
                Operator::Contains => format!("substringof({literal},{path}) eq true"),
                Operator::StartsWith => format!("startswith({path},{literal}) eq true"),
                Operator::EndsWith => format!("endswith({path},{literal}) eq true"),
                Operator::Eq => format!("{path} eq {literal}"),
                Operator::Ne => format!("{path} ne {literal}"),
                Operator::Lt => format!("{path} lt {literal}"),
                Operator::Le => format!("{path} le {literal}"),
                Operator::Gt => format!("{path} gt {literal}"),
                Operator::Ge => format!("{path} ge {literal}"),
            }
        }
        Predicate::And(a, b) => format!(
            "({}) and ({})",
            format_filter(a, metadata, entity_type),
            format_filter(b, metadata, entity_type)
        ),
        Predicate::Or(a, b) => format!(
            "({}) or ({})",
            format_filter(a, metadata, entity_type),
            format_filter(b, metadata, entity_type)
        ),
        Predicate::Not(inner) => format!("not ({})", format_filter(inner, metadata, entity_type)),
    }
}

/// Data type of a dotted property path, following scalar navigations.
pub fn property_type(
    metadata: &MetadataStore,
    entity_type: &EntityType,
    path: &str,
) -> Option<DataType> {
    let mut current = entity_type;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            return current.data_property(segment).map(|p| p.data_type);
        }
        let nav = current.navigation(segment).filter(|n| n.is_scalar)?;
        current = metadata.get(&nav.target_type)?;
    }
    None
}

/// Renders a literal, using the property's data type when known.
pub fn format_literal(value: &Value, data_type: Option<DataType>) -> String {
    match (value, data_type) {
        (Value::Null, _) => "null".into(),
        (Value::Bool(b), _) => b.to_string(),
        (Value::Guid(g), _) => format!("guid'{g}'"),
        (Value::Text(s), Some(DataType::Guid)) => format!("guid'{}'", quote_escape(s)),
        (Value::Text(s), Some(DataType::DateTime)) => format!("datetime'{}'", quote_escape(s)),
        (Value::Text(s), _) => format!("'{}'", quote_escape(s)),
        (Value::Integer(i), Some(DataType::Int64)) => format!("{i}L"),
        (Value::Integer(i), Some(DataType::Decimal)) => format!("{i}m"),
        (Value::Integer(i), _) => i.to_string(),
        (Value::Double(d), Some(DataType::Decimal)) => format!("{d:?}m"),
        (Value::Double(d), _) => format!("{d:?}"),
    }
}

fn quote_escape(text: &str) -> String {
    text.replace('\'', "''")
}

fn odata_path(path: &str) -> String {
    path.replace('.', "/")
}
