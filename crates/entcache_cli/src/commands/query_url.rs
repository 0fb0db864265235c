//! Query-url command implementation.
//!
//! Builds an [`EntityQuery`] from command-line clauses and prints the
//! request the client would send for it. Clause values are typed from
//! the catalog, so `OrderId eq 10` renders as an Int64 literal when the
//! property is declared that way.

use super::{load_metadata, CliError};
use entcache_core::{DataType, EntityQuery, EntityType, MetadataStore, Operator, Predicate, Value};
use entcache_protocol::{property_type, QueryRequest};
use serde_json::Value as JsonValue;
use std::path::Path;

/// Query shape collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    /// Resource or entity type name.
    pub from: String,
    /// `<property> <operator> <value>` clauses, and-ed together.
    pub filters: Vec<String>,
    /// `<property>` or `<property> desc`.
    pub order_by: Vec<String>,
    /// Navigation paths to expand.
    pub expand: Vec<String>,
    /// Rows to skip.
    pub skip: Option<usize>,
    /// Row limit.
    pub top: Option<usize>,
    /// Whether to request the total count.
    pub inline_count: bool,
}

/// Builds the query described by `args`.
pub fn build_query(args: &QueryArgs, metadata: &MetadataStore) -> Result<EntityQuery, CliError> {
    let mut query = EntityQuery::from(args.from.as_str());
    let entity_type = query.resolve_type(metadata)?;

    let mut predicate: Option<Predicate> = None;
    for clause in &args.filters {
        let next = parse_clause(clause, metadata, entity_type)?;
        predicate = Some(match predicate {
            Some(current) => current.and(next),
            None => next,
        });
    }
    if let Some(predicate) = predicate {
        query = query.filter(predicate);
    }

    for clause in &args.order_by {
        let mut parts = clause.split_whitespace();
        let property = parts
            .next()
            .ok_or_else(|| CliError::InvalidClause(clause.clone()))?;
        query = match parts.next() {
            Some(dir) if dir.eq_ignore_ascii_case("desc") => query.order_by_desc(property),
            Some(dir) if dir.eq_ignore_ascii_case("asc") => query.order_by(property),
            None => query.order_by(property),
            Some(_) => return Err(CliError::InvalidClause(clause.clone())),
        };
    }
    for path in &args.expand {
        query = query.expand(path.as_str());
    }
    if let Some(skip) = args.skip {
        query = query.skip(skip);
    }
    if let Some(top) = args.top {
        query = query.take(top);
    }
    if args.inline_count {
        query = query.with_inline_count();
    }
    Ok(query)
}

/// Parses `<property> <operator> <value>` into a comparison.
pub fn parse_clause(
    clause: &str,
    metadata: &MetadataStore,
    entity_type: &EntityType,
) -> Result<Predicate, CliError> {
    let mut parts = clause.trim().splitn(3, char::is_whitespace);
    let (Some(property), Some(token), Some(raw)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(CliError::InvalidClause(clause.to_string()));
    };
    let operator = Operator::parse(token).ok_or_else(|| CliError::UnknownOperator(token.into()))?;
    let data_type = property_type(metadata, entity_type, property).ok_or_else(|| {
        CliError::UnknownProperty {
            entity_type: entity_type.name.clone(),
            property: property.to_string(),
        }
    })?;

    let raw = raw.trim();
    let value = if operator.is_text_function() {
        Value::Text(unquote(raw).to_string())
    } else {
        parse_literal(raw, data_type).ok_or_else(|| CliError::InvalidLiteral {
            property: property.to_string(),
            data_type,
            literal: raw.to_string(),
        })?
    };
    Ok(Predicate::compare(property, operator, value))
}

fn parse_literal(raw: &str, data_type: DataType) -> Option<Value> {
    if raw == "null" {
        return Some(Value::Null);
    }
    let json = match data_type {
        DataType::String | DataType::DateTime | DataType::Guid => {
            JsonValue::String(unquote(raw).to_string())
        }
        _ => serde_json::from_str(raw).ok()?,
    };
    Value::from_json(&json, data_type)
}

fn unquote(raw: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = raw
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    raw
}

/// Renders the request for `args` against a loaded catalog.
pub fn render(
    args: &QueryArgs,
    metadata: &MetadataStore,
    base: Option<&str>,
) -> Result<String, CliError> {
    let query = build_query(args, metadata)?;
    let request = QueryRequest::from_query(&query, metadata)?;
    Ok(match base {
        Some(base) => request.url(base),
        None => request.path_and_query(),
    })
}

/// Runs the query-url command.
pub fn run(
    metadata_path: &Path,
    args: &QueryArgs,
    base: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let metadata = load_metadata(metadata_path)?;
    let rendered = render(args, &metadata, base)?;
    tracing::debug!(from = %args.from, clauses = args.filters.len(), "rendered query");
    println!("{rendered}");
    Ok(())
}
