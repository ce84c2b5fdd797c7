//! Value-path extraction over records and tables
//!
//! A path is a `.`-separated list of tokens. A token is either a bare key
//! (`name`) or a bracketed index (`[k1,k2]`). Bracketed components are split
//! on `,` only; spaces are part of the component, so `[Code Cache]` and
//! `[Code Cache, Committed]` are different indexes.
//!
//! Walking rules, applied left to right from the root:
//!
//! - table + any token: the token names a row (a bare key is an implied
//!   one-component index). The row is located by composite key, and the first
//!   row field outside the table's index columns becomes the current value.
//! - record + any token: brackets are stripped and the token is a field name.
//! - scalar with tokens left: the walk fails and reports the unconsumed path.
//!
//! ```text
//! memoryUsageAfterGc.[Code Cache].committed
//! └── record field ─┘ └ table row ┘ └ field ┘
//! ```

use std::collections::HashSet;

use thiserror::Error;

use crate::value::{Record, Table, Value};

/// Errors raised while walking a value path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// Root value is neither a record nor a table
    #[error("cannot walk a path into a {0} value")]
    NotStructured(&'static str),

    /// No table row has the requested composite key
    #[error("[{}] is not an existing index for this table", .0.join(","))]
    IndexNotFound(Vec<String>),

    /// Row was found but does not carry one of the index components
    #[error("{0} not found in table row")]
    ComponentMissing(String),

    /// Record has no field with the requested name
    #[error("field '{0}' not found")]
    FieldNotFound(String),

    /// Path tokens remain but the current value is a scalar
    #[error("path remains but value is scalar; remaining path is {0}")]
    ScalarWithRemainingPath(String),

    /// Row holds nothing besides its index components
    #[error("table row has no value outside its index")]
    NoPayload,
}

/// Walk `path` starting at `root` and return the value it reaches
///
/// Stateless: repeated calls on the same root and path return the same value.
///
/// # Errors
///
/// Returns [`ExtractError`] if the root is not structured or any path
/// element does not exist.
pub fn extract<'a>(root: &'a Value, path: &str) -> Result<&'a Value, ExtractError> {
    if !root.is_structured() {
        return Err(ExtractError::NotStructured(kind(root)));
    }

    tracing::trace!(path, "walking value path");

    let tokens: Vec<&str> = path.split('.').collect();
    let mut current = root;

    for (pos, token) in tokens.iter().enumerate() {
        current = match current {
            Value::Table(table) => row_value(table, &index_components(token))?,
            Value::Record(record) => field(record, strip_brackets(token))?,
            _ => {
                let remaining = tokens[pos..].join(".");
                tracing::debug!(path, %remaining, "path remains but value is scalar");
                return Err(ExtractError::ScalarWithRemainingPath(remaining));
            }
        };
    }

    Ok(current)
}

/// Split a token into index components, implying `[token]` for bare keys
fn index_components(token: &str) -> Vec<&str> {
    strip_brackets(token).split(',').collect()
}

fn strip_brackets(token: &str) -> &str {
    token
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(token)
}

fn field<'a>(record: &'a Record, name: &str) -> Result<&'a Value, ExtractError> {
    record
        .get(name)
        .ok_or_else(|| ExtractError::FieldNotFound(name.to_string()))
}

/// Locate a row by composite key and return its payload value
fn row_value<'a>(table: &'a Table, components: &[&str]) -> Result<&'a Value, ExtractError> {
    let row = table.find(components).ok_or_else(|| {
        ExtractError::IndexNotFound(components.iter().map(ToString::to_string).collect())
    })?;

    let row_components: HashSet<String> = row.values().filter_map(Value::key_component).collect();
    if let Some(missing) = components.iter().find(|c| !row_components.contains(**c)) {
        return Err(ExtractError::ComponentMissing((*missing).to_string()));
    }

    row.iter()
        .find(|(name, _)| !table.index().iter().any(|column| column.as_str() == *name))
        .map(|(_, value)| value)
        .ok_or(ExtractError::NoPayload)
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Int(_) | Value::Float(_) => "numeric",
        Value::Text(_) => "text",
        Value::List(_) => "list",
        Value::Record(_) => "record",
        Value::Table(_) => "table",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Table of single-scalar rows: `{rowOne: 5, rowTwo: 833}`
    fn simple_table() -> Value {
        Table::new(["key"])
            .with_row(Record::new().with("key", "rowOne").with("value", 5))
            .with_row(Record::new().with("key", "rowTwo").with("value", 833))
            .into()
    }

    /// Table whose rows hold a nested record payload
    fn nested_table() -> Value {
        let row_one = Record::new()
            .with("anotherRowValue", 654)
            .with("differentRowValue", 384);
        let row_two = Record::new()
            .with("anotherRowValue", 1)
            .with("differentRowValue", 2);
        Table::new(["key"])
            .with_row(Record::new().with("key", "rowOne").with("value", row_one))
            .with_row(Record::new().with("key", "rowTwo").with("value", row_two))
            .into()
    }

    fn usage(committed: i64) -> Record {
        Record::new()
            .with("init", 0)
            .with("used", 10)
            .with("committed", committed)
            .with("max", -1)
    }

    /// Shaped like a garbage collector's last-collection info
    fn gc_info() -> Value {
        let after = Table::new(["key"])
            .with_row(Record::new().with("key", "Code Cache").with("value", usage(2_555_904)))
            .with_row(Record::new().with("key", "Eden Space").with("value", usage(917_504)));
        Record::new()
            .with("GcThreadCount", 1)
            .with("duration", 3)
            .with("memoryUsageAfterGc", after)
            .into()
    }

    #[test]
    fn bare_key_into_simple_table() {
        assert_eq!(extract(&simple_table(), "rowOne").unwrap(), &Value::Int(5));
    }

    #[test]
    fn bracketed_key_into_simple_table() {
        assert_eq!(extract(&simple_table(), "[rowOne]").unwrap(), &Value::Int(5));
        assert_eq!(extract(&simple_table(), "[rowTwo]").unwrap(), &Value::Int(833));
    }

    #[test]
    fn unknown_index_fails() {
        let err = extract(&simple_table(), "[rowOnse]").unwrap_err();
        assert_eq!(err, ExtractError::IndexNotFound(vec!["rowOnse".to_string()]));
    }

    #[test]
    fn record_field_lookup() {
        let record: Value = Record::new().with("stringValue", "123").into();
        assert_eq!(extract(&record, "stringValue").unwrap(), &Value::from("123"));
    }

    #[test]
    fn record_lookup_strips_brackets() {
        let record: Value = Record::new().with("rowOne", 1).into();
        assert_eq!(extract(&record, "[rowOne]").unwrap(), &Value::Int(1));
        let err = extract(&record, "[rowOnse]").unwrap_err();
        assert_eq!(err, ExtractError::FieldNotFound("rowOnse".to_string()));
    }

    #[test]
    fn table_row_then_record_field() {
        let table = nested_table();
        assert_eq!(extract(&table, "rowOne.anotherRowValue").unwrap(), &Value::Int(654));
        assert_eq!(extract(&table, "[rowOne].differentRowValue").unwrap(), &Value::Int(384));
    }

    #[test]
    fn missing_field_after_row_fails() {
        let err = extract(&nested_table(), "rowOne.blam").unwrap_err();
        assert_eq!(err, ExtractError::FieldNotFound("blam".to_string()));
    }

    #[test]
    fn scalar_with_remaining_path_reports_remainder() {
        let root: Value = Record::new()
            .with("a", Record::new().with("b", 7))
            .into();
        let err = extract(&root, "a.b.c").unwrap_err();
        assert_eq!(err, ExtractError::ScalarWithRemainingPath("c".to_string()));

        let err = extract(&root, "a.b.c.d").unwrap_err();
        assert_eq!(err, ExtractError::ScalarWithRemainingPath("c.d".to_string()));
    }

    #[test]
    fn embedded_spaces_are_significant() {
        let gc = gc_info();
        assert!(matches!(
            extract(&gc, "memoryUsageAfterGc.Code Cache").unwrap(),
            Value::Record(_)
        ));
        assert!(matches!(
            extract(&gc, "memoryUsageAfterGc.[Code Cache]").unwrap(),
            Value::Record(_)
        ));
        assert_eq!(
            extract(&gc, "memoryUsageAfterGc.Code Cache.committed").unwrap(),
            &Value::Int(2_555_904)
        );
    }

    #[test]
    fn too_many_index_components_fail_cleanly() {
        let err = extract(&gc_info(), "memoryUsageAfterGc.[Code Cache, Committed]").unwrap_err();
        assert!(matches!(err, ExtractError::IndexNotFound(ref c) if c.len() == 2));
    }

    #[test]
    fn returns_nested_containers() {
        let gc = gc_info();
        assert!(matches!(extract(&gc, "memoryUsageAfterGc").unwrap(), Value::Table(_)));
        assert_eq!(extract(&gc, "GcThreadCount").unwrap(), &Value::Int(1));
    }

    #[test]
    fn composite_index_selects_payload() {
        let table: Value = Table::new(["host", "port"])
            .with_row(
                Record::new()
                    .with("host", "db1")
                    .with("port", 5432)
                    .with("connections", 17),
            )
            .into();
        assert_eq!(extract(&table, "[db1,5432]").unwrap(), &Value::Int(17));
    }

    #[test]
    fn payload_rendering_like_its_key_is_still_returned() {
        let table: Value = Table::new(["key"])
            .with_row(Record::new().with("key", "1").with("value", 1))
            .with_row(Record::new().with("key", "2").with("value", "2"))
            .into();
        assert_eq!(extract(&table, "1").unwrap(), &Value::Int(1));
        assert_eq!(extract(&table, "[2]").unwrap(), &Value::from("2"));
    }

    #[test]
    fn row_with_only_index_columns_has_no_payload() {
        let table: Value = Table::new(["key"])
            .with_row(Record::new().with("key", "lonely"))
            .into();
        assert_eq!(extract(&table, "lonely").unwrap_err(), ExtractError::NoPayload);
    }

    #[test]
    fn scalar_root_is_rejected() {
        let err = extract(&Value::Int(3), "anything").unwrap_err();
        assert_eq!(err, ExtractError::NotStructured("numeric"));
    }

    #[test]
    fn repeated_extraction_is_identical() {
        let table = nested_table();
        let first = extract(&table, "rowTwo.differentRowValue").unwrap().clone();
        let second = extract(&table, "rowTwo.differentRowValue").unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(
            extract(&table, "rowOne.blam").unwrap_err(),
            extract(&table, "rowOne.blam").unwrap_err()
        );
    }
}
