//! Identifier validation, quoting and schema-qualified table names.
//!
//! SQL identifiers (table names, column names, schema names, partition
//! function names) cannot be passed as parameters in prepared statements -
//! only data values can be parameterized. Every identifier that ends up in a
//! generated statement goes through [`quote_mssql`], which validates it and
//! wraps it in brackets with embedded `]` doubled.

use crate::error::{CopyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum identifier length for SQL Server (`sysname`).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Schema used when a configured table name has none.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers longer than `sysname`.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CopyError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(CopyError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(CopyError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier using brackets.
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("table]name")?, "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Escape a value for use inside an N'...' string literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    /// Create a table name from already-split parts.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let table = Self {
            schema: schema.into(),
            name: name.into(),
        };
        validate_identifier(&table.schema)?;
        validate_identifier(&table.name)?;
        Ok(table)
    }

    /// Parse `table`, `schema.table`, or the bracketed forms `[schema].[table]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts = split_parts(raw.trim())?;
        match parts.as_slice() {
            [name] => Self::new(DEFAULT_SCHEMA, name.clone()),
            [schema, name] => Self::new(schema.clone(), name.clone()),
            _ => Err(CopyError::Config(format!(
                "Invalid table name {:?}: expected table or schema.table",
                raw
            ))),
        }
    }

    /// Bracket-quoted `[schema].[table]` for use in generated SQL.
    pub fn quoted(&self) -> String {
        // Both parts were validated on construction.
        format!(
            "[{}].[{}]",
            self.schema.replace(']', "]]"),
            self.name.replace(']', "]]")
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Split a possibly bracketed multi-part name on unquoted dots.
fn split_parts(raw: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();
    let mut in_brackets = false;

    while let Some(c) = chars.next() {
        match c {
            '[' if !in_brackets && current.is_empty() => in_brackets = true,
            ']' if in_brackets => {
                if chars.peek() == Some(&']') {
                    chars.next();
                    current.push(']');
                } else {
                    in_brackets = false;
                }
            }
            '.' if !in_brackets => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if in_brackets {
        return Err(CopyError::Config(format!(
            "Invalid table name {:?}: unterminated bracket",
            raw
        )));
    }
    parts.push(current);
    Ok(parts)
}
