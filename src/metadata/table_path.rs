//! Database and table identifiers

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted database or table name.
pub const MAX_NAME_LENGTH: usize = 200;

/// Fully qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TablePath {
    pub database_name: String,
    pub table_name: String,
}

impl TablePath {
    pub fn new(database_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            table_name: table_name.into(),
        }
    }

    /// Check both parts against the identifier grammar.
    pub fn validate(&self) -> Result<()> {
        validate_database_name(&self.database_name)?;
        validate_table_name(&self.table_name)
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database_name, self.table_name)
    }
}

pub fn validate_database_name(name: &str) -> Result<()> {
    check_identifier(name).map_err(|reason| {
        Error::InvalidDatabaseName(format!("Database name {:?} is invalid: {}", name, reason))
    })
}

pub fn validate_table_name(name: &str) -> Result<()> {
    check_identifier(name).map_err(|reason| {
        Error::InvalidTableName(format!("Table name {:?} is invalid: {}", name, reason))
    })
}

fn check_identifier(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("it is empty".to_string());
    }
    if name == "." || name == ".." {
        return Err("'.' and '..' are not allowed".to_string());
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(format!(
            "the length {} is longer than the max allowed length {}",
            name.len(),
            MAX_NAME_LENGTH
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(format!(
            "contains the illegal character {:?}, only ASCII alphanumerics, '_' and '-' are allowed",
            c
        ));
    }
    Ok(())
}
