//! Table and database descriptors
//!
//! Descriptors are immutable values. The `with_*` methods return a copy with
//! one field overridden, so defaults can be applied descriptor to descriptor.

use crate::common::{Error, Result};
use crate::metadata::lake::DataLakeFormat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const TABLE_REPLICATION_FACTOR: &str = "table.replication.factor";
pub const TABLE_DATALAKE_FORMAT: &str = "table.datalake.format";
pub const TABLE_DATALAKE_ENABLED: &str = "table.datalake.enabled";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Char { length: u32 },
    String,
    Decimal { precision: u32, scale: u32 },
    Date,
    Time { precision: u32 },
    Timestamp { precision: u32 },
    TimestampLtz { precision: u32 },
    Binary { length: u32 },
    Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            comment: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Vec<String>>,
}

impl Schema {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn primary_key(&self) -> &[String] {
        self.primary_key.as_deref().unwrap_or(&[])
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::InvalidTable("Schema must contain at least one column".into()));
        }
        let mut seen = HashSet::new();
        for name in self.column_names() {
            if name.is_empty() {
                return Err(Error::InvalidTable("Column name must not be empty".into()));
            }
            if !seen.insert(name) {
                return Err(Error::InvalidTable(format!(
                    "Column name '{}' is duplicated in the schema",
                    name
                )));
            }
        }
        if let Some(pk) = &self.primary_key {
            if pk.is_empty() {
                return Err(Error::InvalidTable("Primary key must not be empty".into()));
            }
            for key in pk {
                let column = self.columns.iter().find(|c| &c.name == key).ok_or_else(|| {
                    Error::InvalidTable(format!("Primary key column '{}' is not in the schema", key))
                })?;
                if column.nullable {
                    return Err(Error::InvalidTable(format!(
                        "Primary key column '{}' must be NOT NULL",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    fn has_column(&self, name: &str) -> bool {
        self.column_names().any(|c| c == name)
    }

    /// Primary key columns are implicitly NOT NULL.
    fn with_primary_key_not_null(mut self) -> Self {
        let pk: Vec<String> = self.primary_key().to_vec();
        for column in self.columns.iter_mut() {
            if pk.contains(&column.name) {
                column.nullable = false;
            }
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDistribution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bucket_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: Schema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<TableDistribution>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, String>,
}

impl TableDescriptor {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            comment: None,
            partition_keys: Vec::new(),
            distribution: None,
            properties: BTreeMap::new(),
            custom_properties: BTreeMap::new(),
        }
    }

    /// Parse and validate a descriptor sent by a client.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let descriptor: TableDescriptor = serde_json::from_slice(bytes).map_err(|e| {
            Error::InvalidTable(format!("Failed to parse table descriptor: {}", e))
        })?;
        let descriptor = descriptor.normalized();
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn normalized(mut self) -> Self {
        self.schema = self.schema.with_primary_key_not_null();
        if self.has_primary_key() {
            let default_keys: Vec<String> = self
                .schema
                .primary_key()
                .iter()
                .filter(|k| !self.partition_keys.contains(k))
                .cloned()
                .collect();
            let distribution = self.distribution.get_or_insert_with(TableDistribution::default);
            if distribution.bucket_keys.is_empty() {
                distribution.bucket_keys = default_keys;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        for key in &self.partition_keys {
            if !self.schema.has_column(key) {
                return Err(Error::InvalidTable(format!(
                    "Partition key '{}' is not in the schema",
                    key
                )));
            }
            if self.has_primary_key() && !self.schema.primary_key().contains(key) {
                return Err(Error::InvalidTable(format!(
                    "Partition key '{}' of a primary key table must be part of the primary key",
                    key
                )));
            }
        }
        if let Some(distribution) = &self.distribution {
            if let Some(count) = distribution.bucket_count {
                if count <= 0 {
                    return Err(Error::InvalidTable(format!(
                        "Bucket count must be positive, got {}",
                        count
                    )));
                }
            }
            for key in &distribution.bucket_keys {
                if !self.schema.has_column(key) {
                    return Err(Error::InvalidTable(format!(
                        "Bucket key '{}' is not in the schema",
                        key
                    )));
                }
            }
        }
        self.replication_factor()?;
        self.datalake_format()?;
        self.is_datalake_enabled()?;
        Ok(())
    }

    pub fn has_primary_key(&self) -> bool {
        self.schema.primary_key.is_some()
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partition_keys.is_empty()
    }

    pub fn bucket_count(&self) -> Option<i32> {
        self.distribution.as_ref().and_then(|d| d.bucket_count)
    }

    pub fn replication_factor(&self) -> Result<Option<i32>> {
        match self.properties.get(TABLE_REPLICATION_FACTOR) {
            None => Ok(None),
            Some(raw) => match raw.trim().parse::<i32>() {
                Ok(rf) if rf > 0 => Ok(Some(rf)),
                _ => Err(Error::InvalidReplicationFactor(format!(
                    "'{}' must be a positive integer, got '{}'",
                    TABLE_REPLICATION_FACTOR, raw
                ))),
            },
        }
    }

    pub fn datalake_format(&self) -> Result<Option<DataLakeFormat>> {
        self.properties
            .get(TABLE_DATALAKE_FORMAT)
            .map(|raw| {
                raw.parse()
                    .map_err(|e: Error| Error::InvalidTable(e.to_string()))
            })
            .transpose()
    }

    pub fn is_datalake_enabled(&self) -> Result<bool> {
        match self.properties.get(TABLE_DATALAKE_ENABLED) {
            None => Ok(false),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(Error::InvalidTable(format!(
                    "'{}' must be a boolean, got '{}'",
                    TABLE_DATALAKE_ENABLED, raw
                ))),
            },
        }
    }

    pub fn with_bucket_count(&self, bucket_count: i32) -> Self {
        let mut next = self.clone();
        next.distribution
            .get_or_insert_with(TableDistribution::default)
            .bucket_count = Some(bucket_count);
        next
    }

    pub fn with_replication_factor(&self, replication_factor: i32) -> Self {
        self.with_property(TABLE_REPLICATION_FACTOR, replication_factor.to_string())
    }

    pub fn with_datalake_format(&self, format: DataLakeFormat) -> Self {
        self.with_property(TABLE_DATALAKE_FORMAT, format.to_string())
    }

    pub fn with_property(&self, key: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.properties.insert(key.to_string(), value.into());
        next
    }

    /// Add custom properties that are not set yet; existing keys win.
    pub fn with_default_custom_properties(&self, defaults: &BTreeMap<String, String>) -> Self {
        let mut next = self.clone();
        for (k, v) in defaults {
            next.custom_properties
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        next
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, String>,
}

impl DatabaseDescriptor {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            Error::InvalidDatabaseName(format!("Failed to parse database descriptor: {}", e))
        })
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
