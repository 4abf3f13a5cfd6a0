//! Lakehouse formats a table can be tiered into

use crate::common::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataLakeFormat {
    Paimon,
    Iceberg,
    Lance,
}

impl fmt::Display for DataLakeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLakeFormat::Paimon => write!(f, "paimon"),
            DataLakeFormat::Iceberg => write!(f, "iceberg"),
            DataLakeFormat::Lance => write!(f, "lance"),
        }
    }
}

impl FromStr for DataLakeFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paimon" => Ok(DataLakeFormat::Paimon),
            "iceberg" => Ok(DataLakeFormat::Iceberg),
            "lance" => Ok(DataLakeFormat::Lance),
            other => Err(Error::InvalidConfig(format!(
                "unknown datalake format: {}",
                other
            ))),
        }
    }
}
