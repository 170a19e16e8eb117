//! Query options for `find`
//!
//! `skip` is applied before `limit`. When `order_by` is absent the adapter
//! sorts by the collection's primary key, using `direction`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending (default)
    #[default]
    Asc,
    /// Descending
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            other => Err(Error::config(format!(
                "invalid direction '{}': expected 'asc' or 'desc'",
                other
            ))),
        }
    }
}

/// Options for `find`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    /// Maximum number of records returned (unbounded when None)
    pub limit: Option<u64>,
    /// Number of records skipped before returning
    #[serde(alias = "offset")]
    pub skip: Option<u64>,
    /// Field to sort by
    pub order_by: Option<String>,
    /// Sort direction
    pub direction: Direction,
}

impl FindOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of records
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the number of records to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Alias for [`FindOptions::skip`]
    pub fn offset(self, offset: u64) -> Self {
        self.skip(offset)
    }

    /// Sort by a field
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    /// Set sort direction
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Sort ascending
    pub fn asc(self) -> Self {
        self.direction(Direction::Asc)
    }

    /// Sort descending
    pub fn desc(self) -> Self {
        self.direction(Direction::Desc)
    }
}
