//! Error types for tablescope-rdbc
//!
//! Every adapter operation reports failures through [`Error`]. The variants
//! are kept distinct so a host can tell "no rows" apart from "query failed":
//! - Connection: unreachable host, bad credentials, unknown database, closed session
//! - Schema: unknown collection or field, missing primary key
//! - Constraint: uniqueness or type violations on write
//! - NotFound: update/delete target absent
//! - EmptyResult: field introspection on an empty result

use std::fmt;
use thiserror::Error;

/// Result type for tablescope-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Query execution errors
    Query,
    /// Missing or malformed collection, field or primary key
    Schema,
    /// Constraint or type violation (not retriable)
    Constraint,
    /// Targeted record does not exist
    NotFound,
    /// Introspection on an empty result
    EmptyResult,
    /// Configuration error
    Configuration,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection)
    }
}

/// Main error type for tablescope-rdbc
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed or the session is closed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Schema error (missing primary key, column mismatch)
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Collection does not exist
    #[error("collection not found: {collection}")]
    CollectionNotFound { collection: String },

    /// Field does not exist in a collection
    #[error("field not found: {field} in collection {collection}")]
    FieldNotFound { collection: String, field: String },

    /// Constraint violation (PK, unique, check, type mismatch)
    #[error("constraint violation: {message}")]
    Constraint {
        constraint_name: Option<String>,
        message: String,
    },

    /// No record matched the given primary key
    #[error("record not found: {collection} with {primary_key} = {value}")]
    NotFound {
        collection: String,
        primary_key: String,
        value: String,
    },

    /// Field introspection was asked about an empty result
    #[error("empty result: {message}")]
    EmptyResult { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Schema { .. } | Self::CollectionNotFound { .. } | Self::FieldNotFound { .. } => {
                ErrorCategory::Schema
            }
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::EmptyResult { .. } => ErrorCategory::EmptyResult,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a constraint violation
    pub fn constraint(constraint_name: Option<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            constraint_name,
            message: message.into(),
        }
    }

    /// Create a type mismatch (reported as a constraint violation)
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::Constraint {
            constraint_name: None,
            message: message.into(),
        }
    }

    /// Create a not-found error for a primary key lookup
    pub fn not_found(
        collection: impl Into<String>,
        primary_key: impl Into<String>,
        value: impl fmt::Display,
    ) -> Self {
        Self::NotFound {
            collection: collection.into(),
            primary_key: primary_key.into(),
            value: value.to_string(),
        }
    }

    /// Create an empty result error
    pub fn empty_result(message: impl Into<String>) -> Self {
        Self::EmptyResult {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error reports a missing record
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Schema => write!(f, "schema"),
            Self::Constraint => write!(f, "constraint"),
            Self::NotFound => write!(f, "not_found"),
            Self::EmptyResult => write!(f, "empty_result"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
