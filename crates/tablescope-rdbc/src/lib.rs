//! # tablescope-rdbc
//!
//! Relational database adapter for the tablescope data browser.
//!
//! This crate exposes a small, uniform set of operations over one
//! PostgreSQL database session, so a browsing host can list tables, page
//! through their rows, and edit single records without knowing SQL.
//!
//! ## Features
//!
//! - **Session Lifecycle**: connect (user defaults to the OS user), liveness check, close
//! - **Collections**: base tables of a schema, with primary key discovery
//! - **Reads**: `find` with limit, skip/offset, order_by and direction
//! - **Mutation**: create, partial update and delete by primary key
//! - **Schema Reflection**: ordered field descriptors from `information_schema`
//! - **Safe SQL**: statements generated with sea-query, values always bound as parameters
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tablescope_rdbc::prelude::*;
//!
//! let config = ConnectionConfig::new("localhost", "browse").with_password("secret");
//! let adapter = PgAdapter::connect(&config).await?;
//!
//! let page = adapter
//!     .find("users", &FindOptions::new().order_by("username").desc().limit(20))
//!     .await?;
//! let fields = adapter.fields_for(&page)?;
//!
//! adapter
//!     .update("users", &Value::Int32(7), &[("age", Value::Int32(42))])
//!     .await?;
//! adapter.close().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` (default) - PostgreSQL backend via tokio-postgres

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapter;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod query;
pub mod schema;
pub mod security;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{ColumnMetadata, Record, TableMetadata, Value};

    // Adapter surface
    pub use crate::adapter::{fields_for, Adapter, RelationalAdapter};
    pub use crate::query::{Direction, FindOptions};

    // Configuration
    pub use crate::config::{current_os_user, ConnectionConfig, ResolvedConfig, SensitiveString};

    // Collaborator seams
    pub use crate::connection::Connection;
    pub use crate::dialect::{PostgresDialect, SqlDialect};
    pub use crate::schema::SchemaProvider;

    // PostgreSQL backend
    #[cfg(feature = "postgres")]
    pub use crate::postgres::{PgAdapter, PgConnection, PgSchemaProvider};
}

// Re-export commonly used items at crate root
pub use adapter::{Adapter, RelationalAdapter};
pub use config::ConnectionConfig;
pub use error::{Error, Result};
pub use query::FindOptions;
pub use types::{Record, Value};

#[cfg(feature = "postgres")]
pub use postgres::{connect, PgAdapter};
