//! Schema discovery for tablescope-rdbc
//!
//! Read-only catalog introspection: which collections exist and what their
//! fields and primary keys are.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::TableMetadata;

/// Schema provider for read-only schema discovery
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// List all base tables in a schema, sorted by name
    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>>;

    /// Get table metadata with columns in declared order, `None` if the
    /// table does not exist
    async fn get_table(&self, schema: Option<&str>, table: &str) -> Result<Option<TableMetadata>>;
}
