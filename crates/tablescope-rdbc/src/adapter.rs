//! Relational adapter
//!
//! The operation set a data-browsing host programs against: session
//! liveness, collection listing, primary key discovery, paginated and
//! sorted reads, single-record mutation and schema reflection.
//!
//! [`RelationalAdapter`] implements it over the [`Connection`],
//! [`SchemaProvider`] and [`SqlDialect`] seams. Every operation awaits its
//! statements one after another on the same session.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::connection::Connection;
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::query::{Direction, FindOptions};
use crate::schema::SchemaProvider;
use crate::types::{ColumnMetadata, Record, TableMetadata, Value};

/// Uniform CRUD and introspection operations over one database session
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Whether the session is open and answering
    async fn is_connected(&self) -> bool;

    /// Release the session. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;

    /// Names of the base tables in the configured schema, sorted by name
    async fn collections(&self) -> Result<Vec<String>>;

    /// Name of the collection's single primary key field
    async fn primary_key_for(&self, collection: &str) -> Result<String>;

    /// Read records, skipping `options.skip` rows before applying `options.limit`
    async fn find(&self, collection: &str, options: &FindOptions) -> Result<Vec<Record>>;

    /// Field names of the first record in a result
    fn fields_for(&self, records: &[Record]) -> Result<Vec<String>> {
        fields_for(records)
    }

    /// Insert one record
    async fn create(&self, collection: &str, attributes: &[(&str, Value)]) -> Result<()>;

    /// Change only the given fields of the record with this primary key value
    async fn update(
        &self,
        collection: &str,
        primary_key: &Value,
        attributes: &[(&str, Value)],
    ) -> Result<()>;

    /// Remove the record with this primary key value
    async fn delete(&self, collection: &str, primary_key: &Value) -> Result<()>;

    /// Field descriptors in declared column order
    async fn schema(&self, collection: &str) -> Result<Vec<ColumnMetadata>>;
}

/// Field names of the first record, in column order.
///
/// An empty result has no fields to report and is an
/// [`Error::EmptyResult`].
pub fn fields_for(records: &[Record]) -> Result<Vec<String>> {
    records
        .first()
        .map(|r| r.fields().to_vec())
        .ok_or_else(|| Error::empty_result("cannot determine fields of an empty result"))
}

/// Adapter over one exclusively-owned session
pub struct RelationalAdapter {
    conn: Arc<dyn Connection>,
    catalog: Box<dyn SchemaProvider>,
    dialect: Box<dyn SqlDialect>,
    config: ResolvedConfig,
}

impl std::fmt::Debug for RelationalAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalAdapter").finish_non_exhaustive()
    }
}

impl RelationalAdapter {
    /// Assemble an adapter from its collaborators
    pub fn new(
        conn: Arc<dyn Connection>,
        catalog: Box<dyn SchemaProvider>,
        dialect: Box<dyn SqlDialect>,
        config: ResolvedConfig,
    ) -> Self {
        Self {
            conn,
            catalog,
            dialect,
            config,
        }
    }

    /// The effective login user
    pub fn user(&self) -> &str {
        self.config.user()
    }

    /// Schema whose tables are exposed as collections
    pub fn schema_name(&self) -> &str {
        self.config.schema()
    }

    /// The underlying session
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    fn ensure_open(&self) -> Result<()> {
        if self.conn.is_closed() {
            return Err(Error::connection("session is closed"));
        }
        Ok(())
    }

    /// Resolve a collection by exact name in the catalog
    async fn table(&self, collection: &str) -> Result<TableMetadata> {
        self.catalog
            .get_table(Some(self.schema_name()), collection)
            .await?
            .ok_or_else(|| Error::CollectionNotFound {
                collection: collection.to_string(),
            })
    }

    /// Resolve attribute names against the table's columns
    fn columns_for<'t>(
        table: &'t TableMetadata,
        attributes: &[(&str, Value)],
    ) -> Result<Vec<&'t ColumnMetadata>> {
        let mut seen = HashSet::with_capacity(attributes.len());
        attributes
            .iter()
            .map(|(field, _)| {
                if !seen.insert(*field) {
                    return Err(Error::config(format!("field '{}' given more than once", field)));
                }
                table.column(field).ok_or_else(|| Error::FieldNotFound {
                        collection: table.name.clone(),
                        field: field.to_string(),
                    })
            })
            .collect()
    }
}

fn primary_key_of(table: &TableMetadata) -> Result<&ColumnMetadata> {
    match table.primary_key_columns().as_slice() {
        [only] => Ok(*only),
        [] => Err(Error::schema(format!(
            "collection '{}' has no primary key",
            table.name
        ))),
        many => Err(Error::schema(format!(
            "collection '{}' has a composite primary key ({})",
            table.name,
            many.iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Sort keys for a read: the requested field, then the primary key
fn sort_keys<'t>(
    table: &'t TableMetadata,
    options: &FindOptions,
) -> Result<Vec<(&'t str, Direction)>> {
    let mut keys = Vec::with_capacity(2);

    if let Some(field) = options.order_by.as_deref() {
        let column = table.column(field).ok_or_else(|| {
            Error::schema(format!(
                "cannot order '{}' by unknown field '{}'",
                table.name, field
            ))
        })?;
        keys.push((column.name.as_str(), options.direction));
    }

    if let Some(pk) = table.single_primary_key() {
        if keys.iter().all(|(name, _)| *name != pk.name) {
            keys.push((pk.name.as_str(), options.direction));
        }
    }

    Ok(keys)
}

fn values_of(attributes: &[(&str, Value)]) -> Vec<Value> {
    attributes.iter().map(|(_, v)| v.clone()).collect()
}

#[async_trait]
impl Adapter for RelationalAdapter {
    async fn is_connected(&self) -> bool {
        !self.conn.is_closed() && self.conn.is_valid().await
    }

    async fn close(&self) -> Result<()> {
        self.conn.close().await
    }

    async fn collections(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.catalog.list_tables(Some(self.schema_name())).await
    }

    async fn primary_key_for(&self, collection: &str) -> Result<String> {
        self.ensure_open()?;
        let table = self.table(collection).await?;
        primary_key_of(&table).map(|pk| pk.name.clone())
    }

    async fn find(&self, collection: &str, options: &FindOptions) -> Result<Vec<Record>> {
        self.ensure_open()?;
        let table = self.table(collection).await?;
        let order = sort_keys(&table, options)?;

        let sql = self.dialect.build_select(
            Some(self.schema_name()),
            &table.name,
            &table.columns,
            &order,
            options.limit,
            options.skip,
        );
        let records = self.conn.query(&sql, &[]).await?;

        debug!(collection, rows = records.len(), "find");
        Ok(records)
    }

    async fn create(&self, collection: &str, attributes: &[(&str, Value)]) -> Result<()> {
        self.ensure_open()?;
        let table = self.table(collection).await?;
        let columns = Self::columns_for(&table, attributes)?;

        let sql = self
            .dialect
            .insert_sql(Some(self.schema_name()), &table.name, &columns);
        let affected = self.conn.execute(&sql, &values_of(attributes)).await?;

        debug!(collection, affected, "create");
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        primary_key: &Value,
        attributes: &[(&str, Value)],
    ) -> Result<()> {
        self.ensure_open()?;
        if attributes.is_empty() {
            return Err(Error::config(format!(
                "update of '{}' needs at least one field",
                collection
            )));
        }

        let table = self.table(collection).await?;
        let pk = primary_key_of(&table)?;
        let columns = Self::columns_for(&table, attributes)?;

        let sql = self
            .dialect
            .update_sql(Some(self.schema_name()), &table.name, &columns, pk);
        let mut params = values_of(attributes);
        params.push(primary_key.clone());

        let affected = self.conn.execute(&sql, &params).await?;
        debug!(collection, affected, "update");

        if affected == 0 {
            return Err(Error::not_found(collection, pk.name.as_str(), primary_key));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, primary_key: &Value) -> Result<()> {
        self.ensure_open()?;
        let table = self.table(collection).await?;
        let pk = primary_key_of(&table)?;

        let sql = self
            .dialect
            .delete_sql(Some(self.schema_name()), &table.name, pk);
        let affected = self
            .conn
            .execute(&sql, std::slice::from_ref(primary_key))
            .await?;
        debug!(collection, affected, "delete");

        if affected == 0 {
            return Err(Error::not_found(collection, pk.name.as_str(), primary_key));
        }
        Ok(())
    }

    async fn schema(&self, collection: &str) -> Result<Vec<ColumnMetadata>> {
        self.ensure_open()?;
        Ok(self.table(collection).await?.columns)
    }
}
