//! SQL dialect abstraction for tablescope-rdbc
//!
//! Statement text is generated with sea-query; data values are never
//! inlined, every value slot is a numbered placeholder bound at execution.
//!
//! - SqlDialect: Trait for database-specific SQL generation
//! - PostgresDialect: `"quoted"` identifiers and `$n` placeholders
//!
//! Columns whose type has no native [`Value`](crate::types::Value) mapping
//! travel as text: they are selected as `col::text` and written through a
//! `$n::text::type` cast.

use crate::query::Direction;
use crate::types::ColumnMetadata;
use sea_query::{
    Alias, Asterisk, ColumnRef, Expr, IntoIden, Order, PostgresQueryBuilder, Query, SimpleExpr,
    TableRef,
};

/// Largest `numeric` precision that still fits a 96-bit decimal mantissa
const MAX_NATIVE_NUMERIC_PRECISION: u32 = 28;

/// Catalog query for a table's columns; binds the schema as `$1` and the
/// table as `$2`.
///
/// The primary key comes from `pg_index`, which is readable by every role,
/// unlike `information_schema.table_constraints`.
const POSTGRES_LIST_COLUMNS_SQL: &str = r#"SELECT
        c.column_name::text AS column_name,
        c.data_type::text AS data_type,
        c.udt_schema::text AS udt_schema,
        c.udt_name::text AS udt_name,
        c.is_nullable = 'YES' AS nullable,
        c.ordinal_position::int4 AS ordinal_position,
        c.column_default::text AS column_default,
        c.character_maximum_length::int4 AS character_maximum_length,
        c.numeric_precision::int4 AS numeric_precision,
        c.numeric_scale::int4 AS numeric_scale,
        pk.pk_ordinal::int4 AS pk_ordinal
    FROM information_schema.columns c
    LEFT JOIN (
        SELECT
            a.attname::text AS column_name,
            array_position(ix.indkey::int2[], a.attnum) AS pk_ordinal
        FROM pg_class t
        JOIN pg_namespace n ON t.relnamespace = n.oid
        JOIN pg_index ix ON t.oid = ix.indrelid AND ix.indisprimary
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE n.nspname = $1::text AND t.relname = $2::text
    ) pk ON pk.column_name = c.column_name::text
    WHERE c.table_schema = $1::text AND c.table_name = $2::text
    ORDER BY c.ordinal_position"#;

fn sea_table_ref(schema: Option<&str>, table: &str) -> TableRef {
    match schema {
        Some(s) => TableRef::SchemaTable(Alias::new(s).into_iden(), Alias::new(table).into_iden()),
        None => TableRef::Table(Alias::new(table).into_iden()),
    }
}

fn sea_column_ref(schema: Option<&str>, table: &str, column: &str) -> ColumnRef {
    match schema {
        Some(s) => ColumnRef::SchemaTableColumn(
            Alias::new(s).into_iden(),
            Alias::new(table).into_iden(),
            Alias::new(column).into_iden(),
        ),
        None => ColumnRef::TableColumn(Alias::new(table).into_iden(), Alias::new(column).into_iden()),
    }
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Catalog query listing a table's columns with their primary key
    /// ordinal; binds schema as parameter 1 and table as parameter 2
    fn list_columns_sql(&self) -> &'static str;

    /// Whether a column is read and written as text
    fn reads_as_text(&self, column: &ColumnMetadata) -> bool;

    /// `SELECT` of `columns` (all columns when empty) with optional
    /// ordering and pagination
    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[ColumnMetadata],
        order_by: &[(&str, Direction)],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String;

    /// `INSERT` binding `columns` to placeholders `1..=columns.len()`
    fn insert_sql(&self, schema: Option<&str>, table: &str, columns: &[&ColumnMetadata])
        -> String;

    /// `UPDATE` of `columns` (placeholders `1..=n`) keyed by `pk` (placeholder `n + 1`)
    fn update_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&ColumnMetadata],
        pk: &ColumnMetadata,
    ) -> String;

    /// `DELETE` keyed by `pk` (placeholder 1)
    fn delete_sql(&self, schema: Option<&str>, table: &str, pk: &ColumnMetadata) -> String;
}

/// PostgreSQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Placeholder for a value bound to `column`
    fn value_slot(&self, column: &ColumnMetadata, index: usize) -> SimpleExpr {
        match (&column.udt_schema, &column.udt_name) {
            (Some(schema), Some(name)) if self.reads_as_text(column) => Expr::cust(format!(
                "${}::text::{}.{}",
                index,
                self.quote_identifier(schema),
                self.quote_identifier(name)
            )),
            _ => Expr::cust(format!("${}", index)),
        }
    }
}

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn list_columns_sql(&self) -> &'static str {
        POSTGRES_LIST_COLUMNS_SQL
    }

    fn reads_as_text(&self, column: &ColumnMetadata) -> bool {
        match column.type_name.as_str() {
            "boolean" | "smallint" | "integer" | "bigint" | "real" | "double precision"
            | "character varying" | "character" | "text" | "name" | "bytea" | "date"
            | "time without time zone" | "timestamp without time zone"
            | "timestamp with time zone" | "uuid" | "json" | "jsonb" => false,
            "numeric" => {
                !matches!(column.precision, Some(p) if p <= MAX_NATIVE_NUMERIC_PRECISION)
            }
            _ => true,
        }
    }

    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[ColumnMetadata],
        order_by: &[(&str, Direction)],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        let mut stmt = Query::select();
        stmt.from(sea_table_ref(schema, table));

        if columns.is_empty() {
            stmt.column(Asterisk);
        }
        for column in columns {
            if self.reads_as_text(column) {
                stmt.expr_as(
                    Expr::cust(format!("{}::text", self.quote_identifier(&column.name))),
                    Alias::new(&column.name),
                );
            } else {
                stmt.column(Alias::new(&column.name));
            }
        }

        for (col, direction) in order_by {
            let order = match direction {
                Direction::Asc => Order::Asc,
                Direction::Desc => Order::Desc,
            };
            // A bare name would resolve to the `::text` output column
            let cast = columns
                .iter()
                .any(|c| c.name == *col && self.reads_as_text(c));
            if cast {
                stmt.order_by(sea_column_ref(schema, table, col), order);
            } else {
                stmt.order_by(Alias::new(*col), order);
            }
        }

        if let Some(l) = limit {
            stmt.limit(l);
        }
        if let Some(o) = offset {
            stmt.offset(o);
        }

        stmt.to_string(PostgresQueryBuilder)
    }

    fn insert_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&ColumnMetadata],
    ) -> String {
        let mut stmt = Query::insert();
        stmt.into_table(sea_table_ref(schema, table));

        if columns.is_empty() {
            stmt.or_default_values();
        } else {
            stmt.columns(columns.iter().map(|c| Alias::new(&c.name).into_iden()))
                .values_panic(
                    columns
                        .iter()
                        .enumerate()
                        .map(|(i, c)| self.value_slot(c, i + 1)),
                );
        }

        stmt.to_string(PostgresQueryBuilder)
    }

    fn update_sql(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&ColumnMetadata],
        pk: &ColumnMetadata,
    ) -> String {
        let mut stmt = Query::update();
        stmt.table(sea_table_ref(schema, table));

        for (i, col) in columns.iter().enumerate() {
            stmt.value(Alias::new(&col.name), self.value_slot(col, i + 1));
        }
        stmt.and_where(
            Expr::col(Alias::new(&pk.name)).eq(self.value_slot(pk, columns.len() + 1)),
        );

        stmt.to_string(PostgresQueryBuilder)
    }

    fn delete_sql(&self, schema: Option<&str>, table: &str, pk: &ColumnMetadata) -> String {
        let mut stmt = Query::delete();
        stmt.from_table(sea_table_ref(schema, table))
            .and_where(Expr::col(Alias::new(&pk.name)).eq(self.value_slot(pk, 1)));

        stmt.to_string(PostgresQueryBuilder)
    }
}
