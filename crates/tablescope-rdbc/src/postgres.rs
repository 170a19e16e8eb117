//! PostgreSQL backend implementation for tablescope-rdbc
//!
//! Provides PostgreSQL-specific implementations:
//! - Session (`PgConnection`) over one tokio-postgres client
//! - Parameter coercion to server-declared parameter types
//! - Row decoding into tagged values
//! - SQLSTATE-based error classification
//! - Schema provider for introspection

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error as _;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type, WrongType};
use tracing::{debug, info, warn};

use crate::adapter::RelationalAdapter;
use crate::config::{ConnectionConfig, ResolvedConfig};
use crate::connection::Connection;
use crate::dialect::{PostgresDialect, SqlDialect};
use crate::error::{Error, Result};
use crate::schema::SchemaProvider;
use crate::types::{ColumnMetadata, Record, TableMetadata, Value};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

fn boxed<T: ToSql + Sync + Send + 'static>(value: T) -> BoxedParam {
    Box::new(value)
}

/// NULL that binds to a parameter of any type
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut bytes::BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Convert a Value to a parameter using its natural PostgreSQL type
fn value_to_sql(value: &Value) -> BoxedParam {
    match value {
        Value::Null => boxed(SqlNull),
        Value::Bool(b) => boxed(*b),
        Value::Int16(n) => boxed(*n),
        Value::Int32(n) => boxed(*n),
        Value::Int64(n) => boxed(*n),
        Value::Float32(n) => boxed(*n),
        Value::Float64(n) => boxed(*n),
        Value::Decimal(d) => boxed(*d),
        Value::String(s) => boxed(s.clone()),
        Value::Bytes(b) => boxed(b.clone()),
        Value::Date(d) => boxed(*d),
        Value::Time(t) => boxed(*t),
        Value::DateTime(dt) => boxed(*dt),
        Value::DateTimeTz(dt) => boxed(*dt),
        Value::Uuid(u) => boxed(*u),
        Value::Json(j) => boxed(j.clone()),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::from_str(s)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// Convert a Value to a parameter of the type the server declared for it.
///
/// Integers are range-checked, strings are parsed into the target type.
/// A value that cannot represent the target type is a type mismatch.
fn coerce_param(value: &Value, ty: &Type) -> Result<BoxedParam> {
    if value.is_null() {
        return Ok(boxed(SqlNull));
    }

    let coerced = match *ty {
        Type::BOOL => value.as_bool().map(boxed),
        Type::INT2 => value
            .as_i64()
            .and_then(|n| i16::try_from(n).ok())
            .map(boxed),
        Type::INT4 => value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(boxed),
        Type::INT8 => value.as_i64().map(boxed),
        Type::FLOAT4 => value
            .as_f64()
            .filter(|n| !n.is_finite() || n.abs() <= f64::from(f32::MAX))
            .map(|n| boxed(n as f32)),
        Type::FLOAT8 => value.as_f64().map(boxed),
        Type::NUMERIC => match value {
            Value::Decimal(d) => Some(*d),
            Value::Float32(n) => Decimal::try_from(*n).ok(),
            Value::Float64(n) => Decimal::try_from(*n).ok(),
            Value::String(s) => Decimal::from_str(s.trim()).ok(),
            other => other.as_i64().map(Decimal::from),
        }
        .map(boxed),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => match value {
            Value::Json(j) => Some(j.to_string()),
            other => other.as_string(),
        }
        .map(boxed),
        Type::BYTEA => value.as_bytes().map(|b| boxed(b.to_vec())),
        Type::UUID => value.as_uuid().map(boxed),
        Type::DATE => match value {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            Value::String(s) => NaiveDate::from_str(s.trim()).ok(),
            _ => None,
        }
        .map(boxed),
        Type::TIME => match value {
            Value::Time(t) => Some(*t),
            Value::String(s) => NaiveTime::from_str(s.trim()).ok(),
            _ => None,
        }
        .map(boxed),
        Type::TIMESTAMP => match value {
            Value::DateTime(dt) => Some(*dt),
            Value::DateTimeTz(dt) => Some(dt.naive_utc()),
            Value::String(s) => parse_timestamp(s.trim()),
            _ => None,
        }
        .map(boxed),
        Type::TIMESTAMPTZ => match value {
            Value::DateTimeTz(dt) => Some(*dt),
            Value::DateTime(dt) => Some(dt.and_utc()),
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            _ => None,
        }
        .map(boxed),
        Type::JSON | Type::JSONB => match value {
            Value::Json(j) => Some(boxed(j.clone())),
            other => Some(boxed(other.to_json())),
        },
        // Types without a coercion rule are bound as-is; an encoding
        // failure in the driver is classified as a type mismatch.
        _ => Some(value_to_sql(value)),
    };

    coerced.ok_or_else(|| {
        Error::type_mismatch(format!(
            "cannot bind {} value '{}' to a parameter of type {}",
            value.sql_type(),
            value,
            ty
        ))
    })
}

fn bind_params(types: &[Type], params: &[Value], sql: &str) -> Result<Vec<BoxedParam>> {
    if types.len() != params.len() {
        return Err(Error::query_with_sql(
            format!(
                "statement expects {} parameters, {} given",
                types.len(),
                params.len()
            ),
            sql,
        ));
    }

    params
        .iter()
        .zip(types)
        .map(|(value, ty)| coerce_param(value, ty))
        .collect()
}

/// Convert a tokio-postgres row to a Record
fn pg_row_to_record(pg_row: &tokio_postgres::Row) -> Result<Record> {
    let fields: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect::<Result<Vec<Value>>>()?;

    Ok(Record::new(fields, values))
}

fn decode<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, wrap: F) -> Result<Value>
where
    T: tokio_postgres::types::FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    let value = row.try_get::<_, Option<T>>(idx).map_err(|e| {
        let column = &row.columns()[idx];
        Error::Query {
            message: format!(
                "cannot decode column '{}' of type {}",
                column.name(),
                column.type_()
            ),
            sql: None,
            source: Some(Box::new(e)),
        }
    })?;
    Ok(value.map(wrap).unwrap_or(Value::Null))
}

/// Convert a PostgreSQL value to a Value
///
/// Types without a mapping are read as text. Statements built by the
/// dialect cast such columns to `text`, so a decode failure here is an
/// error rather than a silent NULL.
fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Result<Value> {
    match *pg_type {
        Type::BOOL => decode(row, idx, Value::Bool),
        Type::INT2 => decode(row, idx, Value::Int16),
        Type::INT4 => decode(row, idx, Value::Int32),
        Type::INT8 => decode(row, idx, Value::Int64),
        Type::FLOAT4 => decode(row, idx, Value::Float32),
        Type::FLOAT8 => decode(row, idx, Value::Float64),
        Type::NUMERIC => decode(row, idx, Value::Decimal),
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            decode(row, idx, Value::String)
        }
        Type::BYTEA => decode(row, idx, Value::Bytes),
        Type::DATE => decode(row, idx, Value::Date),
        Type::TIME => decode(row, idx, Value::Time),
        Type::TIMESTAMP => decode(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => decode(row, idx, Value::DateTimeTz),
        Type::UUID => decode(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => decode(row, idx, Value::Json),
        _ => decode(row, idx, Value::String),
    }
}

/// Whether a driver error came from encoding a bound parameter
fn is_encoding_error(err: &tokio_postgres::Error) -> bool {
    err.source()
        .is_some_and(|cause| cause.downcast_ref::<WrongType>().is_some())
        || err.to_string().starts_with("error serializing parameter")
}

/// Map a driver error onto the adapter's error kinds by SQLSTATE.
pub(crate) fn classify_pg_error(err: tokio_postgres::Error, sql: &str) -> Error {
    let db_error = err.as_db_error().map(|db| {
        (
            db.code().code().to_string(),
            db.message().to_string(),
            db.constraint().map(String::from),
        )
    });

    match db_error {
        Some((code, message, constraint)) => match code.as_str() {
            c if c.starts_with("08") || c.starts_with("28") || c.starts_with("57P") => {
                Error::connection_with_source(message, err)
            }
            "3D000" => Error::connection_with_source(message, err),
            c if c.starts_with("23") => Error::constraint(constraint, message),
            c if c.starts_with("22") || c == "42804" => Error::type_mismatch(message),
            "42P01" | "42703" => Error::schema(message),
            _ => Error::Query {
                message: format!("{} ({})", message, code),
                sql: Some(sql.to_string()),
                source: Some(Box::new(err)),
            },
        },
        None if err.is_closed() => Error::connection_with_source("connection closed", err),
        None if is_encoding_error(&err) => {
            let message = match err.source() {
                Some(cause) => format!("{}: {}", err, cause),
                None => err.to_string(),
            };
            Error::type_mismatch(message)
        }
        None => Error::Query {
            message: err.to_string(),
            sql: Some(sql.to_string()),
            source: Some(Box::new(err)),
        },
    }
}

/// PostgreSQL session: one client and the task driving its socket
pub struct PgConnection {
    client: tokio_postgres::Client,
    driver: JoinHandle<()>,
    closed: AtomicBool,
    created_at: Instant,
}

impl PgConnection {
    /// Open a session for a resolved configuration
    pub async fn open(resolved: &ResolvedConfig) -> Result<Self> {
        let config = resolved.config();

        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .user(resolved.user())
            .dbname(&config.database);
        if let Some(password) = &config.password {
            pg.password(password.expose());
        }
        if let Some(timeout) = config.connect_timeout() {
            pg.connect_timeout(timeout);
        }
        if let Some(app) = &config.application_name {
            pg.application_name(app);
        }

        let (client, connection) = pg.connect(tokio_postgres::NoTls).await.map_err(|e| {
            Error::connection_with_source(
                format!(
                    "failed to connect to {}:{}/{} as {}",
                    config.host,
                    config.port,
                    config.database,
                    resolved.user()
                ),
                e,
            )
        })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection terminated with error");
            }
        });

        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            user = %resolved.user(),
            "opened postgres session"
        );

        Ok(Self {
            client,
            driver,
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
        })
    }

    /// Get the age of this session (time since open)
    #[inline]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) || self.client.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }

    async fn prepare_bound(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<(tokio_postgres::Statement, Vec<BoxedParam>)> {
        self.ensure_open()?;

        let stmt = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| classify_pg_error(e, sql))?;
        let bound = bind_params(stmt.params(), params, sql)?;
        Ok((stmt, bound))
    }
}

fn param_refs(bound: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    bound
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let (stmt, bound) = self.prepare_bound(sql, params).await?;

        let pg_rows = self
            .client
            .query(&stmt, &param_refs(&bound))
            .await
            .map_err(|e| classify_pg_error(e, sql))?;

        debug!(rows = pg_rows.len(), sql, "query");
        pg_rows.iter().map(pg_row_to_record).collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let (stmt, bound) = self.prepare_bound(sql, params).await?;

        let affected = self
            .client
            .execute(&stmt, &param_refs(&bound))
            .await
            .map_err(|e| classify_pg_error(e, sql))?;

        debug!(affected, sql, "execute");
        Ok(affected)
    }

    async fn is_valid(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.driver.abort();
            info!(age_ms = self.age().as_millis() as u64, "closed postgres session");
        }
        Ok(())
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// PostgreSQL schema provider
pub struct PgSchemaProvider {
    conn: Arc<dyn Connection>,
    dialect: PostgresDialect,
}

impl PgSchemaProvider {
    /// Create a new schema provider
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn,
            dialect: PostgresDialect,
        }
    }
}

fn column_from_row(row: &Record) -> ColumnMetadata {
    let text = |name: &str| row.get(name).and_then(Value::as_str).map(String::from);
    let number = |name: &str| {
        row.get(name)
            .and_then(Value::as_i64)
            .and_then(|v| u32::try_from(v).ok())
    };

    ColumnMetadata {
        name: text("column_name").unwrap_or_default(),
        type_name: text("data_type").unwrap_or_default(),
        nullable: row
            .get("nullable")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        primary_key_ordinal: number("pk_ordinal"),
        ordinal: number("ordinal_position").unwrap_or(0),
        max_length: number("character_maximum_length"),
        precision: number("numeric_precision"),
        scale: number("numeric_scale"),
        default_value: text("column_default"),
        udt_schema: text("udt_schema"),
        udt_name: text("udt_name"),
    }
}

#[async_trait]
impl SchemaProvider for PgSchemaProvider {
    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        let schema = schema.unwrap_or("public");
        let rows = self
            .conn
            .query(
                "SELECT table_name::text AS table_name FROM information_schema.tables \
                 WHERE table_schema = $1::text AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[Value::String(schema.to_string())],
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|r| r.get("table_name").and_then(|v| v.as_str().map(String::from)))
            .collect())
    }

    async fn get_table(&self, schema: Option<&str>, table: &str) -> Result<Option<TableMetadata>> {
        let schema = schema.unwrap_or("public");
        let rows = self
            .conn
            .query(
                self.dialect.list_columns_sql(),
                &[
                    Value::String(schema.to_string()),
                    Value::String(table.to_string()),
                ],
            )
            .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut table_meta = TableMetadata::new(table);
        table_meta.schema = Some(schema.to_string());
        table_meta.columns = rows.iter().map(column_from_row).collect();
        table_meta.columns.sort_by_key(|c| c.ordinal);

        Ok(Some(table_meta))
    }
}

/// Adapter backed by a PostgreSQL session
pub type PgAdapter = RelationalAdapter;

impl RelationalAdapter {
    /// Open a PostgreSQL session and wrap it in an adapter
    pub async fn connect(config: &ConnectionConfig) -> Result<PgAdapter> {
        connect(config).await
    }
}

/// Connect to PostgreSQL and return an adapter owning the session
pub async fn connect(config: &ConnectionConfig) -> Result<PgAdapter> {
    let resolved = config.resolve()?;
    let conn: Arc<dyn Connection> = Arc::new(PgConnection::open(&resolved).await?);
    let catalog = PgSchemaProvider::new(Arc::clone(&conn));

    Ok(RelationalAdapter::new(
        conn,
        Box::new(catalog),
        Box::new(PostgresDialect),
        resolved,
    ))
}
