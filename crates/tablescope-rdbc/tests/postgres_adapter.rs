//! PostgreSQL adapter integration tests
//!
//! End-to-end tests for the relational adapter against a real PostgreSQL
//! server started with testcontainers.
//!
//! Run with: cargo test -p tablescope-rdbc --test postgres_adapter -- --nocapture
//!
//! Requirements: Docker must be running. Without it every test logs a
//! notice and returns early.

#![cfg(feature = "postgres")]

use std::time::Duration;

use anyhow::Result;
use tablescope_rdbc::config::current_os_user;
use tablescope_rdbc::connection::Connection;
use tablescope_rdbc::dialect::{PostgresDialect, SqlDialect};
use tablescope_rdbc::error::{Error, ErrorCategory};
use tablescope_rdbc::prelude::*;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::time::sleep;
use tracing::{info, warn};

const DB: &str = "testdb";
const ADMIN_USER: &str = "testuser";
const ADMIN_PASSWORD: &str = "testpass";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tablescope_rdbc=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// PostgreSQL test container, one per test
struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    host: String,
    port: u16,
}

impl TestPostgres {
    /// Start a container, or `None` when Docker is not available
    async fn start() -> Option<Self> {
        init_tracing();

        let container = match Postgres::default()
            .with_env_var("POSTGRES_DB", DB)
            .with_env_var("POSTGRES_USER", ADMIN_USER)
            .with_env_var("POSTGRES_PASSWORD", ADMIN_PASSWORD)
            .start()
            .await
        {
            Ok(container) => container,
            Err(e) => {
                warn!("skipping: cannot start PostgreSQL container: {}", e);
                return None;
            }
        };

        let host = container.get_host().await.ok()?.to_string();
        let mut port = None;
        for i in 0..10 {
            match container.get_host_port_ipv4(5432).await {
                Ok(p) => {
                    port = Some(p);
                    break;
                }
                Err(e) => {
                    tracing::debug!(
                        "Waiting for PostgreSQL port exposure (attempt {}): {}",
                        i + 1,
                        e
                    );
                    sleep(Duration::from_millis(100 * (i + 1) as u64)).await;
                }
            }
        }

        Some(Self {
            _container: container,
            host,
            port: port?,
        })
    }

    fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(&self.host, DB).with_port(self.port)
    }

    fn admin_config(&self) -> ConnectionConfig {
        self.config()
            .with_user(ADMIN_USER)
            .with_password(ADMIN_PASSWORD)
    }

    /// Connect as the admin role, retrying while the server starts up
    async fn admin(&self) -> Result<PgAdapter> {
        let config = self.admin_config();
        for i in 0..30 {
            match PgAdapter::connect(&config).await {
                Ok(adapter) => {
                    info!("PostgreSQL ready after {} attempts", i + 1);
                    return Ok(adapter);
                }
                Err(e) if e.category() == ErrorCategory::Connection => {
                    tracing::debug!("Waiting for PostgreSQL (attempt {}): {}", i + 1, e);
                    sleep(Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        anyhow::bail!("PostgreSQL did not become ready in time")
    }

    /// Admin adapter over a `users` table with ids 1..=20
    async fn seeded(&self) -> Result<PgAdapter> {
        let adapter = self.admin().await?;
        let conn = adapter.connection();

        conn.execute(
            "CREATE TABLE users (\
                id INTEGER PRIMARY KEY, \
                username VARCHAR(25) NOT NULL, \
                age INTEGER)",
            &[],
        )
        .await?;
        conn.execute(
            "INSERT INTO users (id, username, age) \
             SELECT n, 'user' || n, n + 10 FROM generate_series(1, 20) AS n",
            &[],
        )
        .await?;

        Ok(adapter)
    }
}

macro_rules! require_postgres {
    () => {
        match TestPostgres::start().await {
            Some(pg) => pg,
            None => return Ok(()),
        }
    };
}

fn username(record: &Record) -> Option<&str> {
    record.get("username").and_then(Value::as_str)
}

async fn count(adapter: &PgAdapter) -> Result<usize> {
    Ok(adapter.find("users", &FindOptions::new()).await?.len())
}

async fn find_by_id(adapter: &PgAdapter, id: i64) -> Result<Option<Record>> {
    let records = adapter.find("users", &FindOptions::new()).await?;
    Ok(records
        .into_iter()
        .find(|r| r.get("id").and_then(Value::as_i64) == Some(id)))
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_connect_and_close() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.admin().await?;

    assert!(adapter.is_connected().await);
    assert_eq!(adapter.user(), ADMIN_USER);

    adapter.close().await?;
    adapter.close().await?;
    assert!(!adapter.is_connected().await);

    let err = adapter.collections().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connection);
    Ok(())
}

#[tokio::test]
async fn test_connect_failures_are_connection_errors() -> Result<()> {
    let pg = require_postgres!();
    pg.admin().await?;

    let wrong_password = pg.config().with_user(ADMIN_USER).with_password("nope");
    let err = PgAdapter::connect(&wrong_password).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connection);

    let mut unknown_db = pg.admin_config();
    unknown_db.database = "missing_db".into();
    let err = PgAdapter::connect(&unknown_db).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connection);
    Ok(())
}

#[tokio::test]
async fn test_connect_defaults_to_os_user() -> Result<()> {
    let pg = require_postgres!();
    let admin = pg.seeded().await?;

    let Some(os_user) = current_os_user() else {
        warn!("skipping: OS user cannot be determined");
        return Ok(());
    };

    if os_user != ADMIN_USER {
        let role = PostgresDialect.quote_identifier(&os_user);
        let conn = admin.connection();
        conn.execute(
            &format!("CREATE ROLE {} LOGIN PASSWORD '{}'", role, ADMIN_PASSWORD),
            &[],
        )
        .await?;
        conn.execute(&format!("GRANT SELECT ON users TO {}", role), &[])
            .await?;
    }

    let adapter = PgAdapter::connect(&pg.config().with_password(ADMIN_PASSWORD)).await?;
    assert_eq!(adapter.user(), os_user);
    assert_eq!(adapter.collections().await?, vec!["users"]);
    assert_eq!(adapter.primary_key_for("users").await?, "id");
    Ok(())
}

#[tokio::test]
async fn test_read_only_role_sees_primary_key() -> Result<()> {
    let pg = require_postgres!();
    let admin = pg.seeded().await?;
    let conn = admin.connection();
    conn.execute(
        &format!("CREATE ROLE reader LOGIN PASSWORD '{}'", ADMIN_PASSWORD),
        &[],
    )
    .await?;
    conn.execute("GRANT SELECT ON users TO reader", &[]).await?;

    let reader = PgAdapter::connect(
        &pg.config()
            .with_user("reader")
            .with_password(ADMIN_PASSWORD),
    )
    .await?;

    assert_eq!(reader.primary_key_for("users").await?, "id");

    let schema = reader.schema("users").await?;
    assert!(schema[0].is_primary_key());
    assert!(schema[1..].iter().all(|c| !c.is_primary_key()));

    let page = reader
        .find("users", &FindOptions::new().desc().limit(1))
        .await?;
    assert_eq!(username(&page[0]), Some("user20"));

    let err = reader
        .update("users", &Value::Int32(1), &[("age", Value::Int32(1))])
        .await
        .unwrap_err();
    assert!(!err.is_not_found());
    Ok(())
}

// ============================================================================
// Introspection
// ============================================================================

#[tokio::test]
async fn test_collections_and_primary_key() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    assert_eq!(adapter.collections().await?, vec!["users"]);

    let pk = adapter.primary_key_for("users").await?;
    assert_eq!(pk, "id");
    let schema = adapter.schema("users").await?;
    assert!(schema.iter().any(|c| c.name == pk));
    Ok(())
}

#[tokio::test]
async fn test_schema_follows_declared_order() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    let schema = adapter.schema("users").await?;
    let names: Vec<_> = schema.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "username", "age"]);

    assert_eq!(schema[0].type_name, "integer");
    assert!(schema[0].is_primary_key());
    assert!(!schema[0].nullable);
    assert_eq!(schema[1].type_name, "character varying");
    assert_eq!(schema[1].max_length, Some(25));
    assert_eq!(
        schema.iter().map(|c| c.ordinal).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_collection() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    let err = adapter.schema("ghosts").await.unwrap_err();
    assert!(matches!(err, Error::CollectionNotFound { .. }));

    let err = adapter
        .find("ghosts", &FindOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Schema);
    Ok(())
}

#[tokio::test]
async fn test_table_without_primary_key() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;
    adapter
        .connection()
        .execute("CREATE TABLE audit_log (message TEXT)", &[])
        .await?;

    assert_eq!(adapter.collections().await?, vec!["audit_log", "users"]);

    let err = adapter.primary_key_for("audit_log").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Schema);

    let err = adapter
        .delete("audit_log", &Value::from("x"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Schema);
    Ok(())
}

#[tokio::test]
async fn test_collection_and_field_names_need_not_be_identifiers() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;
    adapter
        .connection()
        .execute(
            r#"CREATE TABLE "order-items" (id INTEGER PRIMARY KEY, "unit price" NUMERIC(10,2))"#,
            &[],
        )
        .await?;

    assert_eq!(adapter.collections().await?, vec!["order-items", "users"]);
    assert_eq!(adapter.primary_key_for("order-items").await?, "id");
    let names: Vec<_> = adapter
        .schema("order-items")
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["id", "unit price"]);

    adapter
        .create(
            "order-items",
            &[("id", Value::Int32(1)), ("unit price", Value::from("12.50"))],
        )
        .await?;
    adapter
        .update(
            "order-items",
            &Value::Int32(1),
            &[("unit price", Value::Float64(9.75))],
        )
        .await?;

    let items = adapter.find("order-items", &FindOptions::new()).await?;
    assert_eq!(adapter.fields_for(&items)?, vec!["id", "unit price"]);
    assert_eq!(
        items[0].get("unit price"),
        Some(&Value::Decimal(rust_decimal::Decimal::new(975, 2)))
    );

    adapter.delete("order-items", &Value::Int32(1)).await?;
    assert!(adapter
        .find("order-items", &FindOptions::new())
        .await?
        .is_empty());

    let err = adapter
        .find("order-items; DROP TABLE users", &FindOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CollectionNotFound { .. }));
    assert_eq!(count(&adapter).await?, 20);
    Ok(())
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_find_scenarios() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    let all = adapter.find("users", &FindOptions::new()).await?;
    assert_eq!(all.len(), 20);
    assert_eq!(username(&all[0]), Some("user1"));
    assert_eq!(adapter.fields_for(&all)?, vec!["id", "username", "age"]);
    assert_eq!(all[4].get("age").and_then(Value::as_i64), Some(15));

    let first = adapter
        .find("users", &FindOptions::new().limit(1).order_by("username").asc())
        .await?;
    assert_eq!(first.len(), 1);
    assert_eq!(username(&first[0]), Some("user1"));

    let last = adapter
        .find("users", &FindOptions::new().limit(1).order_by("username").desc())
        .await?;
    assert_eq!(username(&last[0]), Some("user9"));

    let skipped = adapter.find("users", &FindOptions::new().skip(10)).await?;
    assert_eq!(skipped.len(), 10);
    assert_eq!(username(&skipped[0]), Some("user11"));

    let twenty = adapter.find("users", &FindOptions::new().limit(20)).await?;
    assert_eq!(twenty.len(), 20);
    Ok(())
}

#[tokio::test]
async fn test_skip_and_direction_are_consistent() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    let by_age = FindOptions::new().order_by("age");
    let all = adapter.find("users", &by_age).await?;

    for k in [0_u64, 3, 19] {
        let page = adapter.find("users", &by_age.clone().skip(k)).await?;
        assert_eq!(page.first(), all.get(k as usize));
    }

    let asc = adapter.find("users", &FindOptions::new().order_by("username").asc()).await?;
    let desc = adapter.find("users", &FindOptions::new().order_by("username").desc()).await?;
    assert_eq!(asc.first(), desc.last());

    let beyond = adapter.find("users", &FindOptions::new().skip(100)).await?;
    assert!(beyond.is_empty());
    let err = adapter.fields_for(&beyond).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::EmptyResult);
    Ok(())
}

#[tokio::test]
async fn test_find_unknown_order_field() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    let err = adapter
        .find("users", &FindOptions::new().order_by("email"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Schema);
    Ok(())
}

#[tokio::test]
async fn test_unmapped_types_round_trip_as_text() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.admin().await?;
    let conn = adapter.connection();
    conn.execute(
        "CREATE TABLE things (id INTEGER PRIMARY KEY, amount NUMERIC, addr INET, note TEXT)",
        &[],
    )
    .await?;
    conn.execute(
        "INSERT INTO things VALUES \
         (1, 123456789012345678901234567890123, '10.0.0.1', 'ok')",
        &[],
    )
    .await?;

    let rows = adapter.find("things", &FindOptions::new()).await?;
    assert_eq!(
        rows[0].get("amount"),
        Some(&Value::from("123456789012345678901234567890123"))
    );
    let addr = rows[0].get("addr").and_then(Value::as_str).unwrap_or_default();
    assert!(addr.starts_with("10.0.0.1"), "{}", addr);
    assert_eq!(rows[0].get("note"), Some(&Value::from("ok")));

    adapter
        .create(
            "things",
            &[
                ("id", Value::Int32(2)),
                ("amount", Value::Int64(7)),
                ("addr", Value::from("10.0.0.2")),
            ],
        )
        .await?;
    adapter
        .update("things", &Value::Int32(2), &[("addr", Value::from("10.0.0.3"))])
        .await?;

    let rows = adapter.find("things", &FindOptions::new().desc().limit(1)).await?;
    assert_eq!(rows[0].get("amount"), Some(&Value::from("7")));

    let by_amount = adapter
        .find("things", &FindOptions::new().order_by("amount"))
        .await?;
    assert_eq!(by_amount[0].get("id"), Some(&Value::Int32(2)));
    let addr = rows[0].get("addr").and_then(Value::as_str).unwrap_or_default();
    assert!(addr.starts_with("10.0.0.3"), "{}", addr);

    let err = adapter
        .create(
            "things",
            &[("id", Value::Int32(3)), ("addr", Value::from("not-an-ip"))],
        )
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Constraint);
    Ok(())
}

// ============================================================================
// Mutation
// ============================================================================

#[tokio::test]
async fn test_create() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    adapter
        .create(
            "users",
            &[
                ("id", Value::Int64(999)),
                ("username", Value::from("bob")),
                ("age", Value::from("42")),
            ],
        )
        .await?;

    assert_eq!(count(&adapter).await?, 21);
    let bob = find_by_id(&adapter, 999).await?.expect("created record");
    assert_eq!(username(&bob), Some("bob"));
    assert_eq!(bob.get("age"), Some(&Value::Int32(42)));
    Ok(())
}

#[tokio::test]
async fn test_create_constraint_violations() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    let err = adapter
        .create(
            "users",
            &[("id", Value::Int32(1)), ("username", Value::from("dup"))],
        )
        .await
        .unwrap_err();
    match &err {
        Error::Constraint {
            constraint_name, ..
        } => assert_eq!(constraint_name.as_deref(), Some("users_pkey")),
        other => panic!("unexpected error: {other:?}"),
    }

    let err = adapter
        .create(
            "users",
            &[
                ("id", Value::Int32(500)),
                ("username", Value::from("eve")),
                ("age", Value::from("abc")),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Constraint);

    let err = adapter
        .create("users", &[("id", Value::Int32(501))])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Constraint);

    assert_eq!(count(&adapter).await?, 20);
    Ok(())
}

#[tokio::test]
async fn test_partial_update() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    let before = find_by_id(&adapter, 7).await?.expect("seeded record");
    adapter
        .update("users", &Value::Int32(7), &[("age", Value::Int32(99))])
        .await?;
    let after = find_by_id(&adapter, 7).await?.expect("updated record");

    assert_eq!(after.get("age"), Some(&Value::Int32(99)));
    assert_eq!(after.get("username"), before.get("username"));
    assert_eq!(count(&adapter).await?, 20);

    adapter
        .update("users", &Value::Int32(8), &[("age", Value::Null)])
        .await?;
    let nulled = find_by_id(&adapter, 8).await?.expect("updated record");
    assert!(nulled.get("age").is_some_and(Value::is_null));
    Ok(())
}

#[tokio::test]
async fn test_update_missing_record() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    let err = adapter
        .update("users", &Value::Int32(404), &[("age", Value::Int32(1))])
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = adapter
        .update("users", &Value::Int32(1), &[])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    Ok(())
}

#[tokio::test]
async fn test_delete() -> Result<()> {
    let pg = require_postgres!();
    let adapter = pg.seeded().await?;

    adapter.delete("users", &Value::Int32(3)).await?;
    assert_eq!(count(&adapter).await?, 19);
    assert!(find_by_id(&adapter, 3).await?.is_none());

    let err = adapter.delete("users", &Value::Int32(3)).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(count(&adapter).await?, 19);
    Ok(())
}
