//! Connection trait for tablescope-rdbc
//!
//! The driver collaborator as the adapter sees it: statement execution
//! returning decoded rows, a liveness check, and an explicit close.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Record, Value};

/// A single exclusively-owned database session
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>>;

    /// Execute a statement that modifies data, returns affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;
}
