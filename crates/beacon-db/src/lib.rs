//! Database layer for the Beacon platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. The incident record store is the sole source
//! of truth for incident state between operations; the core never caches
//! beyond the scope of a single operation.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: single-process deployment needs no external
//!   database server, and WAL allows concurrent readers with a single writer.
//! - **`r2d2` connection pool**: bounded connection reuse; request handlers
//!   check out a connection inside `spawn_blocking` and return it on drop.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` so the schema cannot drift from the code that uses it.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
