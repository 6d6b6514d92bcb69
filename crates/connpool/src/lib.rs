//! Single-connection serializing pool.
//!
//! Many tasks share one long-lived stream to a remote peer. Each caller hands
//! the pool a work unit; a dedicated actor task runs work units one at a time
//! with exclusive use of the connection, opening it lazily, draining stale
//! inbound bytes before every unit, and closing it after fatal network errors
//! or a period of inactivity.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  run(ctx, work)   ┌────────────────────────────────────┐
//! │ caller A │ ────────────────► │ Pool (cloneable handle)            │
//! ├──────────┤                   │   mailbox ──► actor task           │
//! │ caller B │ ────────────────► │                │                   │
//! └──────────┘                   │                ▼                   │
//!                                │   ConnectionFactory ──► Conn<S>    │
//!                                │   (lazy open)     BufReader/Writer │
//!                                └────────────────────────────────────┘
//! ```
//!
//! - [`pool`]: the actor, request lifecycle, idle expiry
//! - [`conn`]: buffered stream with per-direction deadlines
//! - [`context`]: cancellation and deadlines carried by each request
//! - [`factory`]: how the pool obtains raw streams
//! - [`logger`]: where lifecycle messages go
//! - [`config`]: ttl and delay, optionally from TOML
//! - [`error`]: error types and the network/application split

pub mod config;
pub mod conn;
pub mod context;
pub mod error;
pub mod factory;
pub mod logger;
pub mod pool;

pub use config::{PoolConfig, parse_duration};
pub use conn::Conn;
pub use context::Context;
pub use error::{ConfigError, ConnError, ContextError, DrainError, PoolError, WorkError};
pub use factory::{ConnectFuture, ConnectionFactory};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use pool::{Pool, PoolStats, WorkFuture};
