//! # Turul RPC server
//!
//! Accepts TCP connections, authenticates each one with a handshake, and
//! serves JSON-RPC requests over the authenticated connection.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use turul_rpc_server::prelude::*;
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RpcServer::builder()
//!         .bind_address("127.0.0.1:7400".parse()?)
//!         .client("worker-1", "s3cret")
//!         .method("add", handler_fn(|request: Request, _ctx: SessionContext| async move {
//!             let a = request.param_index(0).and_then(Value::as_i64).unwrap_or(0);
//!             let b = request.param_index(1).and_then(Value::as_i64).unwrap_or(0);
//!             Ok(json!(a + b))
//!         }))
//!         .build()?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod builder;
pub mod config;
pub mod error;
pub mod prelude;
pub mod server;

pub use auth::{AuthConfig, AuthError, AuthManager, DuplicatePolicy};
pub use builder::RpcServerBuilder;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{RpcServer, ServerStats};

// Re-export the layers underneath for convenience
pub use turul_rpc_connection;
pub use turul_rpc_json_rpc;
