//! # Turul RPC client
//!
//! Connects to a Turul RPC server, authenticates with a client id and
//! secret, and issues requests, streams, batches and notifications over one
//! multiplexed connection. Optionally reconnects when the connection drops.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use turul_rpc_client::RpcClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RpcClient::builder()
//!         .host("127.0.0.1")
//!         .port(7400)
//!         .credentials("worker-1", "s3cret")
//!         .build()?;
//!
//!     client.connect().await?;
//!     let sum = client.request("add", Some(json!([1, 2]))).await?;
//!     println!("1 + 2 = {}", sum);
//!
//!     client.stream("count", Some(json!({"n": 3})), |item| println!("{}", item)).await?;
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod state;
pub mod streaming;

pub use client::{RpcClient, RpcClientBuilder};
pub use config::{ClientConfig, Credentials, ReconnectPolicy, TimeoutConfig};
pub use error::{ClientError, ClientResult};
pub use state::{ClientEvent, ClientState};
pub use streaming::ChunkStream;

pub use turul_rpc_json_rpc::{Capability, CapabilitySet};
