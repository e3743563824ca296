//! `mcp-agent`: a Model Context Protocol runtime (server, client, multiple
//! transports) plus an agent orchestration core built on top of it.
//!
//! ```rust
//! use mcp_agent::protocol;
//!
//! let frame = protocol::decode(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
//! assert!(matches!(frame, protocol::Frame::Request(_)));
//! ```

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod types;

pub use error::{Error, ErrorCode, Result};
