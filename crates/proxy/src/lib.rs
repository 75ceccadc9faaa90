//! MCP Proxy
//!
//! A gateway that multiplexes a client onto a fleet of MCP backends. Each
//! backend is reached over HTTP or over a supervised subprocess speaking
//! line-delimited JSON; the proxy presents a unified, allow-list-partitioned
//! catalog of tools and resources and routes invocations to the owning
//! backend. Clients talk to the proxy over HTTP or over its own standard
//! streams (JSON-RPC 2.0).

pub mod backend;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod fleet;
pub mod http;
pub mod http_backend;
pub mod metrics;
pub mod supervisor;
pub mod timeouts;
