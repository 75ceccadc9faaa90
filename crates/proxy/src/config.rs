//! Configuration parsing and validation.
//!
//! The proxy is configured by a JSON file with a single `mcp_servers` array.
//! The path comes from `--config` or `MCP_PROXY_CONFIG`; the frontend mode
//! from `--mode` or `MCP_PROXY_MODE` (the flag wins when both are set).

use crate::error::{ProxyError, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ============================================================================
// CLI Arguments
// ============================================================================

/// CLI arguments for the proxy.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-proxy")]
#[command(
    version,
    about = "Gateway that multiplexes a client onto a fleet of MCP backends"
)]
pub struct CliArgs {
    /// Path to the JSON configuration file.
    #[arg(short = 'c', long = "config", env = "MCP_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Frontend mode.
    #[arg(
        short = 'm',
        long = "mode",
        env = "MCP_PROXY_MODE",
        value_enum,
        default_value = "http"
    )]
    pub mode: Mode,

    /// HTTP bind address (ip:port), used in http mode.
    #[arg(
        short = 'b',
        long = "bind",
        env = "MCP_PROXY_BIND",
        default_value = "0.0.0.0:8080"
    )]
    pub bind: String,

    /// Log level. Supports tracing filter syntax.
    #[arg(short = 'l', long = "log-level", env = "MCP_PROXY_LOG")]
    pub log_level: Option<String>,
}

/// How the proxy talks to its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// HTTP server frontend.
    #[value(name = "http")]
    Http,
    /// JSON-RPC over the proxy's own standard streams.
    #[value(name = "command")]
    Command,
}

// ============================================================================
// Configuration File
// ============================================================================

/// Top-level configuration: the backend fleet.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mcp_servers: Vec<BackendConfig>,
}

/// Declarative configuration for a single MCP backend.
///
/// Exactly one of `address` (HTTP backend) or `command` (subprocess backend)
/// must be set. Empty allow-lists mean "allow everything".
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Unique backend name.
    pub name: String,

    /// Base URL of an HTTP MCP backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Executable path for a subprocess backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments passed to the subprocess.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment layered onto the proxy's own environment (config wins).
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Tool names exposed through the proxy.
    #[serde(default)]
    pub allowed_tools: Vec<String>,

    /// Resource names exposed through the proxy.
    #[serde(default)]
    pub allowed_resources: Vec<String>,
}

impl Config {
    /// Load and validate the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;

        let config: Config = serde_json::from_str(&data)
            .map_err(|e| ProxyError::Config(format!("failed to parse config JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the fleet definition.
    pub fn validate(&self) -> Result<()> {
        if self.mcp_servers.is_empty() {
            return Err(ProxyError::Config(
                "no MCP servers defined in configuration".to_string(),
            ));
        }

        let mut names: Vec<&str> = Vec::with_capacity(self.mcp_servers.len());
        for (i, server) in self.mcp_servers.iter().enumerate() {
            if server.name.trim().is_empty() {
                return Err(ProxyError::Config(format!(
                    "mcp_servers[{i}]: name is required"
                )));
            }
            if names.contains(&server.name.as_str()) {
                return Err(ProxyError::Config(format!(
                    "mcp_servers[{i}]: duplicate server name '{}'",
                    server.name
                )));
            }
            names.push(&server.name);

            let has_address = server
                .address
                .as_deref()
                .is_some_and(|a| !a.trim().is_empty());
            let has_command = server
                .command
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty());

            match (has_address, has_command) {
                (false, false) => {
                    return Err(ProxyError::Config(format!(
                        "mcp_servers[{i}]: either address or command is required"
                    )));
                }
                (true, true) => {
                    return Err(ProxyError::Config(format!(
                        "mcp_servers[{i}]: address and command are mutually exclusive"
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
