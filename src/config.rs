//! Runtime configuration (§10.3): CLI flags merged over environment
//! variables merged over an optional TOML file, with fixed defaults.

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub root_path: Option<String>,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: f64,
    pub request_timeout_secs: u64,
    pub auth_mode: String,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            http_port: 8080,
            ws_port: 8765,
            root_path: None,
            rate_limit_rps: 10.0,
            rate_limit_burst: 20.0,
            request_timeout_secs: 30,
            auth_mode: "none".into(),
            debug: false,
        }
    }
}

impl Config {
    /// Load a TOML file if it exists, falling back to defaults; environment
    /// variables (`MCP_*`) override file values; the caller layers CLI flags
    /// on top via [`Config::apply_cli`].
    pub fn load(path: Option<&str>) -> Self {
        let mut config = path
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|contents| toml::from_str(&contents).ok())
            .unwrap_or_default();
        Self::apply_env(&mut config);
        config
    }

    fn apply_env(config: &mut Config) {
        if let Ok(v) = std::env::var("MCP_HOST") {
            config.host = v;
        }
        if let Ok(v) = std::env::var("MCP_HTTP_PORT") {
            if let Ok(p) = v.parse() {
                config.http_port = p;
            }
        }
        if let Ok(v) = std::env::var("MCP_WS_PORT") {
            if let Ok(p) = v.parse() {
                config.ws_port = p;
            }
        }
        if let Ok(v) = std::env::var("MCP_RATE_LIMIT_RPS") {
            if let Ok(p) = v.parse() {
                config.rate_limit_rps = p;
            }
        }
        if let Ok(v) = std::env::var("MCP_RATE_LIMIT_BURST") {
            if let Ok(p) = v.parse() {
                config.rate_limit_burst = p;
            }
        }
        if let Ok(v) = std::env::var("MCP_AUTH_MODE") {
            config.auth_mode = v;
        }
        if let Ok(v) = std::env::var("MCP_REQUEST_TIMEOUT_SECS") {
            if let Ok(p) = v.parse() {
                config.request_timeout_secs = p;
            }
        }
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        self.host = cli.host.clone().unwrap_or_else(|| self.host.clone());
        if let Some(p) = cli.http_port {
            self.http_port = p;
        }
        if let Some(p) = cli.ws_port {
            self.ws_port = p;
        }
        if cli.root_path.is_some() {
            self.root_path = cli.root_path.clone();
        }
        self.debug |= cli.debug;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stdio,
    Http,
    WebSocket,
}

#[derive(Parser, Debug)]
#[command(name = "mcp-agent", about = "MCP server runtime with agent orchestration")]
pub struct Cli {
    #[arg(long)]
    pub stdio: bool,
    #[arg(long)]
    pub http: bool,
    #[arg(long)]
    pub websocket: bool,
    #[arg(long, env = "MCP_HOST")]
    pub host: Option<String>,
    #[arg(long, env = "MCP_HTTP_PORT")]
    pub http_port: Option<u16>,
    #[arg(long, env = "MCP_WS_PORT")]
    pub ws_port: Option<u16>,
    #[arg(long)]
    pub root_path: Option<String>,
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// No-mode flag combination defaults to HTTP (§6).
    pub fn mode(&self) -> TransportMode {
        if self.stdio {
            TransportMode::Stdio
        } else if self.websocket {
            TransportMode::WebSocket
        } else {
            TransportMode::Http
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.ws_port, 8765);
    }

    #[test]
    fn no_mode_flags_default_to_http() {
        let cli = Cli { stdio: false, http: false, websocket: false, host: None, http_port: None, ws_port: None, root_path: None, debug: false };
        assert_eq!(cli.mode(), TransportMode::Http);
    }

    #[test]
    fn stdio_flag_takes_priority() {
        let cli = Cli { stdio: true, http: false, websocket: true, host: None, http_port: None, ws_port: None, root_path: None, debug: false };
        assert_eq!(cli.mode(), TransportMode::Stdio);
    }
}
