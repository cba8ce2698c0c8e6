use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Protocol + transport constants — see spec.md §5/§6 for the invariants
// these enforce (payload cap, handshake deadline, heartbeat cadence).
pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 7824;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Top-level config (`conduit.toml` + `CONDUIT_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConduitConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

impl Default for ConduitConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            hub: HubConfig::default(),
            database: DatabaseConfig::default(),
            history: HistoryConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

impl ConduitConfig {
    /// Load config from a TOML file with `CONDUIT_*` env var overrides.
    ///
    /// Checks in order: explicit path argument, then `CONDUIT_CONFIG`, then
    /// `~/.conduit/conduit.toml`. Missing files are not an error — callers
    /// fall back to `ConduitConfig::default()`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CONDUIT_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: ConduitConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CONDUIT_").split("_"))
            .extract()
            .map_err(|e| crate::error::ConduitError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.conduit/conduit.toml", home)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

/// Tunables for the Session Hub (C6): LRU size, queue depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Max number of `LogicalSessionState`s cached in memory at once.
    /// Spec default: 100. Sessions with an active run or attached
    /// connections are never evicted regardless of this cap.
    #[serde(default = "default_max_cached_sessions")]
    pub max_cached_sessions: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_cached_sessions: default_max_cached_sessions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where to look for external-CLI session files (C2 translation sources).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_claude_base_dir")]
    pub claude_base_dir: String,
    #[serde(default = "default_pi_base_dir")]
    pub pi_base_dir: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            claude_base_dir: default_claude_base_dir(),
            pi_base_dir: default_pi_base_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Default timeout for a pending interaction (C9) before it resolves
    /// to `{error: "timeout"}`.
    #[serde(default = "default_interaction_timeout_ms")]
    pub interaction_timeout_ms: u64,
    /// Default timeout applied to a single tool call inside the run
    /// controller's tool loop (a child of the run's cancel token, §5).
    #[serde(default = "default_tool_call_timeout_ms")]
    pub tool_call_timeout_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            interaction_timeout_ms: default_interaction_timeout_ms(),
            tool_call_timeout_ms: default_tool_call_timeout_ms(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_max_cached_sessions() -> usize {
    100
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.conduit/conduit.db", home)
}
fn default_claude_base_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.claude/projects", home)
}
fn default_pi_base_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pi/sessions", home)
}
fn default_handshake_timeout_ms() -> u64 {
    HANDSHAKE_TIMEOUT_MS
}
fn default_heartbeat_interval_secs() -> u64 {
    HEARTBEAT_INTERVAL_SECS
}
fn default_interaction_timeout_ms() -> u64 {
    120_000
}
fn default_tool_call_timeout_ms() -> u64 {
    300_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = ConduitConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.hub.max_cached_sessions, 100);
    }

    #[test]
    fn loads_overrides_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nport = 9999\nbind = \"0.0.0.0\"\n").unwrap();
        writeln!(file, "[hub]\nmax_cached_sessions = 5\n").unwrap();
        let cfg = ConduitConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(cfg.gateway.port, 9999);
        assert_eq!(cfg.gateway.bind, "0.0.0.0");
        assert_eq!(cfg.hub.max_cached_sessions, 5);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ConduitConfig::load(Some("/nonexistent/path/conduit.toml")).unwrap();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
    }
}
