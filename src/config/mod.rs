use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4400;
const DEFAULT_AI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_AI_TIMEOUT_SECS: u64 = 120;
const DEFAULT_INDEXER_BASE_URL: &str = "http://127.0.0.1:8100";

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── AiConfig ─────────────────────────────────────────────────────────────────

/// Completion API configuration (`[ai]` in config.toml).
///
/// Any OpenAI-compatible chat-completion endpoint works; only `api_key` has
/// no usable default. `REPOCHAT_AI_KEY` overrides the file value.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Base URL of the completion API (default: https://api.openai.com).
    pub base_url: String,
    /// Bearer token for the completion API.
    pub api_key: String,
    /// Model identifier sent with every completion request.
    pub model: String,
    /// Per-request timeout in seconds (default: 120).
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_AI_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_AI_MODEL.to_string(),
            timeout_secs: DEFAULT_AI_TIMEOUT_SECS,
        }
    }
}

// ─── IndexerConfig ────────────────────────────────────────────────────────────

/// Vector indexing service configuration (`[indexer]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Base URL of the indexing service (default: http://127.0.0.1:8100).
    pub base_url: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_INDEXER_BASE_URL.to_string(),
        }
    }
}

// ─── ForgeEntry ───────────────────────────────────────────────────────────────

/// One configured forge (`[[forge]]` in config.toml). Seeded into the
/// `forges` table at startup, keyed by (kind, client_id).
#[derive(Debug, Clone, Deserialize)]
pub struct ForgeEntry {
    /// Provider kind, e.g. `"github"`.
    pub kind: String,
    /// API host override. Empty = the provider's public host.
    #[serde(default)]
    pub host: String,
    pub client_id: String,
    pub client_secret: String,
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// HTTP server port (default: 4400).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,repochat=trace".
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
    /// Root directory for per-repo working copies (default: {data_dir}/repos).
    data_path: Option<PathBuf>,
    /// Completion API configuration (`[ai]`).
    ai: Option<AiConfig>,
    /// Indexing service configuration (`[indexer]`).
    indexer: Option<IndexerConfig>,
    /// Configured forges (`[[forge]]`).
    #[serde(default)]
    forge: Vec<ForgeEntry>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub bind_address: String,
    pub data_dir: PathBuf,
    /// Root directory for per-repo working copies, snapshots, and issues.
    pub data_path: PathBuf,
    pub log: String,
    /// "pretty" | "json".
    pub log_format: String,
    pub ai: AiConfig,
    pub indexer: IndexerConfig,
    pub forges: Vec<ForgeEntry>,
}

impl AppConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("REPOCHAT_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("REPOCHAT_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let data_path = toml
            .data_path
            .unwrap_or_else(|| data_dir.join("repos"));

        let mut ai = toml.ai.unwrap_or_default();
        if let Ok(key) = std::env::var("REPOCHAT_AI_KEY") {
            if !key.is_empty() {
                ai.api_key = key;
            }
        }

        let indexer = toml.indexer.unwrap_or_default();
        let forges = toml.forge;

        Self {
            port,
            bind_address,
            data_dir,
            data_path,
            log,
            log_format,
            ai,
            indexer,
            forges,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/repochat
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("repochat");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/repochat or ~/.local/share/repochat
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("repochat");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("repochat");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\repochat
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("repochat");
        }
    }
    // Fallback
    PathBuf::from(".repochat")
}
