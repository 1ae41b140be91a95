use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level lamgate configuration, loaded from `config.toml`.
///
/// Resolution order: `LAMGATE_CONFIG_DIR` env → `~/.lamgate/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Which inference backend to use (`[transport]`).
    #[serde(default)]
    pub transport: TransportConfig,

    /// Direct HTTP backend settings (`[direct]`).
    #[serde(default)]
    pub direct: DirectConfig,

    /// MQTT broker backend settings (`[broker]`).
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Sampling parameters sent with every inference call (`[generation]`).
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Concurrency and history-window limits (`[limits]`).
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Maze stuck-detection knobs (`[maze]`).
    #[serde(default)]
    pub maze: MazeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            transport: TransportConfig::default(),
            direct: DirectConfig::default(),
            broker: BrokerConfig::default(),
            generation: GenerationConfig::default(),
            limits: LimitsConfig::default(),
            maze: MazeConfig::default(),
        }
    }
}

// ── Transport selection ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Direct,
    Broker,
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::Direct
    }
}

impl TransportKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "broker" => Some(Self::Broker),
            _ => None,
        }
    }
}

/// Transport selection (`[transport]` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// `"direct"` for HTTP to the inference server, `"broker"` for MQTT.
    #[serde(default)]
    pub kind: TransportKind,
}

// ── Direct HTTP backend ──────────────────────────────────────────

/// Direct HTTP backend configuration (`[direct]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectConfig {
    /// Inference server base URL, or the full chat completions endpoint.
    /// Overridden by `LAMGATE_SERVER_URL`.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Bearer token, for servers that require one. Local llama.cpp does not.
    /// Overridden by `LAMGATE_API_KEY` or `API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model name passed through to the server. Overridden by `LAMGATE_MODEL`.
    #[serde(default = "default_model")]
    pub model: String,
    /// Whole-request timeout. Maps to `InferenceTimeout` on expiry.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".into()
}

fn default_model() -> String {
    "qwen2.5-7b-instruct".into()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            api_key: None,
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── MQTT broker backend ──────────────────────────────────────────

/// MQTT broker backend configuration (`[broker]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker host. Overridden by `LAMGATE_MQTT_HOST`.
    #[serde(default = "default_broker_host")]
    pub host: String,
    /// Broker port. Overridden by `LAMGATE_MQTT_PORT`.
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// MQTT client id. Must be unique per bridge instance on the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Topic prefix: requests go to `{prefix}/request/{session_id}`,
    /// replies are expected on `{prefix}/reply/{session_id}`.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// How long to wait for a correlated reply before giving up.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_broker_host() -> String {
    "127.0.0.1".into()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "lamgate-bridge".into()
}

fn default_topic_prefix() -> String {
    "lam".into()
}

fn default_reply_timeout_secs() -> u64 {
    120
}

fn default_keep_alive_secs() -> u64 {
    30
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_client_id(),
            topic_prefix: default_topic_prefix(),
            reply_timeout_secs: default_reply_timeout_secs(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

// ── Generation ───────────────────────────────────────────────────

/// Sampling parameters (`[generation]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Model temperature (0.0–2.0). Default: `0.7`.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Nucleus sampling cutoff (0.0–1.0). Default: `0.9`.
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}

fn default_max_tokens() -> u32 {
    512
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
        }
    }
}

// ── Limits ───────────────────────────────────────────────────────

/// Concurrency and history-window limits (`[limits]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inference calls in flight across all sessions.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// How long a caller may wait for a gate permit before `GateTimeout`.
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,
    /// History pairs kept for chat sessions. Chat wants depth.
    #[serde(default = "default_chat_history_pairs")]
    pub chat_history_pairs: usize,
    /// History pairs kept for maze sessions. The game only needs the last
    /// few exchanges, and short prompts keep inference fast.
    #[serde(default = "default_maze_history_pairs")]
    pub maze_history_pairs: usize,
}

fn default_max_inflight() -> usize {
    8
}

fn default_gate_timeout_secs() -> u64 {
    30
}

fn default_chat_history_pairs() -> usize {
    10
}

fn default_maze_history_pairs() -> usize {
    3
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_inflight: default_max_inflight(),
            gate_timeout_secs: default_gate_timeout_secs(),
            chat_history_pairs: default_chat_history_pairs(),
            maze_history_pairs: default_maze_history_pairs(),
        }
    }
}

// ── Maze ─────────────────────────────────────────────────────────

/// Stuck-detection knobs (`[maze]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MazeConfig {
    /// Consecutive identical positions that count as stuck.
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: usize,
    /// Positions remembered per session.
    #[serde(default = "default_position_history_len")]
    pub position_history_len: usize,
}

fn default_stuck_threshold() -> usize {
    3
}

fn default_position_history_len() -> usize {
    10
}

impl Default for MazeConfig {
    fn default() -> Self {
        Self {
            stuck_threshold: default_stuck_threshold(),
            position_history_len: default_position_history_len(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

fn default_config_dir() -> Result<PathBuf> {
    if let Ok(custom) = std::env::var("LAMGATE_CONFIG_DIR") {
        let custom = custom.trim();
        if !custom.is_empty() {
            return Ok(PathBuf::from(custom));
        }
    }

    let user_dirs = UserDirs::new().context("Could not determine home directory")?;
    Ok(user_dirs.home_dir().join(".lamgate"))
}

impl Config {
    pub async fn load_or_init() -> Result<Self> {
        let config_dir = default_config_dir()?;
        Self::load_or_init_at(&config_dir).await
    }

    pub async fn load_or_init_at(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");

        fs::create_dir_all(config_dir)
            .await
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config
        } else {
            let config = Config::default();
            let rendered =
                toml::to_string_pretty(&config).context("Failed to serialize default config")?;
            fs::write(&config_path, rendered)
                .await
                .context("Failed to write default config file")?;
            config
        };

        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            transport = ?config.transport.kind,
            "Config loaded"
        );
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LAMGATE_SERVER_URL") {
            if !url.trim().is_empty() {
                self.direct.server_url = url.trim().to_string();
            }
        }

        if let Ok(key) = std::env::var("LAMGATE_API_KEY").or_else(|_| std::env::var("API_KEY")) {
            if !key.is_empty() {
                self.direct.api_key = Some(key);
            }
        }

        if let Ok(model) = std::env::var("LAMGATE_MODEL") {
            if !model.trim().is_empty() {
                self.direct.model = model.trim().to_string();
            }
        }

        if let Ok(kind_raw) = std::env::var("LAMGATE_TRANSPORT") {
            match TransportKind::parse(&kind_raw) {
                Some(kind) => self.transport.kind = kind,
                None => tracing::warn!(
                    "Ignoring invalid LAMGATE_TRANSPORT: {kind_raw} (expected direct|broker)"
                ),
            }
        }

        if let Ok(host) = std::env::var("LAMGATE_MQTT_HOST") {
            if !host.trim().is_empty() {
                self.broker.host = host.trim().to_string();
            }
        }

        if let Ok(port_raw) = std::env::var("LAMGATE_MQTT_PORT") {
            match port_raw.trim().parse::<u16>() {
                Ok(port) => self.broker.port = port,
                Err(_) => tracing::warn!("Ignoring invalid LAMGATE_MQTT_PORT: {port_raw}"),
            }
        }
    }

    /// Validate configuration values that would cause runtime failures.
    ///
    /// Called after TOML deserialization and env-override application to
    /// catch obviously invalid values early.
    pub fn validate(&self) -> Result<()> {
        if self.direct.server_url.trim().is_empty() {
            anyhow::bail!("direct.server_url must not be empty");
        }
        if self.broker.host.trim().is_empty() {
            anyhow::bail!("broker.host must not be empty");
        }
        if self.broker.topic_prefix.trim().is_empty() {
            anyhow::bail!("broker.topic_prefix must not be empty");
        }
        if self.limits.max_inflight == 0 {
            anyhow::bail!("limits.max_inflight must be greater than 0");
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            anyhow::bail!(
                "generation.temperature must be between 0.0 and 2.0, got {}",
                self.generation.temperature
            );
        }
        if !(0.0..=1.0).contains(&self.generation.top_p) {
            anyhow::bail!(
                "generation.top_p must be between 0.0 and 1.0, got {}",
                self.generation.top_p
            );
        }
        if self.maze.stuck_threshold < 2 {
            anyhow::bail!("maze.stuck_threshold must be at least 2");
        }
        if self.maze.position_history_len < self.maze.stuck_threshold {
            anyhow::bail!(
                "maze.position_history_len must be at least maze.stuck_threshold"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.transport.kind, TransportKind::Direct);
        assert_eq!(config.direct.server_url, "http://127.0.0.1:8080");
        assert_eq!(config.limits.max_inflight, 8);
        assert_eq!(config.limits.maze_history_pairs, 3);
        assert_eq!(config.maze.stuck_threshold, 3);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [transport]
            kind = "broker"

            [broker]
            host = "mqtt.internal"
            "#,
        )
        .unwrap();
        assert_eq!(config.transport.kind, TransportKind::Broker);
        assert_eq!(config.broker.host, "mqtt.internal");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.generation.max_tokens, 512);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.direct.model, config.direct.model);
        assert_eq!(parsed.broker.topic_prefix, config.broker.topic_prefix);
    }

    #[test]
    fn transport_kind_parses_case_insensitively() {
        assert_eq!(TransportKind::parse("Direct"), Some(TransportKind::Direct));
        assert_eq!(TransportKind::parse(" broker "), Some(TransportKind::Broker));
        assert_eq!(TransportKind::parse("http"), None);
    }

    #[test]
    fn validate_rejects_zero_inflight() {
        let mut config = Config::default();
        config.limits.max_inflight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_temperature() {
        let mut config = Config::default();
        config.generation.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_top_p() {
        let mut config = Config::default();
        config.generation.top_p = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn generation_defaults_fill_missing_fields() {
        let config: Config = toml::from_str("[generation]\ntemperature = 0.2\n").unwrap();
        assert!((config.generation.top_p - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.generation.max_tokens, 512);
    }

    #[test]
    fn validate_rejects_history_shorter_than_threshold() {
        let mut config = Config::default();
        config.maze.stuck_threshold = 5;
        config.maze.position_history_len = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[tokio::test]
    async fn load_or_init_writes_then_reads_config() {
        let dir = tempfile::tempdir().unwrap();

        let created = Config::load_or_init_at(dir.path()).await.unwrap();
        assert!(created.config_path.exists());

        // Second load parses the file written by the first.
        let loaded = Config::load_or_init_at(dir.path()).await.unwrap();
        assert_eq!(loaded.direct.server_url, created.direct.server_url);
    }

    #[tokio::test]
    async fn load_or_init_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("config.toml"), "not valid toml [")
            .await
            .unwrap();

        assert!(Config::load_or_init_at(dir.path()).await.is_err());
    }
}
