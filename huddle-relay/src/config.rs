//! Relay server configuration.
//!
//! Every setting resolves through the same layers, highest first:
//! 1. CLI flag (or its environment variable, via clap `env`)
//! 2. `[server]` section of the TOML config file
//! 3. Compiled default
//!
//! The file defaults to `~/.config/huddle-relay/config.toml`; a missing
//! default file is treated as empty, a missing `--config` file is an error.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:9000"
//! max_message_size = 65536
//! send_timeout_ms = 5000
//! outbound_buffer = 64
//! max_rooms = 1000
//! log_level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rooms::{DEFAULT_MAX_ROOMS, DEFAULT_SEND_TIMEOUT};

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting resolved to a value the relay cannot run with.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Name of the offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// `[server]` section of the config file. Absent keys fall through to the
/// next layer.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    bind_addr: Option<String>,
    max_message_size: Option<usize>,
    send_timeout_ms: Option<u64>,
    outbound_buffer: Option<usize>,
    max_rooms: Option<usize>,
    log_level: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerSection,
}

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Huddle signaling relay")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "HUDDLE_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/huddle-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum inbound WebSocket message size in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Per-recipient send timeout in milliseconds.
    #[arg(long)]
    pub send_timeout_ms: Option<u64>,

    /// Outbound frames buffered per connection.
    #[arg(long)]
    pub outbound_buffer: Option<usize>,

    /// Maximum number of live rooms.
    #[arg(long)]
    pub max_rooms: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "HUDDLE_LOG")]
    pub log_level: Option<String>,
}

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9000`).
    pub bind_addr: String,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Upper bound on a single recipient send.
    pub send_timeout: Duration,
    /// Outbound frames buffered per connection.
    pub outbound_buffer: usize,
    /// Maximum number of live rooms.
    pub max_rooms: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            max_message_size: 64 * 1024,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            outbound_buffer: 64,
            max_rooms: DEFAULT_MAX_ROOMS,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Resolves the configuration from CLI args, the config file and
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if a limit resolves to zero.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_config_file(path)?,
            None => read_default_config_file()?,
        };
        let config = Self::resolve(cli, file.server);
        config.validate()?;
        Ok(config)
    }

    fn resolve(cli: &RelayCliArgs, file: ServerSection) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: layered(cli.bind.clone(), file.bind_addr, defaults.bind_addr),
            max_message_size: layered(
                cli.max_message_size,
                file.max_message_size,
                defaults.max_message_size,
            ),
            send_timeout: cli
                .send_timeout_ms
                .or(file.send_timeout_ms)
                .map_or(defaults.send_timeout, Duration::from_millis),
            outbound_buffer: layered(
                cli.outbound_buffer,
                file.outbound_buffer,
                defaults.outbound_buffer,
            ),
            max_rooms: layered(cli.max_rooms, file.max_rooms, defaults.max_rooms),
            log_level: layered(cli.log_level.clone(), file.log_level, defaults.log_level),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let zero = |field| ConfigError::Invalid {
            field,
            reason: "must be greater than zero",
        };
        if self.max_message_size == 0 {
            return Err(zero("max_message_size"));
        }
        if self.send_timeout.is_zero() {
            return Err(zero("send_timeout_ms"));
        }
        if self.outbound_buffer == 0 {
            return Err(zero("outbound_buffer"));
        }
        if self.max_rooms == 0 {
            return Err(zero("max_rooms"));
        }
        Ok(())
    }
}

/// First of CLI value, file value, default.
fn layered<T>(cli: Option<T>, file: Option<T>, default: T) -> T {
    cli.or(file).unwrap_or(default)
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

fn read_default_config_file() -> Result<ConfigFile, ConfigError> {
    let Some(path) = dirs::config_dir().map(|dir| dir.join("huddle-relay").join("config.toml"))
    else {
        return Ok(ConfigFile::default());
    };
    match read_config_file(&path) {
        Err(ConfigError::ReadFile { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(ConfigFile::default())
        }
        other => other,
    }
}
