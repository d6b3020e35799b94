//! Agent configuration surface (§6): server address, poll/report
//! intervals, HMAC key, recipient public-key path, fan-out degree,
//! config-file path, RPC-mode flag. Precedence is environment > CLI flag >
//! config file > built-in default (§6, §9: "a clean rewrite should
//! compute it declaratively from a layered source list" rather than the
//! original's repeated-overwrite style).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 10;
const DEFAULT_FAN_OUT: usize = 1;

#[derive(Debug, Parser)]
#[command(author, version, about = "Metrics collection agent")]
pub struct Cli {
    /// Address of the metrics server, host:port.
    #[arg(short = 'a', long)]
    pub address: Option<String>,
    /// Poll interval in seconds.
    #[arg(short = 'p', long)]
    pub poll_interval: Option<u64>,
    /// Report interval in seconds.
    #[arg(short = 'r', long)]
    pub report_interval: Option<u64>,
    /// Shared HMAC secret.
    #[arg(short = 'k', long)]
    pub hmac_key: Option<String>,
    /// Path to a PEM file holding the server's PKCS#1 RSA public key.
    #[arg(long = "crypto-key")]
    pub public_key_path: Option<PathBuf>,
    /// Number of concurrent report workers.
    #[arg(short = 'l', long = "rate-limit")]
    pub fan_out: Option<usize>,
    /// Use the RPC transport instead of HTTP.
    #[arg(short = 'g', long)]
    pub grpc: bool,
    /// Path to a JSON config file (lowest-priority layer).
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<PathBuf>,
}

/// The config-file layer's shape; every field is optional so an absent
/// file, or a file missing some fields, falls through to lower layers.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub address: Option<String>,
    pub poll_interval: Option<u64>,
    pub report_interval: Option<u64>,
    pub hmac_key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub rate_limit: Option<usize>,
    pub grpc: Option<bool>,
}

/// The effective, fully-resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub address: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub hmac_key: Option<String>,
    pub public_key_path: Option<PathBuf>,
    pub fan_out: usize,
    pub grpc: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {0:?}: {1}")]
    ReadFile(PathBuf, std::io::Error),
    #[error("parsing config file {0:?}: {1}")]
    ParseFile(PathBuf, serde_json::Error),
}

/// One named layer in the precedence chain, lowest to highest priority.
/// Each accessor returns `None` when that layer doesn't set the field, so
/// resolution is a simple first-`Some`-wins fold over the layers in
/// priority order.
struct Layers {
    file: FileConfig,
    cli: Cli,
}

impl Layers {
    fn address(&self) -> Option<String> {
        env_var("ADDRESS")
            .or_else(|| self.cli.address.clone())
            .or_else(|| self.file.address.clone())
    }

    fn poll_interval(&self) -> Option<u64> {
        env_var("POLL_INTERVAL")
            .and_then(|v| v.parse().ok())
            .or(self.cli.poll_interval)
            .or(self.file.poll_interval)
    }

    fn report_interval(&self) -> Option<u64> {
        env_var("REPORT_INTERVAL")
            .and_then(|v| v.parse().ok())
            .or(self.cli.report_interval)
            .or(self.file.report_interval)
    }

    fn hmac_key(&self) -> Option<String> {
        env_var("KEY")
            .or_else(|| self.cli.hmac_key.clone())
            .or_else(|| self.file.hmac_key.clone())
    }

    fn public_key_path(&self) -> Option<PathBuf> {
        env_var("CRYPTO_KEY")
            .map(PathBuf::from)
            .or_else(|| self.cli.public_key_path.clone())
            .or_else(|| self.file.crypto_key.clone())
    }

    fn fan_out(&self) -> Option<usize> {
        env_var("RATE_LIMIT")
            .and_then(|v| v.parse().ok())
            .or(self.cli.fan_out)
            .or(self.file.rate_limit)
    }

    fn grpc(&self) -> bool {
        env_var("GRPC")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(self.cli.grpc || self.file.grpc.unwrap_or(false))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Resolves the effective config from CLI args and, if `-c`/`CONFIG`
/// names one, a JSON config file. `cli` is taken by value since parsing
/// happens once at startup.
pub fn resolve(cli: Cli) -> Result<AgentConfig, ConfigError> {
    let config_path = env_var("CONFIG").map(PathBuf::from).or_else(|| cli.config_path.clone());

    let file = match config_path {
        Some(path) => {
            let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile(path.clone(), e))?;
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseFile(path, e))?
        }
        None => FileConfig::default(),
    };

    let layers = Layers { file, cli };

    Ok(AgentConfig {
        address: layers.address().unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
        poll_interval: Duration::from_secs(layers.poll_interval().unwrap_or(DEFAULT_POLL_INTERVAL_SECS)),
        report_interval: Duration::from_secs(layers.report_interval().unwrap_or(DEFAULT_REPORT_INTERVAL_SECS)),
        hmac_key: layers.hmac_key(),
        public_key_path: layers.public_key_path(),
        fan_out: layers.fan_out().unwrap_or(DEFAULT_FAN_OUT).max(1),
        grpc: layers.grpc(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_cli() -> Cli {
        Cli {
            address: None,
            poll_interval: None,
            report_interval: None,
            hmac_key: None,
            public_key_path: None,
            fan_out: None,
            grpc: false,
            config_path: None,
        }
    }

    #[test]
    fn falls_back_to_defaults() {
        let cfg = resolve(empty_cli()).unwrap();
        assert_eq!(cfg.address, DEFAULT_ADDRESS);
        assert_eq!(cfg.poll_interval, Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS));
        assert_eq!(cfg.fan_out, DEFAULT_FAN_OUT);
    }

    #[test]
    fn cli_flag_overrides_default() {
        let mut cli = empty_cli();
        cli.address = Some("example:9000".to_string());
        let cfg = resolve(cli).unwrap();
        assert_eq!(cfg.address, "example:9000");
    }

    #[test]
    fn file_layer_fills_gaps_but_flag_wins() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("agent-config-test-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"address":"from-file:1","poll_interval":30}"#).unwrap();

        let mut cli = empty_cli();
        cli.config_path = Some(path.clone());
        cli.address = Some("from-flag:2".to_string());
        let cfg = resolve(cli).unwrap();
        assert_eq!(cfg.address, "from-flag:2", "flag beats file");
        assert_eq!(cfg.poll_interval, Duration::from_secs(30), "file fills the gap");

        std::fs::remove_file(path).ok();
    }
}
