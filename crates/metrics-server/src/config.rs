//! Server configuration surface (§6): listen address, store interval,
//! snapshot file path, restore-on-start flag, database DSN, HMAC key,
//! private-key PEM path, trusted CIDR, config-file path. Precedence is
//! environment > CLI flag > config file > built-in default, matching
//! `metrics-agent::config`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ipnet::IpNet;
use serde::Deserialize;

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_STORE_INTERVAL_SECS: u64 = 300;
const DEFAULT_SNAPSHOT_PATH: &str = "/tmp/metrics-server-snapshot.json";

#[derive(Debug, Parser)]
#[command(author, version, about = "Metrics server")]
pub struct Cli {
    /// Address to listen on, host:port.
    #[arg(short = 'a', long)]
    pub address: Option<String>,
    /// Interval between snapshot writes. 0 is rejected at startup (§9).
    #[arg(short = 'i', long = "store-interval")]
    pub store_interval: Option<u64>,
    /// Path to the snapshot file used by the in-memory backend.
    #[arg(short = 'f', long = "store-file")]
    pub snapshot_path: Option<PathBuf>,
    /// Restore the in-memory store from the snapshot file on startup.
    #[arg(short = 'r', long = "restore")]
    pub restore: Option<bool>,
    /// Postgres connection string. Presence selects the relational backend.
    #[arg(short = 'd', long = "database-dsn")]
    pub database_dsn: Option<String>,
    /// Shared HMAC secret.
    #[arg(short = 'k', long)]
    pub hmac_key: Option<String>,
    /// Path to a PEM file holding this server's PKCS#1 RSA private key.
    #[arg(long = "crypto-key")]
    pub private_key_path: Option<PathBuf>,
    /// CIDR of the only subnet requests are accepted from.
    #[arg(short = 't', long = "trusted-subnet")]
    pub trusted_subnet: Option<String>,
    /// gRPC listen address, separate from the HTTP address.
    #[arg(long = "grpc-address")]
    pub grpc_address: Option<String>,
    /// Path to a JSON config file (lowest-priority layer).
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub address: Option<String>,
    pub store_interval: Option<u64>,
    pub store_file: Option<PathBuf>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
    pub hmac_key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<String>,
    pub grpc_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub grpc_address: String,
    pub store_interval: Duration,
    pub snapshot_path: PathBuf,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub hmac_key: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub trusted_subnet: Option<IpNet>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {0:?}: {1}")]
    ReadFile(PathBuf, std::io::Error),
    #[error("parsing config file {0:?}: {1}")]
    ParseFile(PathBuf, serde_json::Error),
    #[error("invalid trusted subnet {0:?}: {1}")]
    TrustedSubnet(String, ipnet::AddrParseError),
    /// §9 redesign flag: a `store_interval` of zero previously meant
    /// "snapshot continuously", looping the save on every iteration with no
    /// pause. That's refused here instead.
    #[error("store-interval must be greater than zero; use a positive duration or omit the snapshot file entirely")]
    ZeroStoreInterval,
}

struct Layers {
    file: FileConfig,
    cli: Cli,
}

impl Layers {
    fn address(&self) -> Option<String> {
        env_var("ADDRESS").or_else(|| self.cli.address.clone()).or_else(|| self.file.address.clone())
    }

    fn grpc_address(&self) -> Option<String> {
        env_var("GRPC_ADDRESS")
            .or_else(|| self.cli.grpc_address.clone())
            .or_else(|| self.file.grpc_address.clone())
    }

    fn store_interval(&self) -> Option<u64> {
        env_var("STORE_INTERVAL")
            .and_then(|v| v.parse().ok())
            .or(self.cli.store_interval)
            .or(self.file.store_interval)
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        env_var("STORE_FILE")
            .map(PathBuf::from)
            .or_else(|| self.cli.snapshot_path.clone())
            .or_else(|| self.file.store_file.clone())
    }

    fn restore(&self) -> Option<bool> {
        env_var("RESTORE")
            .map(|v| v == "true" || v == "1")
            .or(self.cli.restore)
            .or(self.file.restore)
    }

    fn database_dsn(&self) -> Option<String> {
        env_var("DATABASE_DSN")
            .or_else(|| self.cli.database_dsn.clone())
            .or_else(|| self.file.database_dsn.clone())
    }

    fn hmac_key(&self) -> Option<String> {
        env_var("KEY").or_else(|| self.cli.hmac_key.clone()).or_else(|| self.file.hmac_key.clone())
    }

    fn private_key_path(&self) -> Option<PathBuf> {
        env_var("CRYPTO_KEY")
            .map(PathBuf::from)
            .or_else(|| self.cli.private_key_path.clone())
            .or_else(|| self.file.crypto_key.clone())
    }

    fn trusted_subnet(&self) -> Option<String> {
        env_var("TRUSTED_SUBNET")
            .or_else(|| self.cli.trusted_subnet.clone())
            .or_else(|| self.file.trusted_subnet.clone())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

pub fn resolve(cli: Cli) -> Result<ServerConfig, ConfigError> {
    let config_path = env_var("CONFIG").map(PathBuf::from).or_else(|| cli.config_path.clone());

    let file = match config_path {
        Some(path) => {
            let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile(path.clone(), e))?;
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseFile(path, e))?
        }
        None => FileConfig::default(),
    };

    let layers = Layers { file, cli };

    let trusted_subnet = match layers.trusted_subnet() {
        Some(raw) => Some(raw.parse::<IpNet>().map_err(|e| ConfigError::TrustedSubnet(raw, e))?),
        None => None,
    };

    let store_interval_secs = layers.store_interval().unwrap_or(DEFAULT_STORE_INTERVAL_SECS);
    if store_interval_secs == 0 {
        return Err(ConfigError::ZeroStoreInterval);
    }

    Ok(ServerConfig {
        address: layers.address().unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
        grpc_address: layers.grpc_address().unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
        store_interval: Duration::from_secs(store_interval_secs),
        snapshot_path: layers.snapshot_path().unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
        restore: layers.restore().unwrap_or(false),
        database_dsn: layers.database_dsn(),
        hmac_key: layers.hmac_key(),
        private_key_path: layers.private_key_path(),
        trusted_subnet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_cli() -> Cli {
        Cli {
            address: None,
            store_interval: None,
            snapshot_path: None,
            restore: None,
            database_dsn: None,
            hmac_key: None,
            private_key_path: None,
            trusted_subnet: None,
            grpc_address: None,
            config_path: None,
        }
    }

    #[test]
    fn falls_back_to_defaults() {
        let cfg = resolve(empty_cli()).unwrap();
        assert_eq!(cfg.address, DEFAULT_ADDRESS);
        assert_eq!(cfg.store_interval, Duration::from_secs(DEFAULT_STORE_INTERVAL_SECS));
        assert!(!cfg.restore);
    }

    #[test]
    fn zero_store_interval_is_rejected() {
        let mut cli = empty_cli();
        cli.store_interval = Some(0);
        assert!(matches!(resolve(cli), Err(ConfigError::ZeroStoreInterval)));
    }

    #[test]
    fn trusted_subnet_parses_cidr() {
        let mut cli = empty_cli();
        cli.trusted_subnet = Some("192.168.0.0/16".to_string());
        let cfg = resolve(cli).unwrap();
        assert_eq!(cfg.trusted_subnet.unwrap().to_string(), "192.168.0.0/16");
    }

    #[test]
    fn file_layer_fills_gaps_but_flag_wins() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("server-config-test-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"address":"from-file:1","store_interval":60}"#).unwrap();

        let mut cli = empty_cli();
        cli.config_path = Some(path.clone());
        cli.address = Some("from-flag:2".to_string());
        let cfg = resolve(cli).unwrap();
        assert_eq!(cfg.address, "from-flag:2");
        assert_eq!(cfg.store_interval, Duration::from_secs(60));

        std::fs::remove_file(path).ok();
    }
}
