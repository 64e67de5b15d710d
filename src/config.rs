use serde::Deserialize;
use std::time::Duration;

use crate::db::query::max_batch_rows;
use crate::db::repository::EVENT_COLUMNS;
use crate::indexer::ingester::DEFAULT_BATCH_SIZE;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub parse: ParseConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rpc_pool: Vec<String>,
}

// ============================================================
// Scan loop
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_block_range")]
    pub block_range: u64,
    #[serde(default = "default_confirmation_lag")]
    pub confirmation_lag: u64,
    #[serde(default = "default_scan_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_rpc_retries")]
    pub rpc_retries: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            block_range: default_block_range(),
            confirmation_lag: default_confirmation_lag(),
            interval_ms: default_scan_interval_ms(),
            batch_size: default_batch_size(),
            rpc_retries: default_rpc_retries(),
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_block_range() -> u64 {
    100
}

fn default_confirmation_lag() -> u64 {
    6
}

fn default_scan_interval_ms() -> u64 {
    10_000
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_rpc_retries() -> u32 {
    3
}

// ============================================================
// Parse loop
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ParseConfig {
    #[serde(default = "default_parse_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_parse_interval_ms(),
            page_size: default_page_size(),
        }
    }
}

impl ParseConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_parse_interval_ms() -> u64 {
    30_000
}

fn default_page_size() -> u32 {
    10
}

// ============================================================
// API Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    3000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

const RPC_POOL_PREFIX: &str = "RPC_POOL_";

impl Config {
    /// Load the TOML file at `path` (defaults when it does not exist), apply
    /// environment overrides, and validate.
    pub fn load(path: &str) -> eyre::Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path, "Config file not found, using defaults and environment");
                Config::default()
            }
            Err(e) => return Err(eyre::eyre!("Failed to read config file '{}': {}", path, e)),
        };

        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DATABASE_URL`, `BLOCK_RANGE`, `BLOCK_DELAYED`, `SYNC_INTERVAL`,
    /// `PARSE_INTERVAL`, `PARSE_PAGE_SIZE`, `BATCH_SIZE`, `API_HOST`,
    /// `API_PORT` and `RPC_POOL_<chain_id>` (comma-separated URLs).
    pub fn apply_overrides<I>(&mut self, vars: I) -> eyre::Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "DATABASE_URL" => self.database.url = value,
                "BLOCK_RANGE" => self.scan.block_range = parse_var(&key, &value)?,
                "BLOCK_DELAYED" => self.scan.confirmation_lag = parse_var(&key, &value)?,
                "SYNC_INTERVAL" => self.scan.interval_ms = parse_var(&key, &value)?,
                "BATCH_SIZE" => self.scan.batch_size = parse_var(&key, &value)?,
                "PARSE_INTERVAL" => self.parse.interval_ms = parse_var(&key, &value)?,
                "PARSE_PAGE_SIZE" => self.parse.page_size = parse_var(&key, &value)?,
                "API_HOST" => self.api.host = value,
                "API_PORT" => self.api.port = parse_var(&key, &value)?,
                _ => {
                    if let Some(chain_id) = key.strip_prefix(RPC_POOL_PREFIX) {
                        let chain_id: u64 = parse_var(&key, chain_id)?;
                        self.set_rpc_pool(chain_id, &value);
                    }
                }
            }
        }
        Ok(())
    }

    fn set_rpc_pool(&mut self, chain_id: u64, value: &str) {
        let pool: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        match self.chains.iter_mut().find(|c| c.chain_id == chain_id) {
            Some(chain) => chain.rpc_pool = pool,
            None => self.chains.push(ChainConfig {
                chain_id,
                name: format!("chain-{}", chain_id),
                rpc_pool: pool,
            }),
        }
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre::eyre!("Database URL must be configured"));
        }
        if self.chains.is_empty() {
            return Err(eyre::eyre!("At least one chain must be configured"));
        }
        for chain in &self.chains {
            if chain.rpc_pool.is_empty() {
                return Err(eyre::eyre!(
                    "Chain {} must have at least one RPC endpoint configured",
                    chain.chain_id
                ));
            }
            for url in &chain.rpc_pool {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(eyre::eyre!(
                        "Invalid RPC URL '{}' for chain {}",
                        url,
                        chain.chain_id
                    ));
                }
            }
        }
        if self.scan.block_range == 0 {
            return Err(eyre::eyre!("scan.block_range must be greater than 0"));
        }
        if self.scan.batch_size == 0 {
            return Err(eyre::eyre!("scan.batch_size must be greater than 0"));
        }
        let max_rows = max_batch_rows(EVENT_COLUMNS.len());
        if self.scan.batch_size > max_rows {
            return Err(eyre::eyre!(
                "scan.batch_size {} exceeds {} rows per INSERT",
                self.scan.batch_size,
                max_rows
            ));
        }
        if self.parse.page_size == 0 {
            return Err(eyre::eyre!("parse.page_size must be greater than 0"));
        }
        Ok(())
    }
}

fn parse_var<T>(key: &str, value: &str) -> eyre::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| eyre::eyre!("Invalid value '{}' for {}: {}", value, key, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[database]
url = "postgres://localhost/test"
max_connections = 5

[[chains]]
chain_id = 1
name = "ethereum"
rpc_pool = ["http://localhost:8545", "http://localhost:8546"]

[parse]
page_size = 25
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].name, "ethereum");
        assert_eq!(config.chains[0].rpc_pool.len(), 2);
        assert_eq!(config.parse.page_size, 25);
        assert_eq!(config.parse.interval_ms, 30_000); // default
        assert_eq!(config.scan.block_range, 100); // default
        assert_eq!(config.scan.confirmation_lag, 6); // default
        assert_eq!(config.scan.batch_size, 1000); // default
        assert_eq!(config.scan.interval(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(vars(&[
                ("DATABASE_URL", "postgres://db/stake"),
                ("BLOCK_RANGE", "500"),
                ("BLOCK_DELAYED", "12"),
                ("SYNC_INTERVAL", "5000"),
                ("PARSE_INTERVAL", "7000"),
                ("PARSE_PAGE_SIZE", "50"),
                ("BATCH_SIZE", "200"),
                ("API_PORT", "8080"),
                ("RPC_POOL_56", "https://a.example, https://b.example,"),
                ("HOME", "/root"),
            ]))
            .unwrap();

        assert_eq!(config.database.url, "postgres://db/stake");
        assert_eq!(config.scan.block_range, 500);
        assert_eq!(config.scan.confirmation_lag, 12);
        assert_eq!(config.scan.interval_ms, 5000);
        assert_eq!(config.parse.interval_ms, 7000);
        assert_eq!(config.parse.page_size, 50);
        assert_eq!(config.scan.batch_size, 200);
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].chain_id, 56);
        assert_eq!(
            config.chains[0].rpc_pool,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_pool_replaces_file_pool() {
        let mut config: Config = toml::from_str(
            r#"
[[chains]]
chain_id = 1
name = "ethereum"
rpc_pool = ["http://localhost:8545"]
"#,
        )
        .unwrap();

        config
            .apply_overrides(vars(&[("RPC_POOL_1", "https://mainnet.example")]))
            .unwrap();
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].name, "ethereum");
        assert_eq!(config.chains[0].rpc_pool, vec!["https://mainnet.example".to_string()]);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = Config::default();
        assert!(config.apply_overrides(vars(&[("BLOCK_RANGE", "lots")])).is_err());
        assert!(config.apply_overrides(vars(&[("RPC_POOL_eth", "http://x")])).is_err());
    }

    #[test]
    fn test_validate_empty_chains() {
        let mut config = Config::default();
        config.database.url = "postgres://localhost/test".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_rpc_url() {
        let mut config = Config::default();
        config.database.url = "postgres://localhost/test".to_string();
        config.chains.push(ChainConfig {
            chain_id: 1,
            name: "test".to_string(),
            rpc_pool: vec!["localhost:8545".to_string()],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_batch_size_bind_limit() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("DATABASE_URL", "postgres://localhost/test"),
            ("RPC_POOL_1", "http://localhost:8545"),
            ("BATCH_SIZE", "5000"),
        ]))
        .unwrap();
        assert!(config.validate().is_err());

        config.scan.batch_size = 4681;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_page_size() {
        let mut config = Config::default();
        config.database.url = "postgres://localhost/test".to_string();
        config.chains.push(ChainConfig {
            chain_id: 1,
            name: "test".to_string(),
            rpc_pool: vec!["http://localhost:8545".to_string()],
        });
        config.parse.page_size = 0;
        assert!(config.validate().is_err());
    }
}
