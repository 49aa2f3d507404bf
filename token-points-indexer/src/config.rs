// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Indexer configuration
//!
//! Infrastructure knobs (database URL, pool sizing, listen addresses) come in
//! through CLI/env arguments; the chain list and points parameters live in a
//! YAML file with `${VAR}` environment substitution.

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Complete indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub points: PointsConfig,
}

/// Per-chain ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Logical chain identifier used as the database key (e.g. "eth-mainnet")
    pub id: String,
    pub rpc_url: String,
    pub contract_address: String,
    /// Expected EVM chain id, validated at connect time when set
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// First block to ingest when no checkpoint exists yet
    #[serde(default)]
    pub start_block: i64,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    /// Poll period in seconds
    #[serde(default = "default_pull_interval")]
    pub pull_interval: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub adaptive_mode: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Points settlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsConfig {
    /// Points per token per hour of holding. Quote the value in YAML
    /// ("0.01") so it parses exactly rather than through a float.
    #[serde(default = "default_calculation_rate")]
    pub calculation_rate: BigDecimal,
    /// Seconds-precision cron expression for the settlement sweep
    #[serde(default = "default_calculation_cron")]
    pub calculation_cron: String,
}

fn default_confirmation_blocks() -> u64 {
    12
}

fn default_pull_interval() -> u64 {
    10
}

fn default_batch_size() -> i64 {
    100
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_queue_size() -> usize {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_enabled() -> bool {
    true
}

fn default_calculation_rate() -> BigDecimal {
    BigDecimal::from_str("0.01").unwrap()
}

fn default_calculation_cron() -> String {
    // Seconds-precision: top of every hour.
    "0 0 * * * *".to_string()
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            calculation_rate: default_calculation_rate(),
            calculation_cron: default_calculation_cron(),
        }
    }
}

impl IndexerConfig {
    /// Load configuration from YAML file with environment variable substitution
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;

        let contents = substitute_env_vars(&contents)?;

        let config: IndexerConfig =
            serde_yaml::from_str(&contents).context("Failed to parse config YAML")?;
        Ok(config)
    }

    pub fn enabled_chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter().filter(|c| c.enabled)
    }

    pub fn chain(&self, chain_id: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> Result<String> {
    use regex::Regex;

    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut result = content.to_string();

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        if let Ok(var_value) = std::env::var(var_name) {
            result = result.replace(full_match, &var_value);
        } else {
            // Keep the placeholder if env var is not set
            tracing::warn!(
                "Environment variable {} not found, keeping placeholder",
                var_name
            );
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
chains:
  - id: eth-mainnet
    rpc_url: https://rpc.example.com
    contract_address: "0x00000000000000000000000000000000000000aa"
    chain_id: 1
    start_block: 1000
    confirmation_blocks: 64
    pull_interval: 15
    batch_size: 500
    adaptive_mode: true
  - id: eth-local
    rpc_url: http://localhost:8545
    contract_address: "0x00000000000000000000000000000000000000bb"
    enabled: false
points:
  calculation_rate: "0.01"
  calculation_cron: "0 0 * * * *"
"#;

    #[test]
    fn test_parse_sample_config() {
        let config: IndexerConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.chains.len(), 2);

        let eth = &config.chains[0];
        assert_eq!(eth.id, "eth-mainnet");
        assert_eq!(eth.chain_id, Some(1));
        assert_eq!(eth.start_block, 1000);
        assert_eq!(eth.confirmation_blocks, 64);
        assert_eq!(eth.batch_size, 500);
        assert!(eth.adaptive_mode);
        assert!(eth.enabled);

        assert_eq!(
            config.points.calculation_rate,
            BigDecimal::from_str("0.01").unwrap()
        );
    }

    #[test]
    fn test_defaults_applied() {
        let config: IndexerConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let local = &config.chains[1];
        assert_eq!(local.confirmation_blocks, 12);
        assert_eq!(local.pull_interval, 10);
        assert_eq!(local.batch_size, 100);
        assert_eq!(local.worker_pool_size, 4);
        assert_eq!(local.queue_size, 10_000);
        assert_eq!(local.max_retries, 3);
        assert!(!local.adaptive_mode);
        assert!(!local.enabled);
    }

    #[test]
    fn test_enabled_chains_filter() {
        let config: IndexerConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let enabled: Vec<_> = config.enabled_chains().map(|c| c.id.as_str()).collect();
        assert_eq!(enabled, vec!["eth-mainnet"]);
    }

    #[test]
    fn test_points_defaults() {
        let config: IndexerConfig = serde_yaml::from_str("chains: []").unwrap();
        assert_eq!(config.points.calculation_cron, "0 0 * * * *");
        assert_eq!(
            config.points.calculation_rate,
            BigDecimal::from_str("0.01").unwrap()
        );
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("TP_TEST_RPC_URL", "http://substituted:8545");
        let substituted = substitute_env_vars("rpc_url: ${TP_TEST_RPC_URL}").unwrap();
        assert_eq!(substituted, "rpc_url: http://substituted:8545");
    }

    #[test]
    fn test_env_var_substitution_missing_keeps_placeholder() {
        let substituted = substitute_env_vars("rpc_url: ${TP_TEST_UNSET_VAR}").unwrap();
        assert_eq!(substituted, "rpc_url: ${TP_TEST_UNSET_VAR}");
    }
}
