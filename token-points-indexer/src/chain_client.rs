// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-only client for one EVM chain.
//!
//! Wraps an HTTP JSON-RPC provider and exposes exactly the operations the
//! ingestion pipeline needs: head queries with confirmation depth applied,
//! block timestamps, range-filtered `Transfer` logs, and a live `balanceOf`
//! lookup used by the reconciliation path.

use chrono::{DateTime, NaiveDateTime};
use ethers::abi::Token;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, Filter, Log, TransactionRequest, H256, U256};
use tracing::{info, warn};

use crate::config::ChainConfig;
use crate::error::{PointsError, PointsResult};
use crate::events::transfer_topic;

pub struct ChainClient {
    provider: Provider<Http>,
    chain_id: String,
    contract_address: Address,
    confirmation_blocks: u64,
    transfer_topic: H256,
}

impl ChainClient {
    /// Connect to the chain's RPC endpoint and validate the EVM chain id if
    /// the configuration pins one.
    pub async fn connect(cfg: &ChainConfig) -> PointsResult<Self> {
        let provider = Provider::<Http>::try_from(cfg.rpc_url.as_str())
            .map_err(|e| PointsError::RpcUnavailable(format!("{}: {}", cfg.rpc_url, e)))?;

        let contract_address: Address = cfg
            .contract_address
            .parse()
            .map_err(|e| PointsError::ConfigLoad(format!("invalid contract address: {}", e)))?;

        let client = Self {
            provider,
            chain_id: cfg.id.clone(),
            contract_address,
            confirmation_blocks: cfg.confirmation_blocks,
            transfer_topic: transfer_topic(),
        };
        client.describe(cfg.chain_id).await?;
        Ok(client)
    }

    // Validate chain identifier and log connection info
    async fn describe(&self, expected_chain_id: Option<u64>) -> PointsResult<()> {
        let chain_id = self
            .provider
            .get_chainid()
            .await
            .map_err(|e| PointsError::RpcUnavailable(e.to_string()))?
            .as_u64();
        let block_number = self.latest_block_number().await?;

        if let Some(expected) = expected_chain_id {
            if chain_id != expected {
                return Err(PointsError::ConfigLoad(format!(
                    "Chain ID mismatch for {}: expected {}, got {}. This could indicate connecting to the wrong network!",
                    self.chain_id, expected, chain_id
                )));
            }
            info!(
                "[{}] Connected to chain {} (verified), current block: {}",
                self.chain_id, chain_id, block_number
            );
        } else {
            warn!(
                "[{}] Connected to chain {} (NOT VERIFIED - no expected chain ID set), current block: {}",
                self.chain_id, chain_id, block_number
            );
        }
        Ok(())
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub async fn latest_block_number(&self) -> PointsResult<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| PointsError::BlockFetch(format!("get latest block: {}", e)))?;
        Ok(number.as_u64())
    }

    /// Latest block minus the configured confirmation depth, clamped at zero.
    pub async fn confirmed_block_number(&self) -> PointsResult<u64> {
        let latest = self.latest_block_number().await?;
        Ok(latest.saturating_sub(self.confirmation_blocks))
    }

    pub async fn block_timestamp(&self, number: u64) -> PointsResult<NaiveDateTime> {
        let block = self
            .provider
            .get_block(BlockId::from(number))
            .await
            .map_err(|e| PointsError::BlockFetch(format!("get block {}: {}", number, e)))?
            .ok_or_else(|| PointsError::BlockFetch(format!("block {} not found", number)))?;

        let secs = block.timestamp.as_u64() as i64;
        DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| {
                PointsError::BlockFetch(format!("block {} has invalid timestamp {}", number, secs))
            })
    }

    // Note: query may fail if range is too big. Callsite is responsible
    // for chunking the query.
    pub async fn transfer_logs(&self, from_block: u64, to_block: u64) -> PointsResult<Vec<Log>> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .address(self.contract_address)
            .topic0(self.transfer_topic);

        let logs = self.provider.get_logs(&filter).await.map_err(|e| {
            PointsError::RpcUnavailable(format!(
                "get_logs [{}, {}] failed: {}",
                from_block, to_block, e
            ))
        })?;

        // Safeguard check that all events were emitted from the requested
        // contract address.
        if logs.iter().any(|log| log.address != self.contract_address) {
            return Err(PointsError::RpcUnavailable(format!(
                "Provider returned logs from a different contract address (expected {:?})",
                self.contract_address
            )));
        }

        Ok(logs)
    }

    /// Live `balanceOf(user)` on the configured token contract.
    pub async fn token_balance(&self, user: Address) -> PointsResult<U256> {
        let mut data = ethers::utils::id("balanceOf(address)").to_vec();
        data.extend_from_slice(&ethers::abi::encode(&[Token::Address(user)]));

        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.contract_address)
            .data(data)
            .into();

        let output = self
            .provider
            .call(&tx, None)
            .await
            .map_err(|e| PointsError::RpcUnavailable(format!("balanceOf({:?}): {}", user, e)))?;

        if output.len() < 32 {
            return Err(PointsError::RpcUnavailable(format!(
                "balanceOf({:?}) returned {} bytes, expected 32",
                user,
                output.len()
            )));
        }
        Ok(U256::from_big_endian(&output[..32]))
    }
}
