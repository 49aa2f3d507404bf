// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Error type for ingestion and settlement operations.
#[derive(Debug, Error)]
pub enum PointsError {
    #[error("RPC unavailable: {0}")]
    RpcUnavailable(String),

    #[error("Block fetch failed: {0}")]
    BlockFetch(String),

    #[error("Failed to parse event log: {0}")]
    EventParse(String),

    #[error("Balance update failed: {0}")]
    BalanceUpdate(String),

    // On-chain reconciliation ran and the live balance still cannot absorb
    // the change. The event is rejected and the checkpoint must not advance.
    #[error("Negative balance for {address}: on-chain balance {onchain_balance} cannot absorb change {change_amount}")]
    NegativeBalance {
        address: String,
        onchain_balance: String,
        change_amount: String,
    },

    #[error("Points calculation failed: {0}")]
    PointsCalculation(String),

    #[error("Config error: {0}")]
    ConfigLoad(String),

    #[error("Database error: {0}")]
    Storage(String),
}

impl PointsError {
    /// Whether this error is transient (the listener should retry the batch).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PointsError::RpcUnavailable(_) | PointsError::BlockFetch(_) | PointsError::Storage(_)
        )
    }

    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            PointsError::RpcUnavailable(_) => "rpc_unavailable",
            PointsError::BlockFetch(_) => "block_fetch",
            PointsError::EventParse(_) => "event_parse",
            PointsError::BalanceUpdate(_) => "balance_update",
            PointsError::NegativeBalance { .. } => "negative_balance",
            PointsError::PointsCalculation(_) => "points_calculation",
            PointsError::ConfigLoad(_) => "config_load",
            PointsError::Storage(_) => "storage",
        }
    }
}

impl From<diesel::result::Error> for PointsError {
    fn from(e: diesel::result::Error) -> Self {
        PointsError::Storage(e.to_string())
    }
}

pub type PointsResult<T> = Result<T, PointsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(PointsError::RpcUnavailable("x".into()).is_recoverable());
        assert!(PointsError::BlockFetch("x".into()).is_recoverable());
        assert!(PointsError::Storage("x".into()).is_recoverable());
        assert!(!PointsError::EventParse("x".into()).is_recoverable());
        assert!(!PointsError::NegativeBalance {
            address: "0xabc".into(),
            onchain_balance: "0".into(),
            change_amount: "-1".into(),
        }
        .is_recoverable());
    }

    /// error_type values feed Prometheus labels and must stay lowercase
    /// with underscores only.
    #[test]
    fn test_error_type_valid_labels() {
        let errors = vec![
            PointsError::RpcUnavailable("x".into()),
            PointsError::BlockFetch("x".into()),
            PointsError::EventParse("x".into()),
            PointsError::BalanceUpdate("x".into()),
            PointsError::PointsCalculation("x".into()),
            PointsError::ConfigLoad("x".into()),
            PointsError::Storage("x".into()),
        ];
        for e in errors {
            let label = e.error_type();
            assert!(!label.is_empty());
            assert!(label.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
            assert!(!label.starts_with('_'));
            assert!(!label.ends_with('_'));
        }
    }

    #[test]
    fn test_from_diesel_error() {
        let e: PointsError = diesel::result::Error::NotFound.into();
        assert!(matches!(e, PointsError::Storage(_)));
    }
}
