// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! ERC-20 `Transfer` log parsing.
//!
//! A `Transfer` log carries the sender and recipient as indexed topics
//! (right-padded 32-byte words) and the amount as the single data word.
//! A transfer from the zero address is a mint, to the zero address a burn.

use bigdecimal::BigDecimal;
use ethers::types::{Address, Log, H256, U256};
use ethers::utils::keccak256;
use std::str::FromStr;

use crate::error::{PointsError, PointsResult};
use token_points_schema::models::ChangeType;

pub const TRANSFER_EVENT_SIGNATURE: &str = "Transfer(address,address,uint256)";

/// Topic-0 for ERC-20 `Transfer`.
pub fn transfer_topic() -> H256 {
    H256::from(keccak256(TRANSFER_EVENT_SIGNATURE.as_bytes()))
}

/// A parsed `Transfer` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub tx_hash: H256,
    pub block_number: u64,
    pub log_index: u64,
}

/// Parse a raw log into a [`TransferEvent`].
///
/// Providers are allowed to return logs with null block/tx fields for pending
/// blocks; those are rejected here rather than handled downstream.
pub fn parse_transfer_log(log: &Log) -> PointsResult<TransferEvent> {
    if log.topics.len() < 3 {
        return Err(PointsError::EventParse(format!(
            "log has {} topics, expected 3",
            log.topics.len()
        )));
    }
    if log.topics[0] != transfer_topic() {
        return Err(PointsError::EventParse(format!(
            "unexpected topic0: {:?}",
            log.topics[0]
        )));
    }

    let from = Address::from_slice(&log.topics[1].as_bytes()[12..]);
    let to = Address::from_slice(&log.topics[2].as_bytes()[12..]);

    let value = if log.data.is_empty() {
        U256::zero()
    } else if log.data.len() <= 32 {
        U256::from_big_endian(&log.data)
    } else {
        return Err(PointsError::EventParse(format!(
            "data word is {} bytes, expected at most 32",
            log.data.len()
        )));
    };

    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| PointsError::EventParse("log without transaction_hash".to_string()))?;
    let block_number = log
        .block_number
        .ok_or_else(|| PointsError::EventParse("log without block_number".to_string()))?
        .as_u64();
    let log_index = log.log_index.map(|i| i.as_u64()).unwrap_or(0);

    Ok(TransferEvent {
        from,
        to,
        value,
        tx_hash,
        block_number,
        log_index,
    })
}

impl TransferEvent {
    pub fn is_mint(&self) -> bool {
        self.from.is_zero()
    }

    pub fn is_burn(&self) -> bool {
        self.to.is_zero()
    }

    /// Classify the balance change recorded for either side of this event.
    /// Zero-address checks come first, so the recipient of a mint is labeled
    /// `Mint` and the sender of a burn `Burn`; everything else is `Transfer`.
    pub fn change_type(&self) -> ChangeType {
        if self.is_mint() {
            ChangeType::Mint
        } else if self.is_burn() {
            ChangeType::Burn
        } else {
            ChangeType::Transfer
        }
    }

    /// Signed balance change for `user`: negative for the sender side,
    /// positive otherwise.
    pub fn change_amount(&self, user: Address) -> BigDecimal {
        let value = u256_to_bigdecimal(self.value);
        if user == self.from {
            -value
        } else {
            value
        }
    }

    /// Lowercased `0x…` transaction hash as stored in history rows.
    pub fn tx_hash_hex(&self) -> String {
        format!("{:?}", self.tx_hash)
    }
}

/// Lowercased `0x…` form of an address as stored in the database.
pub fn address_hex(addr: Address) -> String {
    format!("{:?}", addr)
}

pub fn u256_to_bigdecimal(value: U256) -> BigDecimal {
    // U256 displays in decimal; amounts fit NUMERIC(65,0) by construction.
    BigDecimal::from_str(&value.to_string()).expect("U256 decimal form is a valid BigDecimal")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Bytes, U64};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn topic_for(addr: Address) -> H256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(addr.as_bytes());
        H256::from(word)
    }

    fn transfer_log(from: Address, to: Address, value: U256) -> Log {
        let mut data = [0u8; 32];
        value.to_big_endian(&mut data);
        Log {
            address: addr(0xEE),
            topics: vec![transfer_topic(), topic_for(from), topic_for(to)],
            data: Bytes::from(data.to_vec()),
            block_number: Some(U64::from(100)),
            transaction_hash: Some(H256::repeat_byte(0xAB)),
            log_index: Some(U256::from(3)),
            ..Default::default()
        }
    }

    #[test]
    fn test_transfer_topic_is_known_keccak() {
        // keccak256("Transfer(address,address,uint256)")
        assert_eq!(
            format!("{:?}", transfer_topic()),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_parse_transfer_log() {
        let log = transfer_log(addr(1), addr(2), U256::from(1_000u64));
        let event = parse_transfer_log(&log).unwrap();
        assert_eq!(event.from, addr(1));
        assert_eq!(event.to, addr(2));
        assert_eq!(event.value, U256::from(1_000u64));
        assert_eq!(event.block_number, 100);
        assert_eq!(event.log_index, 3);
    }

    #[test]
    fn test_parse_rejects_short_topics() {
        let mut log = transfer_log(addr(1), addr(2), U256::one());
        log.topics.truncate(2);
        let err = parse_transfer_log(&log).unwrap_err();
        assert!(matches!(err, PointsError::EventParse(_)));
    }

    #[test]
    fn test_parse_rejects_wrong_topic0() {
        let mut log = transfer_log(addr(1), addr(2), U256::one());
        log.topics[0] = H256::repeat_byte(0x11);
        assert!(parse_transfer_log(&log).is_err());
    }

    #[test]
    fn test_parse_empty_data_is_zero_value() {
        let mut log = transfer_log(addr(1), addr(2), U256::one());
        log.data = Bytes::default();
        let event = parse_transfer_log(&log).unwrap();
        assert_eq!(event.value, U256::zero());
    }

    #[test]
    fn test_change_type_classification() {
        let mint = parse_transfer_log(&transfer_log(Address::zero(), addr(2), U256::one())).unwrap();
        assert!(mint.is_mint());
        assert_eq!(mint.change_type(), ChangeType::Mint);

        let burn = parse_transfer_log(&transfer_log(addr(1), Address::zero(), U256::one())).unwrap();
        assert!(burn.is_burn());
        assert_eq!(burn.change_type(), ChangeType::Burn);

        let plain = parse_transfer_log(&transfer_log(addr(1), addr(2), U256::one())).unwrap();
        assert_eq!(plain.change_type(), ChangeType::Transfer);
    }

    #[test]
    fn test_change_amount_signs() {
        let event = parse_transfer_log(&transfer_log(addr(1), addr(2), U256::from(50u64))).unwrap();
        assert_eq!(event.change_amount(addr(1)), BigDecimal::from(-50));
        assert_eq!(event.change_amount(addr(2)), BigDecimal::from(50));
    }

    #[test]
    fn test_u256_to_bigdecimal_large_value() {
        // 2^200 overflows every fixed-width integer type the DB layer offers.
        let big = U256::from(2u64).pow(U256::from(200u64));
        let dec = u256_to_bigdecimal(big);
        assert_eq!(dec.to_string(), big.to_string());
    }

    #[test]
    fn test_address_hex_lowercase() {
        let hexed = address_hex(addr(0xAB));
        assert_eq!(hexed, format!("0x{}", "ab".repeat(20)));
    }
}
