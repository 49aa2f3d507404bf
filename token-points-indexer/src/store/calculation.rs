// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Settlement receipts.
//!
//! Each settled (chain, user, period) tuple is identified by a deterministic
//! SHA-256 fingerprint with a unique index; inserting a duplicate fingerprint
//! is the signal that the settlement already happened.

use chrono::{DateTime, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use sha2::{Digest, Sha256};
use token_points_pg_db::Db;
use token_points_schema::models::{NewPointCalculation, PointCalculation};
use token_points_schema::schema::point_calculations;

use super::storage_err;
use crate::error::PointsResult;

/// Result of attempting to write a settlement receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The fingerprint barrier fired: this settlement already exists.
    AlreadyExists,
}

#[derive(Clone)]
pub struct CalculationStore {
    db: Db,
}

impl CalculationStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Deterministic fingerprint for a settled (chain, user, period) tuple:
    /// `SHA-256(chain_id:user:unix(start):unix(end))`, hex encoded.
    pub fn fingerprint(
        chain: &str,
        user: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> String {
        let data = format!(
            "{}:{}:{}:{}",
            chain,
            user,
            period_start.timestamp(),
            period_end.timestamp()
        );
        hex::encode(Sha256::digest(data.as_bytes()))
    }

    pub async fn exists_by_hash(&self, hash: &str) -> PointsResult<bool> {
        use point_calculations::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let found: Option<i64> = dsl::point_calculations
            .filter(dsl::calculation_hash.eq(hash))
            .select(dsl::id)
            .first(&mut conn)
            .await
            .optional()?;

        Ok(found.is_some())
    }

    /// Insert a settlement receipt. A unique violation on the fingerprint is
    /// translated to [`CreateOutcome::AlreadyExists`] rather than an error.
    pub async fn create(&self, calc: &NewPointCalculation) -> PointsResult<CreateOutcome> {
        use point_calculations::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        match diesel::insert_into(dsl::point_calculations)
            .values(calc)
            .execute(&mut conn)
            .await
        {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Newest settlement receipts for one user.
    pub async fn by_user(
        &self,
        chain: &str,
        user: &str,
        limit: i64,
    ) -> PointsResult<Vec<PointCalculation>> {
        use point_calculations::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let calcs = dsl::point_calculations
            .filter(dsl::chain_id.eq(chain))
            .filter(dsl::user_address.eq(user))
            .order(dsl::period_end.desc())
            .limit(limit)
            .select(PointCalculation::as_select())
            .load(&mut conn)
            .await?;

        Ok(calcs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let end = Utc.timestamp_opt(1_700_003_600, 0).unwrap();
        let a = CalculationStore::fingerprint("eth-mainnet", "0xabc", start, end);
        let b = CalculationStore::fingerprint("eth-mainnet", "0xabc", start, end);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_distinguishes_inputs() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let end = Utc.timestamp_opt(1_700_003_600, 0).unwrap();
        let base = CalculationStore::fingerprint("eth-mainnet", "0xabc", start, end);

        assert_ne!(
            base,
            CalculationStore::fingerprint("eth-sepolia", "0xabc", start, end)
        );
        assert_ne!(
            base,
            CalculationStore::fingerprint("eth-mainnet", "0xabd", start, end)
        );
        assert_ne!(
            base,
            CalculationStore::fingerprint(
                "eth-mainnet",
                "0xabc",
                start,
                Utc.timestamp_opt(1_700_007_200, 0).unwrap()
            )
        );
    }

    /// Pin the exact preimage format: chain:user:unix_start:unix_end.
    #[test]
    fn test_fingerprint_preimage_format() {
        let start = Utc.timestamp_opt(0, 0).unwrap();
        let end = Utc.timestamp_opt(3600, 0).unwrap();
        let expected = hex::encode(Sha256::digest("chain:0xa:0:3600".as_bytes()));
        assert_eq!(
            CalculationStore::fingerprint("chain", "0xa", start, end),
            expected
        );
    }
}
