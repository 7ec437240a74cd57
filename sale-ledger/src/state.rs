//! Ledger state and its derived projections
//!
//! `SaleState` is plain data: every field the sale needs, serializable as a
//! single snapshot. The state machine that mutates it lives in
//! [`crate::engine`].

use crate::{
    types::{Address, Hash, SaleConfig, SaleStatus},
    Error, Result,
};
use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Complete sale state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleState {
    /// Units allocated to the sale
    pub total_for_sale: u32,
    /// Running sum of purchases
    pub total_purchased: u32,
    /// Running sum of redemptions
    pub total_redeemed: u32,
    /// Price per unit
    pub cost_per_unit: U256,
    /// Per-participant cap
    pub max_per_participant: u8,
    /// Purchase window opens
    pub sale_start: DateTime<Utc>,
    /// Purchase window closes, redemption opens
    pub redemption_start: DateTime<Utc>,
    /// Payment recipient
    pub treasury: Address,
    /// Minting collaborator
    pub issuance_endpoint: Address,
    /// Per-participant purchase record (also the redeemable balance)
    pub purchased_by: BTreeMap<Address, u8>,
    /// Allowlist Merkle root
    pub allowlist_root: Hash,
    /// Whether `configure` has run
    pub initialized: bool,
    /// First moment purchases reached the allocation
    pub sold_out_at: Option<DateTime<Utc>>,
    /// Addresses holding an operator grant
    pub operators: BTreeSet<Address>,
}

impl Default for SaleState {
    fn default() -> Self {
        Self {
            total_for_sale: 0,
            total_purchased: 0,
            total_redeemed: 0,
            cost_per_unit: U256::zero(),
            max_per_participant: 0,
            sale_start: DateTime::<Utc>::UNIX_EPOCH,
            redemption_start: DateTime::<Utc>::UNIX_EPOCH,
            treasury: Address::ZERO,
            issuance_endpoint: Address::ZERO,
            purchased_by: BTreeMap::new(),
            allowlist_root: [0u8; 32],
            initialized: false,
            sold_out_at: None,
            operators: BTreeSet::new(),
        }
    }
}

impl SaleState {
    /// Redeemable balance of a participant
    pub fn balance_of(&self, participant: &Address) -> u8 {
        self.purchased_by.get(participant).copied().unwrap_or(0)
    }

    /// Configuration projection
    pub fn config(&self) -> SaleConfig {
        SaleConfig {
            sale_start: self.sale_start,
            cost_per_unit: self.cost_per_unit,
            total_for_sale: self.total_for_sale,
            max_per_participant: self.max_per_participant,
            treasury: self.treasury,
            issuance_endpoint: self.issuance_endpoint,
        }
    }

    /// Progress projection
    pub fn status(&self) -> SaleStatus {
        SaleStatus {
            sale_start: self.sale_start,
            redemption_start: self.redemption_start,
            total_purchased: self.total_purchased,
            total_redeemed: self.total_redeemed,
            available_before_redemption: self.total_for_sale.saturating_sub(self.total_purchased),
            redeemable: self.total_purchased.saturating_sub(self.total_redeemed),
            available_after_redemption: self.total_for_sale.saturating_sub(self.total_redeemed),
        }
    }

    /// Units left in the allocation
    pub fn global_remaining(&self) -> u32 {
        self.total_for_sale.saturating_sub(self.total_purchased)
    }

    /// Units a participant may still purchase
    pub fn personal_remaining(&self, participant: &Address) -> u8 {
        self.max_per_participant
            .saturating_sub(self.balance_of(participant))
    }

    /// Whether the purchase window contains `now` (inclusive at both ends)
    pub fn in_sale_window(&self, now: DateTime<Utc>) -> bool {
        self.sale_start <= now && now <= self.redemption_start
    }

    /// Check the ledger invariants
    ///
    /// Returns the first violation found. Admin writes (`set_total_for_sale`,
    /// `set_max_per_participant`) are allowed to produce states that fail
    /// this check; purchases and redemptions never do.
    pub fn check_invariants(&self) -> Result<()> {
        if self.total_purchased > self.total_for_sale {
            return Err(Error::InvariantViolation(format!(
                "total_purchased {} exceeds total_for_sale {}",
                self.total_purchased, self.total_for_sale
            )));
        }

        if self.total_redeemed > self.total_purchased {
            return Err(Error::InvariantViolation(format!(
                "total_redeemed {} exceeds total_purchased {}",
                self.total_redeemed, self.total_purchased
            )));
        }

        if let Some((participant, units)) = self
            .purchased_by
            .iter()
            .find(|(_, units)| **units > self.max_per_participant)
        {
            return Err(Error::InvariantViolation(format!(
                "{} holds {} units, cap is {}",
                participant, units, self.max_per_participant
            )));
        }

        let outstanding: u64 = self.purchased_by.values().map(|u| *u as u64).sum();
        let expected = self.total_purchased as u64 - self.total_redeemed as u64;
        if outstanding != expected {
            return Err(Error::InvariantViolation(format!(
                "outstanding balances {} do not match purchased - redeemed = {}",
                outstanding, expected
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn test_default_state_is_uninitialized() {
        let state = SaleState::default();
        assert!(!state.initialized);
        assert!(state.sold_out_at.is_none());
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_status_saturates_after_allocation_cut() {
        let mut state = SaleState::default();
        state.total_for_sale = 10;
        state.total_purchased = 8;
        state.total_redeemed = 3;
        state.purchased_by.insert(addr(1), 5);
        state.max_per_participant = 5;

        let status = state.status();
        assert_eq!(status.available_before_redemption, 2);
        assert_eq!(status.redeemable, 5);
        assert_eq!(status.available_after_redemption, 7);

        state.total_for_sale = 2;
        let status = state.status();
        assert_eq!(status.available_before_redemption, 0);
        assert_eq!(status.available_after_redemption, 0);
        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn test_sale_window_inclusive() {
        let mut state = SaleState::default();
        let start = Utc::now();
        state.sale_start = start;
        state.redemption_start = start + Duration::days(1);

        assert!(!state.in_sale_window(start - Duration::seconds(1)));
        assert!(state.in_sale_window(start));
        assert!(state.in_sale_window(start + Duration::days(1)));
        assert!(!state.in_sale_window(start + Duration::days(1) + Duration::seconds(1)));
    }

    #[test]
    fn test_personal_remaining() {
        let mut state = SaleState::default();
        state.max_per_participant = 5;
        state.purchased_by.insert(addr(1), 3);
        assert_eq!(state.personal_remaining(&addr(1)), 2);
        assert_eq!(state.personal_remaining(&addr(2)), 5);
    }

    #[test]
    fn test_invariant_detects_balance_mismatch() {
        let mut state = SaleState::default();
        state.total_for_sale = 10;
        state.max_per_participant = 5;
        state.total_purchased = 4;
        state.purchased_by.insert(addr(1), 3);
        let err = state.check_invariants().unwrap_err();
        assert!(err.to_string().contains("outstanding"));
    }
}
