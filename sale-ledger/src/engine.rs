//! Sale state machine
//!
//! `SaleLedger` owns the [`SaleState`] and applies `configure`, `purchase`,
//! `redeem` and the configuration mutators to it. It is synchronous and
//! lock-free; callers that share a ledger go through the actor in
//! [`crate::actor`], which provides the total order of operations.
//!
//! # Atomicity
//!
//! Every operation runs in three phases:
//!
//! 1. All preconditions are checked against the current state.
//! 2. The single fallible external effect (payment forwarding or mint) runs.
//! 3. The in-memory state is mutated; this step cannot fail.
//!
//! A failure in phase 1 or 2 therefore leaves the state untouched.

use crate::{
    access::AccessPolicy,
    collaborators::{Issuer, PaymentSink},
    error::SettlementError,
    merkle::MembershipVerifier,
    state::SaleState,
    types::{
        Address, EventRecord, Hash, PurchaseReceipt, RedemptionReceipt, SaleConfig, SaleEvent,
        SaleStatus,
    },
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use primitive_types::U256;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// External collaborators the ledger consults
#[derive(Clone)]
pub struct Collaborators {
    /// Configuration capability gate
    pub access: Arc<dyn AccessPolicy>,
    /// Allowlist proof verifier
    pub verifier: Arc<dyn MembershipVerifier>,
    /// Treasury payment forwarding
    pub payments: Arc<dyn PaymentSink>,
    /// Asset minting on redemption
    pub issuer: Arc<dyn Issuer>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// The sale ledger
#[derive(Debug)]
pub struct SaleLedger {
    state: SaleState,
    collaborators: Collaborators,

    /// Smallest asset denomination minted per redeemed unit
    unit_scale: U256,

    /// `redemption_start - sale_start` applied by `configure`
    redemption_delay: Duration,

    /// Sequence number of the next emitted event
    next_sequence: u64,

    /// Events emitted and not yet taken by the caller
    pending: Vec<EventRecord>,
}

impl SaleLedger {
    /// Create an empty, unconfigured ledger
    pub fn new(collaborators: Collaborators, unit_scale: U256, redemption_delay: Duration) -> Self {
        Self {
            state: SaleState::default(),
            collaborators,
            unit_scale,
            redemption_delay,
            next_sequence: 0,
            pending: Vec::new(),
        }
    }

    /// Resume from a persisted snapshot
    pub fn with_state(mut self, state: SaleState, next_sequence: u64) -> Self {
        self.state = state;
        self.next_sequence = next_sequence;
        self
    }

    /// Full state (read-only)
    pub fn state(&self) -> &SaleState {
        &self.state
    }

    /// Sequence number the next event will receive
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Drain events emitted since the last call
    pub fn take_events(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.pending)
    }

    // Lifecycle

    /// Set every sale parameter and mark the sale initialized
    ///
    /// Re-running overwrites all parameters. Purchase and redemption counters
    /// are left as they are.
    #[allow(clippy::too_many_arguments)]
    pub fn configure(
        &mut self,
        caller: &Address,
        total_for_sale: u32,
        max_per_participant: u8,
        cost_per_unit: U256,
        sale_start: DateTime<Utc>,
        treasury: Address,
        issuance_endpoint: Address,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.authorize(caller)?;

        let redemption_start = sale_start
            .checked_add_signed(self.redemption_delay)
            .ok_or_else(|| {
                Error::InvalidSchedule(format!(
                    "sale start {} plus redemption delay is out of range",
                    sale_start
                ))
            })?;

        if self.state.initialized {
            tracing::warn!(caller = %caller, "Sale reconfigured; all parameters overwritten");
        }

        self.state.total_for_sale = total_for_sale;
        self.state.max_per_participant = max_per_participant;
        self.state.cost_per_unit = cost_per_unit;
        self.state.sale_start = sale_start;
        self.state.redemption_start = redemption_start;
        self.state.treasury = treasury;
        self.state.issuance_endpoint = issuance_endpoint;
        self.state.initialized = true;

        tracing::info!(
            total_for_sale,
            max_per_participant,
            cost_per_unit = %cost_per_unit,
            sale_start = %sale_start,
            redemption_start = %redemption_start,
            "Sale configured"
        );

        let config = self.state.config();
        self.emit(
            now,
            SaleEvent::Configured {
                config,
                redemption_start,
            },
        );

        Ok(())
    }

    /// Buy `quantity` units for `participant`
    pub fn purchase(
        &mut self,
        participant: &Address,
        quantity: u8,
        proof: &[Hash],
        payment: U256,
        now: DateTime<Utc>,
    ) -> Result<PurchaseReceipt> {
        self.require_initialized()?;

        if !self
            .collaborators
            .verifier
            .verify(participant, proof, &self.state.allowlist_root)
        {
            return Err(Error::InvalidProof);
        }

        let (required, overflow) = U256::from(quantity).overflowing_mul(self.state.cost_per_unit);
        if overflow || payment < required {
            return Err(Error::InsufficientPayment {
                required: if overflow { U256::MAX } else { required },
                provided: payment,
            });
        }

        if !self.state.in_sale_window(now) {
            return Err(Error::OutsideSaleWindow);
        }

        if quantity == 0 {
            return Err(Error::PurchaseCapExceeded(
                "quantity must be positive".to_string(),
            ));
        }

        let held = self.state.balance_of(participant);
        if held as u16 + quantity as u16 > self.state.max_per_participant as u16 {
            return Err(Error::PurchaseCapExceeded(format!(
                "{} holds {} of {}, cannot buy {}",
                participant, held, self.state.max_per_participant, quantity
            )));
        }

        if self.state.total_purchased as u64 + quantity as u64 > self.state.total_for_sale as u64
        {
            return Err(Error::AllocationExhausted(format!(
                "{} of {} units sold, cannot sell {}",
                self.state.total_purchased, self.state.total_for_sale, quantity
            )));
        }

        self.collaborators
            .payments
            .forward(participant, &self.state.treasury, payment)
            .map_err(Error::PaymentFailed)?;

        // Commit
        *self.state.purchased_by.entry(*participant).or_insert(0) += quantity;
        self.state.total_purchased += quantity as u32;

        if self.state.sold_out_at.is_none()
            && self.state.total_purchased == self.state.total_for_sale
        {
            self.state.sold_out_at = Some(now);
            tracing::info!(sold_out_at = %now, "Sale sold out");
        }

        let personal_remaining = self.state.personal_remaining(participant);
        let global_remaining = self.state.global_remaining();

        tracing::info!(
            participant = %participant,
            quantity,
            paid = %payment,
            personal_remaining,
            global_remaining,
            "Purchase recorded"
        );

        self.emit(
            now,
            SaleEvent::Purchased {
                participant: *participant,
                quantity,
                personal_remaining,
                global_remaining,
            },
        );

        Ok(PurchaseReceipt {
            participant: *participant,
            quantity,
            paid: payment,
            personal_remaining,
            global_remaining,
            sold_out_at: self.state.sold_out_at,
        })
    }

    /// Convert `participant`'s whole purchase record into minted asset
    pub fn redeem(&mut self, participant: &Address, now: DateTime<Utc>) -> Result<RedemptionReceipt> {
        self.require_initialized()?;

        let units = self.state.balance_of(participant);
        if units == 0 {
            return Err(Error::NothingToRedeem);
        }

        if now < self.state.redemption_start {
            return Err(Error::RedemptionNotOpen);
        }

        if self.state.total_redeemed as u64 + units as u64 > self.state.total_for_sale as u64 {
            return Err(Error::AllocationExhausted(format!(
                "{} of {} units redeemed, cannot redeem {}",
                self.state.total_redeemed, self.state.total_for_sale, units
            )));
        }

        let minted = U256::from(units)
            .checked_mul(self.unit_scale)
            .ok_or_else(|| {
                Error::IssuanceFailed(SettlementError::Rejected(
                    "mint amount overflows".to_string(),
                ))
            })?;

        self.collaborators
            .issuer
            .mint(&self.state.issuance_endpoint, participant, minted)
            .map_err(Error::IssuanceFailed)?;

        // Commit
        self.state.total_redeemed += units as u32;
        self.state.purchased_by.remove(participant);

        tracing::info!(
            participant = %participant,
            units,
            minted = %minted,
            "Redemption recorded"
        );

        self.emit(
            now,
            SaleEvent::Redeemed {
                participant: *participant,
                units,
                minted,
            },
        );

        Ok(RedemptionReceipt {
            participant: *participant,
            units,
            minted,
        })
    }

    // Configuration mutators

    /// Change the unit price
    pub fn set_cost_per_unit(&mut self, caller: &Address, value: U256, now: DateTime<Utc>) -> Result<()> {
        self.authorize_configured(caller)?;
        let old = std::mem::replace(&mut self.state.cost_per_unit, value);
        self.emit(now, SaleEvent::CostPerUnitChanged { old, new: value });
        Ok(())
    }

    /// Move the sale start (redemption start is not adjusted)
    pub fn set_sale_start(
        &mut self,
        caller: &Address,
        value: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.authorize_configured(caller)?;
        let old = std::mem::replace(&mut self.state.sale_start, value);
        self.warn_if_window_inverted();
        self.emit(now, SaleEvent::SaleStartChanged { old, new: value });
        Ok(())
    }

    /// Move the redemption start
    pub fn set_redemption_start(
        &mut self,
        caller: &Address,
        value: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.authorize_configured(caller)?;
        let old = std::mem::replace(&mut self.state.redemption_start, value);
        self.warn_if_window_inverted();
        self.emit(now, SaleEvent::RedemptionStartChanged { old, new: value });
        Ok(())
    }

    /// Change the payment recipient
    pub fn set_treasury(&mut self, caller: &Address, value: Address, now: DateTime<Utc>) -> Result<()> {
        self.authorize_configured(caller)?;
        let old = std::mem::replace(&mut self.state.treasury, value);
        self.emit(now, SaleEvent::TreasuryChanged { old, new: value });
        Ok(())
    }

    /// Change the per-participant cap
    pub fn set_max_per_participant(
        &mut self,
        caller: &Address,
        value: u8,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.authorize_configured(caller)?;
        let old = std::mem::replace(&mut self.state.max_per_participant, value);
        self.emit(now, SaleEvent::MaxPerParticipantChanged { old, new: value });
        Ok(())
    }

    /// Change the allocation
    ///
    /// Lowering it below `total_purchased` is permitted; status projections
    /// saturate at zero and further purchases fail with `AllocationExhausted`.
    pub fn set_total_for_sale(&mut self, caller: &Address, value: u32, now: DateTime<Utc>) -> Result<()> {
        self.authorize_configured(caller)?;
        let old = std::mem::replace(&mut self.state.total_for_sale, value);
        if value < self.state.total_purchased {
            tracing::warn!(
                total_for_sale = value,
                total_purchased = self.state.total_purchased,
                "Allocation set below units already sold"
            );
        }
        self.emit(now, SaleEvent::TotalForSaleChanged { old, new: value });
        Ok(())
    }

    /// Replace the allowlist root
    pub fn set_allowlist_root(&mut self, caller: &Address, value: Hash, now: DateTime<Utc>) -> Result<()> {
        self.authorize(caller)?;
        let old = std::mem::replace(&mut self.state.allowlist_root, value);
        self.emit(now, SaleEvent::AllowlistRootChanged { old, new: value });
        Ok(())
    }

    /// Change the issuance endpoint
    pub fn set_issuance_endpoint(
        &mut self,
        caller: &Address,
        value: Address,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.authorize_configured(caller)?;
        let old = std::mem::replace(&mut self.state.issuance_endpoint, value);
        self.emit(now, SaleEvent::IssuanceEndpointChanged { old, new: value });
        Ok(())
    }

    /// Grant or revoke operator capability
    pub fn set_operator_permission(
        &mut self,
        caller: &Address,
        operator: Address,
        granted: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.authorize(caller)?;
        let old = if granted {
            !self.state.operators.insert(operator)
        } else {
            self.state.operators.remove(&operator)
        };
        tracing::info!(operator = %operator, granted, "Operator permission changed");
        self.emit(
            now,
            SaleEvent::OperatorPermissionChanged {
                operator,
                old,
                new: granted,
            },
        );
        Ok(())
    }

    // Read projections

    /// Sale parameters
    pub fn config(&self) -> Result<SaleConfig> {
        self.require_initialized()?;
        Ok(self.state.config())
    }

    /// Sale progress
    pub fn status(&self) -> Result<SaleStatus> {
        self.require_initialized()?;
        Ok(self.state.status())
    }

    /// Redeemable balance of `participant`
    pub fn balance_of(&self, participant: &Address) -> u8 {
        self.state.balance_of(participant)
    }

    /// Whether `configure` has run
    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    /// First moment the allocation sold out
    pub fn sold_out_at(&self) -> Option<DateTime<Utc>> {
        self.state.sold_out_at
    }

    /// Units allocated to the sale
    pub fn total_for_sale(&self) -> u32 {
        self.state.total_for_sale
    }

    /// Units purchased
    pub fn total_purchased(&self) -> u32 {
        self.state.total_purchased
    }

    /// Units redeemed
    pub fn total_redeemed(&self) -> u32 {
        self.state.total_redeemed
    }

    /// Unit price
    pub fn cost_per_unit(&self) -> U256 {
        self.state.cost_per_unit
    }

    /// Per-participant cap
    pub fn max_per_participant(&self) -> u8 {
        self.state.max_per_participant
    }

    /// Purchase window opens
    pub fn sale_start(&self) -> DateTime<Utc> {
        self.state.sale_start
    }

    /// Redemption opens
    pub fn redemption_start(&self) -> DateTime<Utc> {
        self.state.redemption_start
    }

    /// Payment recipient
    pub fn treasury(&self) -> Address {
        self.state.treasury
    }

    /// Minting collaborator
    pub fn issuance_endpoint(&self) -> Address {
        self.state.issuance_endpoint
    }

    /// Allowlist root
    pub fn allowlist_root(&self) -> Hash {
        self.state.allowlist_root
    }

    /// Whether `address` holds an operator grant
    pub fn is_operator(&self, address: &Address) -> bool {
        self.state.operators.contains(address)
    }

    // Internals

    fn authorize(&self, caller: &Address) -> Result<()> {
        if self
            .collaborators
            .access
            .has_config_capability(caller, &self.state.operators)
        {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "{} lacks configuration capability",
                caller
            )))
        }
    }

    fn authorize_configured(&self, caller: &Address) -> Result<()> {
        self.authorize(caller)?;
        self.require_initialized()
    }

    fn require_initialized(&self) -> Result<()> {
        if self.state.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn warn_if_window_inverted(&self) {
        if self.state.redemption_start < self.state.sale_start {
            tracing::warn!(
                sale_start = %self.state.sale_start,
                redemption_start = %self.state.redemption_start,
                "Redemption start precedes sale start; purchase window is empty"
            );
        }
    }

    fn emit(&mut self, now: DateTime<Utc>, event: SaleEvent) {
        let record = EventRecord {
            event_id: Uuid::now_v7(),
            sequence: self.next_sequence,
            recorded_at: now,
            event,
        };
        tracing::debug!(
            sequence = record.sequence,
            event = record.event.name(),
            "Event emitted"
        );
        self.next_sequence += 1;
        self.pending.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::OwnerPolicy;
    use crate::collaborators::RecordingBackend;
    use crate::merkle::{AcceptAll, AllowlistTree, MerkleVerifier};
    use chrono::TimeZone;

    const SCALE: u64 = 1_000_000_000_000_000_000;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn owner() -> Address {
        addr(0xaa)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn ledger_with(verifier: Arc<dyn MembershipVerifier>) -> (SaleLedger, RecordingBackend) {
        let backend = RecordingBackend::new();
        let collaborators = Collaborators {
            access: Arc::new(OwnerPolicy::new(owner())),
            verifier,
            payments: Arc::new(backend.clone()),
            issuer: Arc::new(backend.clone()),
        };
        let ledger = SaleLedger::new(collaborators, U256::from(SCALE), Duration::days(1));
        (ledger, backend)
    }

    /// totalForSale=100, maxPerParticipant=5, costPerUnit=1000, saleStart=T
    fn configured() -> (SaleLedger, RecordingBackend) {
        let (mut ledger, backend) = ledger_with(Arc::new(AcceptAll));
        ledger
            .configure(
                &owner(),
                100,
                5,
                U256::from(1000u64),
                t0(),
                addr(0xa0),
                addr(0xb0),
                t0(),
            )
            .unwrap();
        ledger.take_events();
        (ledger, backend)
    }

    #[test]
    fn test_configure_derives_redemption_start() {
        let (ledger, _) = configured();
        assert!(ledger.is_initialized());
        assert_eq!(ledger.redemption_start(), t0() + Duration::days(1));
        assert_eq!(ledger.total_for_sale(), 100);
        assert_eq!(ledger.max_per_participant(), 5);
        assert_eq!(ledger.cost_per_unit(), U256::from(1000u64));
        assert_eq!(ledger.treasury(), addr(0xa0));
        assert_eq!(ledger.issuance_endpoint(), addr(0xb0));
    }

    #[test]
    fn test_configure_requires_capability() {
        let (mut ledger, _) = ledger_with(Arc::new(AcceptAll));
        let err = ledger
            .configure(&addr(1), 100, 5, U256::one(), t0(), addr(2), addr(3), t0())
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(!ledger.is_initialized());
        assert!(ledger.take_events().is_empty());
    }

    #[test]
    fn test_configure_rejects_unrepresentable_redemption_start() {
        let (mut ledger, _) = configured();
        let before = ledger.state().clone();

        let err = ledger
            .configure(
                &owner(),
                10,
                1,
                U256::one(),
                DateTime::<Utc>::MAX_UTC,
                addr(4),
                addr(5),
                t0(),
            )
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSchedule(_)));
        assert_eq!(err.reason(), "invalid_schedule");
        assert_eq!(ledger.state(), &before);
        assert!(ledger.take_events().is_empty());

        // Still usable afterwards
        ledger
            .purchase(&addr(1), 1, &[], U256::from(1000u64), t0())
            .unwrap();
    }

    #[test]
    fn test_reconfigure_overwrites_parameters_keeps_counters() {
        let (mut ledger, _) = configured();
        ledger
            .purchase(&addr(1), 2, &[], U256::from(2000u64), t0())
            .unwrap();
        ledger
            .configure(&owner(), 50, 3, U256::from(7u64), t0(), addr(4), addr(5), t0())
            .unwrap();

        assert_eq!(ledger.total_for_sale(), 50);
        assert_eq!(ledger.max_per_participant(), 3);
        assert_eq!(ledger.total_purchased(), 2);
        assert_eq!(ledger.balance_of(&addr(1)), 2);
    }

    #[test]
    fn test_operations_before_configure_fail() {
        let (mut ledger, _) = ledger_with(Arc::new(AcceptAll));
        assert!(matches!(
            ledger.purchase(&addr(1), 1, &[], U256::from(1000u64), t0()),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(ledger.redeem(&addr(1), t0()), Err(Error::NotInitialized)));
        assert!(matches!(ledger.status(), Err(Error::NotInitialized)));
        assert!(matches!(ledger.config(), Err(Error::NotInitialized)));
        assert!(matches!(
            ledger.set_cost_per_unit(&owner(), U256::one(), t0()),
            Err(Error::NotInitialized)
        ));
        assert!(ledger.sold_out_at().is_none());
    }

    #[test]
    fn test_allowlist_and_operators_settable_before_configure() {
        let (mut ledger, _) = ledger_with(Arc::new(AcceptAll));
        ledger.set_allowlist_root(&owner(), [9u8; 32], t0()).unwrap();
        ledger
            .set_operator_permission(&owner(), addr(7), true, t0())
            .unwrap();

        assert_eq!(ledger.allowlist_root(), [9u8; 32]);
        assert!(ledger.is_operator(&addr(7)));

        // The operator can now configure
        ledger
            .configure(&addr(7), 10, 1, U256::one(), t0(), addr(2), addr(3), t0())
            .unwrap();
        assert!(ledger.is_initialized());
    }

    #[test]
    fn test_scenario_purchase_up_to_cap() {
        let (mut ledger, backend) = configured();
        let p = addr(1);

        let receipt = ledger
            .purchase(&p, 5, &[], U256::from(5000u64), t0())
            .unwrap();
        assert_eq!(receipt.personal_remaining, 0);
        assert_eq!(receipt.global_remaining, 95);
        assert_eq!(ledger.balance_of(&p), 5);
        assert_eq!(ledger.total_purchased(), 5);
        assert_eq!(backend.transfers().len(), 1);
        assert_eq!(backend.transfers()[0].to, addr(0xa0));

        let err = ledger
            .purchase(&p, 1, &[], U256::from(1000u64), t0())
            .unwrap_err();
        assert!(matches!(err, Error::PurchaseCapExceeded(_)));
    }

    #[test]
    fn test_scenario_sale_window() {
        let (mut ledger, _) = configured();
        let p = addr(1);

        let err = ledger
            .purchase(&p, 3, &[], U256::from(3000u64), t0() - Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(err, Error::OutsideSaleWindow));

        ledger
            .purchase(&p, 3, &[], U256::from(3000u64), t0())
            .unwrap();
        assert_eq!(ledger.balance_of(&p), 3);
    }

    #[test]
    fn test_purchase_allowed_at_redemption_start_not_after() {
        let (mut ledger, _) = configured();
        let close = t0() + Duration::days(1);

        ledger
            .purchase(&addr(1), 1, &[], U256::from(1000u64), close)
            .unwrap();
        let err = ledger
            .purchase(&addr(2), 1, &[], U256::from(1000u64), close + Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(err, Error::OutsideSaleWindow));
    }

    #[test]
    fn test_scenario_redeem_and_sell_out() {
        let (mut ledger, backend) = configured();
        let p = addr(1);
        let q = addr(2);
        let r = addr(3);

        ledger
            .purchase(&p, 5, &[], U256::from(5000u64), t0())
            .unwrap();

        let err = ledger.redeem(&p, t0() + Duration::hours(23)).unwrap_err();
        assert!(matches!(err, Error::RedemptionNotOpen));

        let receipt = ledger.redeem(&p, t0() + Duration::days(1)).unwrap();
        assert_eq!(receipt.units, 5);
        assert_eq!(ledger.total_redeemed(), 5);
        assert_eq!(ledger.balance_of(&p), 0);

        let mints = backend.mints();
        assert_eq!(mints.len(), 1);
        assert_eq!(mints[0].recipient, p);
        assert_eq!(mints[0].endpoint, addr(0xb0));
        assert_eq!(mints[0].amount, U256::from(5u64) * U256::from(SCALE));

        // Q buys the rest at the last instant of the window
        ledger.set_max_per_participant(&owner(), 100, t0()).unwrap();
        let close = t0() + Duration::days(1);
        let receipt = ledger
            .purchase(&q, 95, &[], U256::from(95_000u64), close)
            .unwrap();
        assert_eq!(ledger.total_purchased(), 100);
        assert_eq!(receipt.sold_out_at, Some(close));
        assert_eq!(ledger.sold_out_at(), Some(close));

        let err = ledger
            .purchase(&r, 1, &[], U256::from(1000u64), close)
            .unwrap_err();
        assert!(matches!(err, Error::AllocationExhausted(_)));
    }

    #[test]
    fn test_redeem_twice_fails() {
        let (mut ledger, _) = configured();
        let p = addr(1);
        ledger
            .purchase(&p, 2, &[], U256::from(2000u64), t0())
            .unwrap();

        let later = t0() + Duration::days(2);
        ledger.redeem(&p, later).unwrap();
        assert!(matches!(ledger.redeem(&p, later), Err(Error::NothingToRedeem)));
    }

    #[test]
    fn test_insufficient_payment() {
        let (mut ledger, backend) = configured();
        let err = ledger
            .purchase(&addr(1), 3, &[], U256::from(2999u64), t0())
            .unwrap_err();
        match err {
            Error::InsufficientPayment { required, provided } => {
                assert_eq!(required, U256::from(3000u64));
                assert_eq!(provided, U256::from(2999u64));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(backend.transfers().is_empty());
    }

    #[test]
    fn test_overpayment_is_forwarded_in_full() {
        let (mut ledger, backend) = configured();
        ledger
            .purchase(&addr(1), 1, &[], U256::from(1500u64), t0())
            .unwrap();
        assert_eq!(backend.transfers()[0].amount, U256::from(1500u64));
    }

    #[test]
    fn test_price_overflow_is_insufficient_payment() {
        let (mut ledger, _) = configured();
        ledger.set_cost_per_unit(&owner(), U256::MAX, t0()).unwrap();
        let err = ledger
            .purchase(&addr(1), 2, &[], U256::MAX, t0())
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientPayment { .. }));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let (mut ledger, _) = configured();
        let err = ledger
            .purchase(&addr(1), 0, &[], U256::zero(), t0())
            .unwrap_err();
        assert!(matches!(err, Error::PurchaseCapExceeded(_)));
    }

    #[test]
    fn test_precondition_order() {
        let (mut ledger, _) = configured();
        // Underpaid and outside the window: payment is checked first
        let err = ledger
            .purchase(&addr(1), 1, &[], U256::zero(), t0() - Duration::days(1))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientPayment { .. }));

        // Outside window and over cap: window is checked first
        let err = ledger
            .purchase(&addr(1), 9, &[], U256::from(9000u64), t0() - Duration::days(1))
            .unwrap_err();
        assert!(matches!(err, Error::OutsideSaleWindow));
    }

    #[test]
    fn test_merkle_allowlist_enforced() {
        let members = vec![addr(1), addr(2), addr(3)];
        let tree = AllowlistTree::from_members(&members);
        let (mut ledger, _) = ledger_with(Arc::new(MerkleVerifier));
        ledger
            .configure(&owner(), 100, 5, U256::from(1000u64), t0(), addr(0xa0), addr(0xb0), t0())
            .unwrap();
        ledger.set_allowlist_root(&owner(), tree.root(), t0()).unwrap();

        let proof = tree.proof_for(&addr(2)).unwrap();
        ledger
            .purchase(&addr(2), 1, &proof, U256::from(1000u64), t0())
            .unwrap();

        let err = ledger
            .purchase(&addr(9), 1, &proof, U256::from(1000u64), t0())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidProof));
    }

    #[test]
    fn test_failed_payment_leaves_state_untouched() {
        let (mut ledger, backend) = configured();
        let before = ledger.state().clone();
        let sequence = ledger.next_sequence();

        backend.fail_next_payment("treasury rejected");
        let err = ledger
            .purchase(&addr(1), 1, &[], U256::from(1000u64), t0())
            .unwrap_err();
        assert!(matches!(err, Error::PaymentFailed(_)));
        assert_eq!(ledger.state(), &before);
        assert_eq!(ledger.next_sequence(), sequence);
    }

    #[test]
    fn test_failed_mint_rolls_back_redemption() {
        let (mut ledger, backend) = configured();
        let p = addr(1);
        ledger
            .purchase(&p, 4, &[], U256::from(4000u64), t0())
            .unwrap();
        ledger.take_events();
        let before = ledger.state().clone();

        backend.fail_next_mint("endpoint unavailable");
        let later = t0() + Duration::days(1);
        let err = ledger.redeem(&p, later).unwrap_err();
        assert!(matches!(err, Error::IssuanceFailed(_)));
        assert_eq!(ledger.state(), &before);
        assert!(ledger.take_events().is_empty());

        // Retry succeeds once the endpoint recovers
        ledger.redeem(&p, later).unwrap();
        assert_eq!(ledger.total_redeemed(), 4);
    }

    #[test]
    fn test_redeem_capped_by_allocation() {
        let (mut ledger, _) = configured();
        let p = addr(1);
        ledger
            .purchase(&p, 5, &[], U256::from(5000u64), t0())
            .unwrap();
        ledger.set_total_for_sale(&owner(), 4, t0()).unwrap();

        let err = ledger.redeem(&p, t0() + Duration::days(1)).unwrap_err();
        assert!(matches!(err, Error::AllocationExhausted(_)));
        assert_eq!(ledger.balance_of(&p), 5);
    }

    #[test]
    fn test_sold_out_marker_not_rearmed() {
        let (mut ledger, _) = configured();
        ledger.set_total_for_sale(&owner(), 5, t0()).unwrap();
        ledger
            .purchase(&addr(1), 5, &[], U256::from(5000u64), t0())
            .unwrap();
        assert_eq!(ledger.sold_out_at(), Some(t0()));

        ledger.set_total_for_sale(&owner(), 10, t0()).unwrap();
        let later = t0() + Duration::hours(1);
        ledger
            .purchase(&addr(2), 5, &[], U256::from(5000u64), later)
            .unwrap();
        assert_eq!(ledger.total_purchased(), 10);
        assert_eq!(ledger.sold_out_at(), Some(t0()));
    }

    #[test]
    fn test_setters_emit_old_and_new() {
        let (mut ledger, _) = configured();
        let now = t0();

        ledger.set_cost_per_unit(&owner(), U256::from(5u64), now).unwrap();
        ledger.set_sale_start(&owner(), now + Duration::hours(1), now).unwrap();
        ledger
            .set_redemption_start(&owner(), now + Duration::days(3), now)
            .unwrap();
        ledger.set_treasury(&owner(), addr(0xa1), now).unwrap();
        ledger.set_max_per_participant(&owner(), 9, now).unwrap();
        ledger.set_total_for_sale(&owner(), 200, now).unwrap();
        ledger.set_allowlist_root(&owner(), [1u8; 32], now).unwrap();
        ledger.set_issuance_endpoint(&owner(), addr(0xb1), now).unwrap();
        ledger
            .set_operator_permission(&owner(), addr(0x0c), true, now)
            .unwrap();

        let events: Vec<SaleEvent> = ledger.take_events().into_iter().map(|r| r.event).collect();
        assert_eq!(
            events,
            vec![
                SaleEvent::CostPerUnitChanged {
                    old: U256::from(1000u64),
                    new: U256::from(5u64)
                },
                SaleEvent::SaleStartChanged {
                    old: now,
                    new: now + Duration::hours(1)
                },
                SaleEvent::RedemptionStartChanged {
                    old: now + Duration::days(1),
                    new: now + Duration::days(3)
                },
                SaleEvent::TreasuryChanged {
                    old: addr(0xa0),
                    new: addr(0xa1)
                },
                SaleEvent::MaxPerParticipantChanged { old: 5, new: 9 },
                SaleEvent::TotalForSaleChanged { old: 100, new: 200 },
                SaleEvent::AllowlistRootChanged {
                    old: [0u8; 32],
                    new: [1u8; 32]
                },
                SaleEvent::IssuanceEndpointChanged {
                    old: addr(0xb0),
                    new: addr(0xb1)
                },
                SaleEvent::OperatorPermissionChanged {
                    operator: addr(0x0c),
                    old: false,
                    new: true
                },
            ]
        );
    }

    #[test]
    fn test_setters_require_capability() {
        let (mut ledger, _) = configured();
        let stranger = addr(0x55);
        let before = ledger.state().clone();

        assert!(matches!(
            ledger.set_treasury(&stranger, stranger, t0()),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            ledger.set_operator_permission(&stranger, stranger, true, t0()),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            ledger.set_allowlist_root(&stranger, [3u8; 32], t0()),
            Err(Error::Unauthorized(_))
        ));
        assert_eq!(ledger.state(), &before);
    }

    #[test]
    fn test_revoked_operator_loses_capability() {
        let (mut ledger, _) = configured();
        let op = addr(0x0c);
        ledger.set_operator_permission(&owner(), op, true, t0()).unwrap();
        ledger.set_total_for_sale(&op, 150, t0()).unwrap();

        ledger.set_operator_permission(&owner(), op, false, t0()).unwrap();
        assert!(matches!(
            ledger.set_total_for_sale(&op, 10, t0()),
            Err(Error::Unauthorized(_))
        ));
        assert_eq!(ledger.total_for_sale(), 150);
    }

    #[test]
    fn test_purchase_event_record() {
        let (mut ledger, _) = configured();
        ledger
            .purchase(&addr(1), 2, &[], U256::from(2000u64), t0())
            .unwrap();

        let records = ledger.take_events();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[0].recorded_at, t0());
        assert_eq!(
            records[0].event,
            SaleEvent::Purchased {
                participant: addr(1),
                quantity: 2,
                personal_remaining: 3,
                global_remaining: 98
            }
        );
    }

    #[test]
    fn test_status_projection() {
        let (mut ledger, _) = configured();
        ledger
            .purchase(&addr(1), 5, &[], U256::from(5000u64), t0())
            .unwrap();
        ledger
            .purchase(&addr(2), 3, &[], U256::from(3000u64), t0())
            .unwrap();
        ledger.redeem(&addr(1), t0() + Duration::days(1)).unwrap();

        let status = ledger.status().unwrap();
        assert_eq!(status.total_purchased, 8);
        assert_eq!(status.total_redeemed, 5);
        assert_eq!(status.available_before_redemption, 92);
        assert_eq!(status.redeemable, 3);
        assert_eq!(status.available_after_redemption, 95);
        assert_eq!(status, ledger.status().unwrap());
        assert!(ledger.state().check_invariants().is_ok());
    }
}
