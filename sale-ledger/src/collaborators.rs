//! External collaborators consumed by the ledger
//!
//! The ledger never moves money or mints assets itself. It hands those effects
//! to the traits below and only commits its own counters once they succeed.

use crate::{error::SettlementError, types::Address};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use primitive_types::U256;
use std::sync::Arc;

/// Moves purchase payments to the treasury
pub trait PaymentSink: Send + Sync {
    /// Forward `amount` received from `from` to `treasury`
    fn forward(
        &self,
        from: &Address,
        treasury: &Address,
        amount: U256,
    ) -> Result<(), SettlementError>;
}

/// Mints the redeemed asset
pub trait Issuer: Send + Sync {
    /// Mint `amount` (smallest denomination) to `recipient` via `endpoint`
    fn mint(
        &self,
        endpoint: &Address,
        recipient: &Address,
        amount: U256,
    ) -> Result<(), SettlementError>;
}

/// Source of ledger time
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Jump to `instant`
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }

    /// Move forward by `delta`
    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A forwarded payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Payer
    pub from: Address,
    /// Receiver
    pub to: Address,
    /// Amount
    pub amount: U256,
}

/// A mint request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintCall {
    /// Issuance endpoint used
    pub endpoint: Address,
    /// Recipient
    pub recipient: Address,
    /// Amount
    pub amount: U256,
}

/// In-memory payment sink and issuer that records every call
///
/// Used when the ledger runs without a real settlement backend, and by tests
/// to assert on side effects. `fail_next_*` makes the next call fail once.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    inner: Arc<Mutex<RecordingInner>>,
}

#[derive(Debug, Default)]
struct RecordingInner {
    transfers: Vec<Transfer>,
    mints: Vec<MintCall>,
    fail_next_payment: Option<String>,
    fail_next_mint: Option<String>,
}

impl RecordingBackend {
    /// Create empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Payments forwarded so far
    pub fn transfers(&self) -> Vec<Transfer> {
        self.inner.lock().transfers.clone()
    }

    /// Mints performed so far
    pub fn mints(&self) -> Vec<MintCall> {
        self.inner.lock().mints.clone()
    }

    /// Fail the next `forward` with `reason`
    pub fn fail_next_payment(&self, reason: impl Into<String>) {
        self.inner.lock().fail_next_payment = Some(reason.into());
    }

    /// Fail the next `mint` with `reason`
    pub fn fail_next_mint(&self, reason: impl Into<String>) {
        self.inner.lock().fail_next_mint = Some(reason.into());
    }
}

impl PaymentSink for RecordingBackend {
    fn forward(
        &self,
        from: &Address,
        treasury: &Address,
        amount: U256,
    ) -> Result<(), SettlementError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.fail_next_payment.take() {
            return Err(SettlementError::Rejected(reason));
        }
        inner.transfers.push(Transfer {
            from: *from,
            to: *treasury,
            amount,
        });
        Ok(())
    }
}

impl Issuer for RecordingBackend {
    fn mint(
        &self,
        endpoint: &Address,
        recipient: &Address,
        amount: U256,
    ) -> Result<(), SettlementError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.fail_next_mint.take() {
            return Err(SettlementError::Rejected(reason));
        }
        inner.mints.push(MintCall {
            endpoint: *endpoint,
            recipient: *recipient,
            amount,
        });
        Ok(())
    }
}
