//! Error types for the sale ledger

use primitive_types::U256;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Every precondition failure is reported before any state is touched, so a
/// caller that receives one of the domain variants can assume the ledger is
/// exactly as it was before the call.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation requires `configure` to have run
    #[error("Sale is not initialized")]
    NotInitialized,

    /// Payment below `quantity * cost_per_unit`
    #[error("Insufficient payment: required {required}, provided {provided}")]
    InsufficientPayment {
        /// Amount the purchase costs
        required: U256,
        /// Amount carried by the call
        provided: U256,
    },

    /// Purchase attempted outside `[sale_start, redemption_start]`
    #[error("Outside sale window")]
    OutsideSaleWindow,

    /// Zero quantity, or the participant's cap would be exceeded
    #[error("Purchase cap exceeded: {0}")]
    PurchaseCapExceeded(String),

    /// Global allocation would be exceeded
    #[error("Allocation exhausted: {0}")]
    AllocationExhausted(String),

    /// Redeem with a zero balance
    #[error("Nothing to redeem")]
    NothingToRedeem,

    /// Redeem before `redemption_start`
    #[error("Redemption not open")]
    RedemptionNotOpen,

    /// Caller lacks configuration capability
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Allowlist membership proof rejected
    #[error("Invalid membership proof")]
    InvalidProof,

    /// Forwarding payment to the treasury failed
    #[error("Payment forwarding failed: {0}")]
    PaymentFailed(#[source] SettlementError),

    /// External issuance endpoint refused to mint
    #[error("Issuance failed: {0}")]
    IssuanceFailed(#[source] SettlementError),

    /// Sale timestamps fall outside the representable range
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invariant violation (cap overrun, over-redemption, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Short, stable label used for metrics and structured logs
    pub fn reason(&self) -> &'static str {
        match self {
            Error::NotInitialized => "not_initialized",
            Error::InsufficientPayment { .. } => "insufficient_payment",
            Error::OutsideSaleWindow => "outside_sale_window",
            Error::PurchaseCapExceeded(_) => "purchase_cap_exceeded",
            Error::AllocationExhausted(_) => "allocation_exhausted",
            Error::NothingToRedeem => "nothing_to_redeem",
            Error::RedemptionNotOpen => "redemption_not_open",
            Error::Unauthorized(_) => "unauthorized",
            Error::InvalidProof => "invalid_proof",
            Error::PaymentFailed(_) => "payment_failed",
            Error::IssuanceFailed(_) => "issuance_failed",
            Error::InvalidSchedule(_) => "invalid_schedule",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Metrics(_) => "metrics",
        }
    }

    /// Whether this is a business-rule rejection rather than an infrastructure fault
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::NotInitialized
                | Error::InsufficientPayment { .. }
                | Error::OutsideSaleWindow
                | Error::PurchaseCapExceeded(_)
                | Error::AllocationExhausted(_)
                | Error::NothingToRedeem
                | Error::RedemptionNotOpen
                | Error::Unauthorized(_)
                | Error::InvalidProof
                | Error::InvalidSchedule(_)
        )
    }
}

/// Failure reported by a payment or issuance collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// The counterparty refused the call
    #[error("rejected: {0}")]
    Rejected(String),

    /// The counterparty could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_labels() {
        assert_eq!(Error::NotInitialized.reason(), "not_initialized");
        assert_eq!(Error::InvalidProof.reason(), "invalid_proof");
        assert_eq!(
            Error::AllocationExhausted("sold out".into()).reason(),
            "allocation_exhausted"
        );
    }

    #[test]
    fn test_precondition_classification() {
        assert!(Error::RedemptionNotOpen.is_precondition());
        assert!(!Error::IssuanceFailed(SettlementError::Unavailable("down".into())).is_precondition());
        assert!(Error::InvalidSchedule("overflow".into()).is_precondition());
        assert!(!Error::Storage("disk".into()).is_precondition());
    }

    #[test]
    fn test_settlement_cause_is_kept() {
        let err = Error::PaymentFailed(SettlementError::Rejected("treasury frozen".into()));
        assert_eq!(err.reason(), "payment_failed");
        assert_eq!(
            err.to_string(),
            "Payment forwarding failed: rejected: treasury frozen"
        );
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("rejected: treasury frozen"));
    }

    #[test]
    fn test_insufficient_payment_message() {
        let err = Error::InsufficientPayment {
            required: U256::from(3000u64),
            provided: U256::from(2999u64),
        };
        assert!(err.to_string().contains("3000"));
        assert!(err.to_string().contains("2999"));
    }
}
