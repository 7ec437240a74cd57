//! Sale Ledger
//!
//! Fixed-allocation, capped-per-participant, time-windowed sale of units,
//! paid in a native payment asset and later redeemed for an external asset.
//!
//! # Architecture
//!
//! - **State machine**: [`SaleLedger`] checks every precondition, runs the one
//!   external effect, then mutates in memory
//! - **Single Writer**: One actor task owns the ledger and orders all operations
//! - **Merkle allowlist**: Optional membership proofs gate purchases
//! - **Persistence**: Snapshot and change records committed atomically to RocksDB
//!
//! # Invariants
//!
//! - `total_purchased <= total_for_sale` under sale operations
//! - `total_redeemed <= total_purchased`
//! - Σ(balances) == total_purchased - total_redeemed
//! - A failed operation leaves no trace in state

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod access;
pub mod actor;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod metrics;
pub mod state;
pub mod storage;
pub mod types;

// Re-exports
pub use access::{AccessPolicy, OwnerPolicy};
pub use actor::{AdminChange, LedgerHandle};
pub use collaborators::{Clock, Issuer, ManualClock, PaymentSink, RecordingBackend, SystemClock};
pub use config::{AllowlistMode, Config};
pub use engine::{Collaborators, SaleLedger};
pub use error::{Error, Result, SettlementError};
pub use ledger::{Backends, Ledger};
pub use merkle::{AcceptAll, AllowlistTree, MembershipVerifier, MerkleVerifier};
pub use metrics::Metrics;
pub use state::SaleState;
pub use storage::{Snapshot, Storage};
pub use types::{
    Address, EventRecord, Hash, PurchaseReceipt, RedemptionReceipt, SaleConfig, SaleEvent,
    SaleStatus,
};
