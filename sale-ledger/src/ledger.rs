//! Main ledger orchestration layer
//!
//! This module ties together storage, the state machine and the actor
//! into a high-level API for running a sale.
//!
//! # Example
//!
//! ```no_run
//! use sale_ledger::{Backends, Config, Ledger, RecordingBackend, SystemClock};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> sale_ledger::Result<()> {
//!     let mut config = Config::default();
//!     config.owner = "0x1111111111111111111111111111111111111111".parse()?;
//!     let backend = RecordingBackend::new();
//!     let backends = Backends {
//!         payments: Arc::new(backend.clone()),
//!         issuer: Arc::new(backend),
//!         clock: Arc::new(SystemClock),
//!     };
//!     let ledger = Ledger::open(config, backends).await?;
//!
//!     // let receipt = ledger.purchase(participant, 3, proof, payment).await?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    access::OwnerPolicy,
    actor::{spawn_ledger_actor, AdminChange, LedgerHandle},
    collaborators::{Clock, Issuer, PaymentSink},
    config::AllowlistMode,
    engine::{Collaborators, SaleLedger},
    merkle::{AcceptAll, MembershipVerifier, MerkleVerifier},
    metrics::Metrics,
    state::SaleState,
    storage::LedgerStore,
    types::{
        Address, EventRecord, Hash, PurchaseReceipt, RedemptionReceipt, SaleConfig, SaleStatus,
    },
    Config, Result, Storage,
};
use chrono::{DateTime, Utc};
use primitive_types::U256;
use std::fmt;
use std::sync::Arc;

/// Settlement and time sources the ledger runs against
#[derive(Clone)]
pub struct Backends {
    /// Treasury payment forwarding
    pub payments: Arc<dyn PaymentSink>,
    /// Asset minting on redemption
    pub issuer: Arc<dyn Issuer>,
    /// Ledger time
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for async operations
    handle: LedgerHandle,

    /// Storage shared with the actor
    storage: Arc<Storage>,

    /// Metrics shared with the actor
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("storage", &self.storage)
            .field("metrics", &self.metrics)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open ledger with configuration
    ///
    /// Restores the last committed snapshot for `config.namespace`, if any.
    pub async fn open(config: Config, backends: Backends) -> Result<Self> {
        config.validate()?;

        // Open storage
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;

        let verifier: Arc<dyn MembershipVerifier> = match config.allowlist.mode {
            AllowlistMode::Enforced => Arc::new(MerkleVerifier),
            AllowlistMode::Disabled => {
                tracing::warn!("Allowlist verification disabled; every proof is accepted");
                Arc::new(AcceptAll)
            }
        };

        let collaborators = Collaborators {
            access: Arc::new(OwnerPolicy::new(config.owner)),
            verifier,
            payments: backends.payments,
            issuer: backends.issuer,
        };

        let mut ledger = SaleLedger::new(
            collaborators,
            U256::from(config.issuance.unit_scale),
            config.sale.redemption_delay()?,
        );

        match storage.load_snapshot()? {
            Some(snapshot) => {
                if let Err(violation) = snapshot.state.check_invariants() {
                    tracing::warn!(error = %violation, "Restored state is outside invariants");
                }
                tracing::info!(
                    next_sequence = snapshot.next_sequence,
                    initialized = snapshot.state.initialized,
                    total_purchased = snapshot.state.total_purchased,
                    "Restored ledger snapshot"
                );
                ledger = ledger.with_state(snapshot.state, snapshot.next_sequence);
            }
            None => tracing::info!(namespace = %config.namespace, "Starting empty ledger"),
        }

        if let Ok(status) = ledger.status() {
            metrics.observe_status(&status);
        }

        // Spawn actor
        let handle = spawn_ledger_actor(
            ledger,
            Some(storage.clone() as Arc<dyn LedgerStore>),
            backends.clock,
            metrics.clone(),
            config.actor.mailbox_capacity,
        );

        Ok(Self {
            handle,
            storage,
            metrics,
            config,
        })
    }

    /// Cloneable handle for sharing the ledger across tasks
    pub fn handle(&self) -> LedgerHandle {
        self.handle.clone()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration the ledger was opened with
    pub fn settings(&self) -> &Config {
        &self.config
    }

    /// Storage namespace
    pub fn namespace(&self) -> Hash {
        self.storage.namespace()
    }

    // Lifecycle

    /// Set every sale parameter and mark the sale initialized
    pub async fn configure(&self, caller: Address, config: SaleConfig) -> Result<()> {
        self.handle.configure(caller, config).await
    }

    /// Purchase `quantity` units, forwarding `payment` to the treasury
    pub async fn purchase(
        &self,
        participant: Address,
        quantity: u8,
        proof: Vec<Hash>,
        payment: U256,
    ) -> Result<PurchaseReceipt> {
        self.handle
            .purchase(participant, quantity, proof, payment)
            .await
    }

    /// Redeem the participant's whole purchase record
    pub async fn redeem(&self, participant: Address) -> Result<RedemptionReceipt> {
        self.handle.redeem(participant).await
    }

    // Configuration mutators

    /// Change the price per unit
    pub async fn set_cost_per_unit(&self, caller: Address, value: U256) -> Result<()> {
        self.handle.admin(caller, AdminChange::CostPerUnit(value)).await
    }

    /// Move the start of the purchase window
    pub async fn set_sale_start(&self, caller: Address, value: DateTime<Utc>) -> Result<()> {
        self.handle.admin(caller, AdminChange::SaleStart(value)).await
    }

    /// Move the end of the purchase window and the start of redemption
    pub async fn set_redemption_start(&self, caller: Address, value: DateTime<Utc>) -> Result<()> {
        self.handle
            .admin(caller, AdminChange::RedemptionStart(value))
            .await
    }

    /// Change the payment destination
    pub async fn set_treasury(&self, caller: Address, value: Address) -> Result<()> {
        self.handle.admin(caller, AdminChange::Treasury(value)).await
    }

    /// Change the per-participant cap
    pub async fn set_max_per_participant(&self, caller: Address, value: u8) -> Result<()> {
        self.handle
            .admin(caller, AdminChange::MaxPerParticipant(value))
            .await
    }

    /// Change the global allocation
    pub async fn set_total_for_sale(&self, caller: Address, value: u32) -> Result<()> {
        self.handle
            .admin(caller, AdminChange::TotalForSale(value))
            .await
    }

    /// Replace the allowlist root
    pub async fn set_allowlist_root(&self, caller: Address, value: Hash) -> Result<()> {
        self.handle
            .admin(caller, AdminChange::AllowlistRoot(value))
            .await
    }

    /// Change the issuance collaborator
    pub async fn set_issuance_endpoint(&self, caller: Address, value: Address) -> Result<()> {
        self.handle
            .admin(caller, AdminChange::IssuanceEndpoint(value))
            .await
    }

    /// Grant or revoke operator capability
    pub async fn set_operator_permission(
        &self,
        caller: Address,
        operator: Address,
        granted: bool,
    ) -> Result<()> {
        self.handle
            .admin(caller, AdminChange::OperatorPermission { operator, granted })
            .await
    }

    // Reads

    /// Sale parameters
    pub async fn config(&self) -> Result<SaleConfig> {
        self.handle.config().await
    }

    /// Sale progress
    pub async fn status(&self) -> Result<SaleStatus> {
        self.handle.status().await
    }

    /// Units the participant can still redeem
    pub async fn balance_of(&self, participant: Address) -> Result<u8> {
        self.handle.balance_of(participant).await
    }

    /// Whether `configure` has run
    pub async fn is_initialized(&self) -> Result<bool> {
        Ok(self.handle.state().await?.initialized)
    }

    /// Instant the last unit sold, if it has
    pub async fn sold_out_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.handle.state().await?.sold_out_at)
    }

    /// Full state snapshot
    pub async fn state(&self) -> Result<SaleState> {
        self.handle.state().await
    }

    /// Change records with `sequence >= from`, at most `limit`
    pub async fn events_since(&self, from: u64, limit: usize) -> Result<Vec<EventRecord>> {
        self.handle.events_since(from, limit).await
    }

    /// Flush pending writes and stop the actor
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        tracing::info!("Ledger shut down");
        Ok(())
    }
}
