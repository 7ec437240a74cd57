//! Actor-based concurrency for the ledger
//!
//! One Tokio task owns the [`SaleLedger`] and applies messages from a bounded
//! mailbox one at a time. That gives every purchase, redemption and admin
//! write a single global order without any locking inside the ledger.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │  SaleLedger: check → external effect → mutate        │
//! │                       │                               │
//! │                       ▼                               │
//! │       Storage::commit(snapshot, new events)          │
//! │          (atomic write to RocksDB)                    │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    collaborators::Clock,
    engine::SaleLedger,
    metrics::Metrics,
    state::SaleState,
    storage::{LedgerStore, Snapshot},
    types::{
        Address, EventRecord, Hash, PurchaseReceipt, RedemptionReceipt, SaleConfig, SaleStatus,
    },
    Error, Result,
};
use chrono::{DateTime, Utc};
use primitive_types::U256;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A single configuration write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminChange {
    /// `set_cost_per_unit`
    CostPerUnit(U256),
    /// `set_sale_start`
    SaleStart(DateTime<Utc>),
    /// `set_redemption_start`
    RedemptionStart(DateTime<Utc>),
    /// `set_treasury`
    Treasury(Address),
    /// `set_max_per_participant`
    MaxPerParticipant(u8),
    /// `set_total_for_sale`
    TotalForSale(u32),
    /// `set_allowlist_root`
    AllowlistRoot(Hash),
    /// `set_issuance_endpoint`
    IssuanceEndpoint(Address),
    /// `set_operator_permission`
    OperatorPermission {
        /// Operator address
        operator: Address,
        /// Grant or revoke
        granted: bool,
    },
}

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Configure the sale
    Configure {
        caller: Address,
        config: SaleConfig,
        response: oneshot::Sender<Result<()>>,
    },

    /// Purchase units
    Purchase {
        participant: Address,
        quantity: u8,
        proof: Vec<Hash>,
        payment: U256,
        response: oneshot::Sender<Result<PurchaseReceipt>>,
    },

    /// Redeem the caller's purchase record
    Redeem {
        participant: Address,
        response: oneshot::Sender<Result<RedemptionReceipt>>,
    },

    /// Apply a configuration write
    Admin {
        caller: Address,
        change: AdminChange,
        response: oneshot::Sender<Result<()>>,
    },

    /// Get sale parameters
    GetConfig {
        response: oneshot::Sender<Result<SaleConfig>>,
    },

    /// Get sale progress
    GetStatus {
        response: oneshot::Sender<Result<SaleStatus>>,
    },

    /// Get a participant's balance
    BalanceOf {
        participant: Address,
        response: oneshot::Sender<u8>,
    },

    /// Get a full state snapshot
    GetState {
        response: oneshot::Sender<SaleState>,
    },

    /// Page through the event log
    EventsSince {
        from: u64,
        limit: usize,
        response: oneshot::Sender<Result<Vec<EventRecord>>>,
    },

    /// Shutdown actor
    Shutdown {
        response: oneshot::Sender<Result<()>>,
    },
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// The state machine
    ledger: SaleLedger,

    /// Storage backend (absent for purely in-memory ledgers)
    storage: Option<Arc<dyn LedgerStore>>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Ledger time
    clock: Arc<dyn Clock>,

    /// Metrics sink
    metrics: Metrics,

    /// Events not yet durable; retried on the next commit
    unflushed: Vec<EventRecord>,

    /// Event log for in-memory ledgers
    memory_log: Vec<EventRecord>,
}

impl std::fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor")
            .field("ledger", &self.ledger)
            .field("persistent", &self.storage.is_some())
            .field("unflushed", &self.unflushed.len())
            .finish_non_exhaustive()
    }
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        ledger: SaleLedger,
        storage: Option<Arc<dyn LedgerStore>>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            ledger,
            storage,
            mailbox,
            clock,
            metrics,
            unflushed: Vec::new(),
            memory_log: Vec::new(),
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown { response } => {
                    let result = self.flush();
                    if let Err(e) = &result {
                        self.abandon_unflushed(e);
                    }
                    // Release the database before acknowledging
                    self.storage = None;
                    let _ = response.send(result);
                    break;
                }
                other => self.handle_message(other),
            }
        }

        // Mailbox closed without an explicit shutdown
        if self.storage.is_some() && !self.unflushed.is_empty() {
            if let Err(e) = self.flush() {
                self.abandon_unflushed(&e);
            }
        }

        tracing::info!("Ledger actor stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        let now = self.clock.now();

        match msg {
            LedgerMessage::Configure {
                caller,
                config,
                response,
            } => {
                let result = self.ledger.configure(
                    &caller,
                    config.total_for_sale,
                    config.max_per_participant,
                    config.cost_per_unit,
                    config.sale_start,
                    config.treasury,
                    config.issuance_endpoint,
                    now,
                );
                let result = self.settle("configure", result);
                let _ = response.send(result);
            }

            LedgerMessage::Purchase {
                participant,
                quantity,
                proof,
                payment,
                response,
            } => {
                let result = self
                    .ledger
                    .purchase(&participant, quantity, &proof, payment, now);
                if let Ok(receipt) = &result {
                    self.metrics.record_purchase(receipt.quantity);
                }
                let result = self.settle("purchase", result);
                let _ = response.send(result);
            }

            LedgerMessage::Redeem {
                participant,
                response,
            } => {
                let result = self.ledger.redeem(&participant, now);
                if let Ok(receipt) = &result {
                    self.metrics.record_redemption(receipt.units);
                }
                let result = self.settle("redeem", result);
                let _ = response.send(result);
            }

            LedgerMessage::Admin {
                caller,
                change,
                response,
            } => {
                let result = self.apply_admin(&caller, change, now);
                let result = self.settle("admin", result);
                if result.is_ok() {
                    if let Err(violation) = self.ledger.state().check_invariants() {
                        tracing::warn!(error = %violation, "Admin write left ledger outside invariants");
                    }
                }
                let _ = response.send(result);
            }

            LedgerMessage::GetConfig { response } => {
                let _ = response.send(self.ledger.config());
            }

            LedgerMessage::GetStatus { response } => {
                let _ = response.send(self.ledger.status());
            }

            LedgerMessage::BalanceOf {
                participant,
                response,
            } => {
                let _ = response.send(self.ledger.balance_of(&participant));
            }

            LedgerMessage::GetState { response } => {
                let _ = response.send(self.ledger.state().clone());
            }

            LedgerMessage::EventsSince {
                from,
                limit,
                response,
            } => {
                let _ = response.send(self.events_since(from, limit));
            }

            LedgerMessage::Shutdown { .. } => {
                // Handled in main loop
            }
        }
    }

    fn apply_admin(&mut self, caller: &Address, change: AdminChange, now: DateTime<Utc>) -> Result<()> {
        match change {
            AdminChange::CostPerUnit(value) => self.ledger.set_cost_per_unit(caller, value, now),
            AdminChange::SaleStart(value) => self.ledger.set_sale_start(caller, value, now),
            AdminChange::RedemptionStart(value) => {
                self.ledger.set_redemption_start(caller, value, now)
            }
            AdminChange::Treasury(value) => self.ledger.set_treasury(caller, value, now),
            AdminChange::MaxPerParticipant(value) => {
                self.ledger.set_max_per_participant(caller, value, now)
            }
            AdminChange::TotalForSale(value) => self.ledger.set_total_for_sale(caller, value, now),
            AdminChange::AllowlistRoot(value) => self.ledger.set_allowlist_root(caller, value, now),
            AdminChange::IssuanceEndpoint(value) => {
                self.ledger.set_issuance_endpoint(caller, value, now)
            }
            AdminChange::OperatorPermission { operator, granted } => {
                self.ledger
                    .set_operator_permission(caller, operator, granted, now)
            }
        }
    }

    /// Persist a successful operation, count a failed one
    ///
    /// A commit failure does not undo the operation: its external effect has
    /// already happened. The events stay queued and the next commit retries
    /// them together with a fresh snapshot.
    fn settle<T>(&mut self, operation: &'static str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                let events = self.ledger.take_events();
                if self.storage.is_some() {
                    self.unflushed.extend(events);
                    if let Err(e) = self.flush() {
                        tracing::error!(
                            operation,
                            error = %e,
                            pending = self.unflushed.len(),
                            "Commit failed; will retry on next operation"
                        );
                    }
                } else {
                    self.memory_log.extend(events);
                }
                if let Ok(status) = self.ledger.status() {
                    self.metrics.observe_status(&status);
                }
            }
            Err(e) => {
                self.metrics.record_rejection(e.reason());
                tracing::debug!(operation, reason = e.reason(), error = %e, "Operation rejected");
            }
        }
        result
    }

    /// Write snapshot and pending events
    fn flush(&mut self) -> Result<()> {
        let storage = match &self.storage {
            Some(storage) => storage,
            None => return Ok(()),
        };

        let snapshot = Snapshot {
            state: self.ledger.state().clone(),
            next_sequence: self.ledger.next_sequence(),
        };
        storage.commit(&snapshot, &self.unflushed)?;
        self.unflushed.clear();
        Ok(())
    }

    fn abandon_unflushed(&mut self, error: &Error) {
        tracing::error!(
            error = %error,
            abandoned = self.unflushed.len(),
            next_sequence = self.ledger.next_sequence(),
            "Final flush failed; unflushed events abandoned"
        );
        self.unflushed.clear();
    }

    fn events_since(&self, from: u64, limit: usize) -> Result<Vec<EventRecord>> {
        let mut events = match &self.storage {
            Some(storage) => storage.events_since(from, limit)?,
            None => Vec::new(),
        };

        // Not-yet-durable (or in-memory) events follow the stored ones
        let tail = if self.storage.is_some() {
            &self.unflushed
        } else {
            &self.memory_log
        };
        for record in tail {
            if events.len() >= limit {
                break;
            }
            if record.sequence >= from && events.iter().all(|e| e.sequence != record.sequence) {
                events.push(record.clone());
            }
        }

        Ok(events)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Configure the sale
    pub async fn configure(&self, caller: Address, config: SaleConfig) -> Result<()> {
        self.request(|response| LedgerMessage::Configure {
            caller,
            config,
            response,
        })
        .await?
    }

    /// Purchase units
    pub async fn purchase(
        &self,
        participant: Address,
        quantity: u8,
        proof: Vec<Hash>,
        payment: U256,
    ) -> Result<PurchaseReceipt> {
        self.request(|response| LedgerMessage::Purchase {
            participant,
            quantity,
            proof,
            payment,
            response,
        })
        .await?
    }

    /// Redeem a participant's purchase record
    pub async fn redeem(&self, participant: Address) -> Result<RedemptionReceipt> {
        self.request(|response| LedgerMessage::Redeem {
            participant,
            response,
        })
        .await?
    }

    /// Apply a configuration write
    pub async fn admin(&self, caller: Address, change: AdminChange) -> Result<()> {
        self.request(|response| LedgerMessage::Admin {
            caller,
            change,
            response,
        })
        .await?
    }

    /// Get sale parameters
    pub async fn config(&self) -> Result<SaleConfig> {
        self.request(|response| LedgerMessage::GetConfig { response })
            .await?
    }

    /// Get sale progress
    pub async fn status(&self) -> Result<SaleStatus> {
        self.request(|response| LedgerMessage::GetStatus { response })
            .await?
    }

    /// Get a participant's redeemable balance
    pub async fn balance_of(&self, participant: Address) -> Result<u8> {
        self.request(|response| LedgerMessage::BalanceOf {
            participant,
            response,
        })
        .await
    }

    /// Get a full state snapshot
    pub async fn state(&self) -> Result<SaleState> {
        self.request(|response| LedgerMessage::GetState { response })
            .await
    }

    /// Page through the event log
    pub async fn events_since(&self, from: u64, limit: usize) -> Result<Vec<EventRecord>> {
        self.request(|response| LedgerMessage::EventsSince {
            from,
            limit,
            response,
        })
        .await?
    }

    /// Flush and stop the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response| LedgerMessage::Shutdown { response })
            .await?
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    ledger: SaleLedger,
    storage: Option<Arc<dyn LedgerStore>>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(ledger, storage, rx, clock, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}
