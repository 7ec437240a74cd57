//! Core types for the sale ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (U256 for payment amounts, fixed-width counters for units)

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 32-byte hash (allowlist roots, Merkle nodes)
pub type Hash = [u8; 32];

/// Account identifier (20 bytes, rendered as `0x`-prefixed hex)
///
/// Human-readable formats (TOML, JSON) carry the hex string; binary formats
/// carry the raw 20 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The all-zero address
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Check for the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| crate::Error::Config(format!("Invalid address {:?}: {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; 20]>::deserialize(deserializer).map(Self)
        }
    }
}

/// Sale parameters as set by `configure`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleConfig {
    /// Purchase window opens
    pub sale_start: DateTime<Utc>,
    /// Price per unit in the payment asset's smallest denomination
    pub cost_per_unit: U256,
    /// Units allocated to the sale
    pub total_for_sale: u32,
    /// Per-participant purchase cap
    pub max_per_participant: u8,
    /// Payment recipient
    pub treasury: Address,
    /// Minting collaborator
    pub issuance_endpoint: Address,
}

/// Sale progress projection
///
/// The three `available_*`/`redeemable` fields are derived with saturating
/// subtraction, so they stay meaningful even after an admin lowers
/// `total_for_sale` below what was already sold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleStatus {
    /// Purchase window opens
    pub sale_start: DateTime<Utc>,
    /// Purchase window closes, redemption opens
    pub redemption_start: DateTime<Utc>,
    /// Units purchased so far
    pub total_purchased: u32,
    /// Units redeemed so far
    pub total_redeemed: u32,
    /// `total_for_sale - total_purchased`
    pub available_before_redemption: u32,
    /// `total_purchased - total_redeemed`
    pub redeemable: u32,
    /// `total_for_sale - total_redeemed`
    pub available_after_redemption: u32,
}

/// Change record emitted by a ledger mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleEvent {
    /// `configure` ran (fresh or overwrite)
    Configured {
        /// Parameters written
        config: SaleConfig,
        /// Derived redemption start
        redemption_start: DateTime<Utc>,
    },
    /// Allowlist root replaced
    AllowlistRootChanged {
        /// Previous root
        old: Hash,
        /// New root
        new: Hash,
    },
    /// Sale start moved
    SaleStartChanged {
        /// Previous value
        old: DateTime<Utc>,
        /// New value
        new: DateTime<Utc>,
    },
    /// Allocation changed
    TotalForSaleChanged {
        /// Previous value
        old: u32,
        /// New value
        new: u32,
    },
    /// Treasury changed
    TreasuryChanged {
        /// Previous value
        old: Address,
        /// New value
        new: Address,
    },
    /// Unit price changed
    CostPerUnitChanged {
        /// Previous value
        old: U256,
        /// New value
        new: U256,
    },
    /// Redemption start moved
    RedemptionStartChanged {
        /// Previous value
        old: DateTime<Utc>,
        /// New value
        new: DateTime<Utc>,
    },
    /// Per-participant cap changed
    MaxPerParticipantChanged {
        /// Previous value
        old: u8,
        /// New value
        new: u8,
    },
    /// Issuance endpoint changed
    IssuanceEndpointChanged {
        /// Previous value
        old: Address,
        /// New value
        new: Address,
    },
    /// Operator grant changed
    OperatorPermissionChanged {
        /// Operator address
        operator: Address,
        /// Previous grant
        old: bool,
        /// New grant
        new: bool,
    },
    /// Units purchased
    Purchased {
        /// Buyer
        participant: Address,
        /// Units bought in this call
        quantity: u8,
        /// Units the buyer may still purchase
        personal_remaining: u8,
        /// Units left in the allocation
        global_remaining: u32,
    },
    /// Units redeemed and minted
    Redeemed {
        /// Redeemer
        participant: Address,
        /// Units consumed
        units: u8,
        /// Amount passed to the issuance endpoint
        minted: U256,
    },
}

impl SaleEvent {
    /// Event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            SaleEvent::Configured { .. } => "configured",
            SaleEvent::AllowlistRootChanged { .. } => "allowlist_root_changed",
            SaleEvent::SaleStartChanged { .. } => "sale_start_changed",
            SaleEvent::TotalForSaleChanged { .. } => "total_for_sale_changed",
            SaleEvent::TreasuryChanged { .. } => "treasury_changed",
            SaleEvent::CostPerUnitChanged { .. } => "cost_per_unit_changed",
            SaleEvent::RedemptionStartChanged { .. } => "redemption_start_changed",
            SaleEvent::MaxPerParticipantChanged { .. } => "max_per_participant_changed",
            SaleEvent::IssuanceEndpointChanged { .. } => "issuance_endpoint_changed",
            SaleEvent::OperatorPermissionChanged { .. } => "operator_permission_changed",
            SaleEvent::Purchased { .. } => "purchased",
            SaleEvent::Redeemed { .. } => "redeemed",
        }
    }
}

/// Sequenced change record as stored in the event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event ID (UUIDv7 for time-ordering)
    pub event_id: Uuid,

    /// Position in the ledger's event log, starting at 0
    pub sequence: u64,

    /// Ledger time at which the event was emitted
    pub recorded_at: DateTime<Utc>,

    /// The change itself
    pub event: SaleEvent,
}

/// Outcome of a successful purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    /// Buyer
    pub participant: Address,
    /// Units bought
    pub quantity: u8,
    /// Amount forwarded to the treasury
    pub paid: U256,
    /// Units the buyer may still purchase
    pub personal_remaining: u8,
    /// Units left in the allocation
    pub global_remaining: u32,
    /// Set when this purchase sold out the allocation
    pub sold_out_at: Option<DateTime<Utc>>,
}

/// Outcome of a successful redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionReceipt {
    /// Redeemer
    pub participant: Address,
    /// Units consumed
    pub units: u8,
    /// Amount minted by the issuance endpoint
    pub minted: U256,
}
