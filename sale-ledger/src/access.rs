//! Configuration capability checks

use crate::types::Address;
use std::collections::BTreeSet;

/// Decides whether a caller may run configuration mutators
///
/// The ledger passes in its current operator grants so that policies can
/// honour `set_operator_permission` without owning that state themselves.
pub trait AccessPolicy: Send + Sync {
    /// True when `caller` holds configuration capability
    fn has_config_capability(&self, caller: &Address, operators: &BTreeSet<Address>) -> bool;
}

/// Single owning principal plus operator grants
#[derive(Debug, Clone)]
pub struct OwnerPolicy {
    owner: Address,
}

impl OwnerPolicy {
    /// Create policy for `owner`
    pub fn new(owner: Address) -> Self {
        Self { owner }
    }

    /// The owning principal
    pub fn owner(&self) -> Address {
        self.owner
    }
}

impl AccessPolicy for OwnerPolicy {
    fn has_config_capability(&self, caller: &Address, operators: &BTreeSet<Address>) -> bool {
        *caller == self.owner || operators.contains(caller)
    }
}
