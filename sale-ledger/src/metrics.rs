//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the sale.
//!
//! # Metrics
//!
//! - `sale_purchases_total` - Successful purchases
//! - `sale_units_purchased_total` - Units sold
//! - `sale_redemptions_total` - Successful redemptions
//! - `sale_units_redeemed_total` - Units redeemed
//! - `sale_rejections_total{reason}` - Failed operations by error reason
//! - `sale_units_available` - Units left in the allocation

use crate::types::SaleStatus;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Successful purchases
    pub purchases_total: IntCounter,

    /// Units sold
    pub units_purchased: IntCounter,

    /// Successful redemptions
    pub redemptions_total: IntCounter,

    /// Units redeemed
    pub units_redeemed: IntCounter,

    /// Rejected operations by reason
    pub rejections: IntCounterVec,

    /// Units left in the allocation
    pub units_available: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("purchases_total", &self.purchases_total.get())
            .field("redemptions_total", &self.redemptions_total.get())
            .field("units_available", &self.units_available.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let purchases_total = IntCounter::new("sale_purchases_total", "Successful purchases")?;
        registry.register(Box::new(purchases_total.clone()))?;

        let units_purchased = IntCounter::new("sale_units_purchased_total", "Units sold")?;
        registry.register(Box::new(units_purchased.clone()))?;

        let redemptions_total =
            IntCounter::new("sale_redemptions_total", "Successful redemptions")?;
        registry.register(Box::new(redemptions_total.clone()))?;

        let units_redeemed = IntCounter::new("sale_units_redeemed_total", "Units redeemed")?;
        registry.register(Box::new(units_redeemed.clone()))?;

        let rejections = IntCounterVec::new(
            Opts::new("sale_rejections_total", "Rejected operations by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections.clone()))?;

        let units_available =
            IntGauge::new("sale_units_available", "Units left in the allocation")?;
        registry.register(Box::new(units_available.clone()))?;

        Ok(Self {
            purchases_total,
            units_purchased,
            redemptions_total,
            units_redeemed,
            rejections,
            units_available,
            registry,
        })
    }

    /// Record a purchase
    pub fn record_purchase(&self, quantity: u8) {
        self.purchases_total.inc();
        self.units_purchased.inc_by(quantity as u64);
    }

    /// Record a redemption
    pub fn record_redemption(&self, units: u8) {
        self.redemptions_total.inc();
        self.units_redeemed.inc_by(units as u64);
    }

    /// Record a rejected operation
    pub fn record_rejection(&self, reason: &str) {
        self.rejections.with_label_values(&[reason]).inc();
    }

    /// Refresh gauges from a status projection
    pub fn observe_status(&self, status: &SaleStatus) {
        self.units_available
            .set(status.available_before_redemption as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
