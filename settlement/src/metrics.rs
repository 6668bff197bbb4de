//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring settlement cycles.
//!
//! # Metrics
//!
//! - `settlement_cycles_total` - Cycles finished (atomic or continued)
//! - `settlement_pending_total` - Cycles suspended awaiting the protocol
//! - `settlement_continuations_total` - Successful `settle_continue` calls
//! - `settlement_failures_total` - Failed engine calls
//! - `settlement_emergency_withdrawals_total` - Emergency withdrawals
//! - `settlement_fee_shares_total` - Fee shares minted
//! - `settlement_nav` - NAV after the last cycle
//! - `settlement_duration_seconds` - Histogram of call latencies

use prometheus::{Counter, Gauge, Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Cycles finished
    pub cycles_total: IntCounter,

    /// Cycles suspended
    pub pending_total: IntCounter,

    /// Continuations finished
    pub continuations_total: IntCounter,

    /// Failed calls
    pub failures_total: IntCounter,

    /// Emergency withdrawals
    pub emergency_total: IntCounter,

    /// Fee shares minted
    pub fee_shares_total: Counter,

    /// NAV after the last cycle
    pub nav: Gauge,

    /// Call duration histogram
    pub duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let cycles_total =
            IntCounter::new("settlement_cycles_total", "Settlement cycles finished")?;
        registry.register(Box::new(cycles_total.clone()))?;

        let pending_total = IntCounter::new(
            "settlement_pending_total",
            "Settlement cycles suspended awaiting the external protocol",
        )?;
        registry.register(Box::new(pending_total.clone()))?;

        let continuations_total = IntCounter::new(
            "settlement_continuations_total",
            "Suspended cycles finished by settle_continue",
        )?;
        registry.register(Box::new(continuations_total.clone()))?;

        let failures_total =
            IntCounter::new("settlement_failures_total", "Failed settlement engine calls")?;
        registry.register(Box::new(failures_total.clone()))?;

        let emergency_total = IntCounter::new(
            "settlement_emergency_withdrawals_total",
            "Emergency withdrawals executed",
        )?;
        registry.register(Box::new(emergency_total.clone()))?;

        let fee_shares_total =
            Counter::new("settlement_fee_shares_total", "Performance fee shares minted")?;
        registry.register(Box::new(fee_shares_total.clone()))?;

        let nav = Gauge::new("settlement_nav", "NAV after the last settlement cycle")?;
        registry.register(Box::new(nav.clone()))?;

        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "settlement_duration_seconds",
                "Histogram of settlement call latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0]),
        )?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            cycles_total,
            pending_total,
            continuations_total,
            failures_total,
            emergency_total,
            fee_shares_total,
            nav,
            duration,
            registry,
        })
    }

    /// Record a finished cycle
    pub fn record_cycle(&self, fee_shares: u128, nav_after: u128) {
        self.cycles_total.inc();
        self.fee_shares_total.inc_by(fee_shares as f64);
        self.nav.set(nav_after as f64);
    }

    /// Record a suspended cycle
    pub fn record_pending(&self) {
        self.pending_total.inc();
    }

    /// Record a finished continuation
    pub fn record_continuation(&self) {
        self.continuations_total.inc();
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        self.failures_total.inc();
    }

    /// Record an emergency withdrawal
    pub fn record_emergency(&self) {
        self.emergency_total.inc();
    }

    /// Record call duration
    pub fn record_duration(&self, duration_seconds: f64) {
        self.duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("cycles_total", &self.cycles_total.get())
            .field("pending_total", &self.pending_total.get())
            .field("failures_total", &self.failures_total.get())
            .finish_non_exhaustive()
    }
}
