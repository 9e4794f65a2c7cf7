//! Reconciliation loop primitives.
//!
//! This library provides the pure decision logic behind the scheduler's
//! health loop. Key concepts:
//!
//! - **Flow control**: the revive/suppress pair tells the cluster manager
//!   whether the scheduler currently wants offers.
//! - **Dependency order**: tiers converge one at a time, each only after
//!   every tier before it is healthy.
//! - **Staleness**: work that has not changed state for too long is a
//!   corrective trigger, not an error.
//!
//! # Invariants
//!
//! - A latch never asks for the same call twice in a row
//! - Decisions are deterministic given the same inputs
//! - No I/O happens here

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Tri-state flag tracking whether a flow-control call is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Latch {
    /// Nothing known yet (startup, or the last call failed).
    #[default]
    Unknown,

    /// The call has been issued and is in effect.
    Engaged,

    /// The opposing call has been issued since.
    Released,
}

impl Latch {
    /// Returns true if the call is known to be in effect.
    pub fn is_engaged(&self) -> bool {
        matches!(self, Self::Engaged)
    }
}

/// Revive/suppress latches.
///
/// `request_*` returns true when the caller must issue the call. Issuing
/// one side releases the other, so an unhealthy → healthy → unhealthy
/// sequence yields exactly one SUPPRESS and one REVIVE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowControl {
    revive: Latch,
    suppress: Latch,
}

impl FlowControl {
    /// Create latches in the unknown state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engage revive. Returns false if revive is already in effect.
    pub fn request_revive(&mut self) -> bool {
        if self.revive.is_engaged() {
            return false;
        }
        self.revive = Latch::Engaged;
        self.suppress = Latch::Released;
        true
    }

    /// Engage suppress. Returns false if suppress is already in effect.
    pub fn request_suppress(&mut self) -> bool {
        if self.suppress.is_engaged() {
            return false;
        }
        self.suppress = Latch::Engaged;
        self.revive = Latch::Released;
        true
    }

    /// The REVIVE call failed; allow it to be issued again.
    pub fn revive_failed(&mut self) {
        self.revive = Latch::Unknown;
    }

    /// The SUPPRESS call failed; allow it to be issued again.
    pub fn suppress_failed(&mut self) {
        self.suppress = Latch::Unknown;
    }

    pub fn revive(&self) -> Latch {
        self.revive
    }

    pub fn suppress(&self) -> Latch {
        self.suppress
    }
}

/// Convergence status across all tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Every tier is healthy.
    Converged,

    /// At least one tier is unhealthy.
    Converging,
}

impl ConvergenceStatus {
    /// Returns true if every tier is healthy.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Outcome of one convergence pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePlan<K> {
    pub status: ConvergenceStatus,

    /// Tier to start an instance of, if any.
    pub start: Option<K>,
}

/// Decide which tier to start next.
///
/// `order` lists tiers from first to last dependency. Only the first
/// unhealthy tier is started, which guarantees no tier is started while a
/// tier it depends on is unhealthy.
pub fn plan_convergence<K, F>(order: &[K], healthy: F) -> ConvergencePlan<K>
where
    K: Copy,
    F: Fn(K) -> bool,
{
    match order.iter().copied().find(|kind| !healthy(*kind)) {
        Some(kind) => ConvergencePlan {
            status: ConvergenceStatus::Converging,
            start: Some(kind),
        },
        None => ConvergencePlan {
            status: ConvergenceStatus::Converged,
            start: None,
        },
    }
}

/// Returns true if `since` lies more than `timeout` before `now`.
///
/// A missing timestamp counts as stale.
pub fn is_stale(since: Option<DateTime<Utc>>, timeout: Duration, now: DateTime<Utc>) -> bool {
    let Some(since) = since else {
        return true;
    };
    let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
    now.signed_duration_since(since) > timeout
}

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Default explicit/implicit reconciliation interval.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default time a task may stay unready before it is killed or purged.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
