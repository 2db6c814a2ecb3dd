//! Proactive reseeding.
//!
//! A channel's counter must never reach its interval: the cipher refuses
//! every operation from that point on. The coordinator watches usage after
//! each operation and asks for a fresh handshake once a channel has consumed
//! the threshold fraction of its budget.

use crate::channel::ChannelUsage;
use crate::config::DEFAULT_RESEED_THRESHOLD;
use crate::error::{MteError, Result};

/// Threshold policy over channel usage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReseedCoordinator {
    threshold: f64,
}

impl Default for ReseedCoordinator {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_RESEED_THRESHOLD,
        }
    }
}

impl ReseedCoordinator {
    /// Create a coordinator reseeding at `threshold * interval`
    ///
    /// # Errors
    ///
    /// Returns [`MteError::InvalidConfig`] unless `0 < threshold < 1`.
    pub fn new(threshold: f64) -> Result<Self> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(MteError::InvalidConfig(
                format!("reseed threshold must be in (0, 1), got {threshold}").into(),
            ));
        }
        Ok(Self { threshold })
    }

    /// Configured threshold
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Counter value at which a channel with `interval` must be reseeded
    ///
    /// Never above `interval - 1`, so the final block of the budget is
    /// never needed.
    #[must_use]
    pub fn limit(&self, interval: u64) -> u64 {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = (interval as f64 * self.threshold).floor() as u64;
        scaled.min(interval.saturating_sub(1))
    }

    /// True once a channel has used up its threshold
    #[must_use]
    pub fn needs_reseed(&self, usage: &ChannelUsage) -> bool {
        usage.counter >= self.limit(usage.interval)
    }

    /// True if any channel has used up its threshold
    #[must_use]
    pub fn any_needs_reseed(&self, usages: &[ChannelUsage]) -> bool {
        usages.iter().any(|usage| self.needs_reseed(usage))
    }

    /// True if `blocks` more cipher blocks fit in the remaining budget
    #[must_use]
    pub fn admits(&self, usage: &ChannelUsage, blocks: u64) -> bool {
        usage.counter.saturating_add(blocks) <= usage.interval
    }
}
