//! # Fee Configuration & Constants
//!
//! Fee rates are expressed in basis points: 1 bp = 0.01%, 10_000 bp = 100%.
//! A rate outside `0..=10_000` can never be stored anywhere in the system;
//! every write path funnels through [`check_fee_bps`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Address;

/// Basis-point denominator (100%).
pub const BPS_DENOMINATOR: u16 = 10_000;

/// Highest fee rate the platform may charge.
pub const MAX_FEE_BPS: u16 = BPS_DENOMINATOR;

/// Platform fee applied when none is configured explicitly (5%).
pub const DEFAULT_FEE_BPS: u16 = 500;

/// Errors raised by configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The fee rate is above [`MAX_FEE_BPS`].
    #[error("fee rate {0} bps exceeds maximum of {MAX_FEE_BPS} bps")]
    FeeBpsOutOfRange(u16),

    /// The platform fee receiver is the null address.
    #[error("platform fee receiver must not be the null address")]
    NullFeeReceiver,
}

/// Validates a fee rate, returning it unchanged when in range.
pub fn check_fee_bps(fee_bps: u16) -> Result<u16, ConfigError> {
    if fee_bps > MAX_FEE_BPS {
        return Err(ConfigError::FeeBpsOutOfRange(fee_bps));
    }
    Ok(fee_bps)
}

/// Platform split settings held by the coordinator.
///
/// Every vault copies these values at initialization; later changes only
/// affect vaults created afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Account that receives the platform's share of every claim.
    pub fee_receiver: Address,
    /// Platform share in basis points.
    pub fee_bps: u16,
}

impl CoordinatorConfig {
    /// Config with the default fee rate.
    pub fn new(fee_receiver: Address) -> Self {
        Self {
            fee_receiver,
            fee_bps: DEFAULT_FEE_BPS,
        }
    }

    /// Overrides the fee rate.
    pub fn with_fee_bps(mut self, fee_bps: u16) -> Self {
        self.fee_bps = fee_bps;
        self
    }

    /// Checks every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fee_receiver.is_zero() {
            return Err(ConfigError::NullFeeReceiver);
        }
        check_fee_bps(self.fee_bps)?;
        Ok(())
    }
}
