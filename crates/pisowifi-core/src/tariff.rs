//! # Tariff
//!
//! Converts inserted coins into minutes of access.

use crate::PisoError;
use crate::primitives::{DEFAULT_MINUTES_PER_PESO, MAX_TOPUP_AMOUNT};
use serde::{Deserialize, Serialize};

/// Price list for the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tariff {
    /// Minutes granted per peso.
    pub minutes_per_peso: u64,
    /// Largest accepted single top-up, in pesos.
    pub max_amount: u64,
}

impl Default for Tariff {
    fn default() -> Self {
        Self {
            minutes_per_peso: DEFAULT_MINUTES_PER_PESO,
            max_amount: MAX_TOPUP_AMOUNT,
        }
    }
}

impl Tariff {
    /// Create a tariff with the default top-up ceiling.
    #[must_use]
    pub fn new(minutes_per_peso: u64) -> Self {
        Self {
            minutes_per_peso,
            ..Self::default()
        }
    }

    /// Minutes bought by `amount` pesos.
    ///
    /// # Errors
    ///
    /// Returns `PisoError::InvalidAmount` if the amount is zero, above
    /// `max_amount`, or the product overflows.
    pub fn quote(&self, amount: u64) -> Result<u64, PisoError> {
        if amount == 0 {
            return Err(PisoError::InvalidAmount(
                "amount must be at least 1".to_string(),
            ));
        }
        if amount > self.max_amount {
            return Err(PisoError::InvalidAmount(format!(
                "amount {} exceeds maximum {}",
                amount, self.max_amount
            )));
        }
        match amount.checked_mul(self.minutes_per_peso) {
            Some(0) | None => Err(PisoError::InvalidAmount(format!(
                "amount {} does not buy a valid duration",
                amount
            ))),
            Some(minutes) => Ok(minutes),
        }
    }
}
