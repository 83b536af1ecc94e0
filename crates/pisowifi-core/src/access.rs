//! # Access Decision
//!
//! Decides what the meter does with one connected client on one tick.
//!
//! The decision is a pure function of the client's balance, the firewall
//! status last confirmed for it, and the tick length. Executing the action
//! (firewall commands, ledger writes) is the caller's job.

use crate::{AccessStatus, Balance};

/// What the meter should do with a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessAction {
    /// Out of time and not yet blocked: install the DROP rule.
    Block,
    /// Out of time and already blocked: nothing to do.
    Hold,
    /// Has time but is blocked (a top-up whose unblock failed, or a manual
    /// block): remove the DROP rule. No charge this tick.
    Unblock,
    /// Has time and is forwarding: take `seconds` from the balance.
    Charge { seconds: u64 },
    /// Take the last `seconds` of the balance, then block.
    ChargeAndBlock { seconds: u64 },
}

impl AccessAction {
    /// Seconds this action takes from the balance.
    #[must_use]
    pub const fn charged_seconds(self) -> u64 {
        match self {
            Self::Charge { seconds } | Self::ChargeAndBlock { seconds } => seconds,
            Self::Block | Self::Hold | Self::Unblock => 0,
        }
    }

    /// True if the action ends with a DROP rule installed.
    #[must_use]
    pub const fn blocks(self) -> bool {
        matches!(self, Self::Block | Self::ChargeAndBlock { .. })
    }
}

/// Decide the action for a connected client.
///
/// | balance | status      | action                          |
/// |---------|-------------|---------------------------------|
/// | 0       | not Blocked | `Block`                         |
/// | 0       | Blocked     | `Hold`                          |
/// | > 0     | Blocked     | `Unblock`                       |
/// | > 0     | other       | `Charge` / `ChargeAndBlock`     |
#[must_use]
pub fn decide(balance: Balance, status: AccessStatus, charge_seconds: u64) -> AccessAction {
    match (balance.is_exhausted(), status) {
        (true, AccessStatus::Blocked) => AccessAction::Hold,
        (true, _) => AccessAction::Block,
        (false, AccessStatus::Blocked) => AccessAction::Unblock,
        (false, _) => {
            let (remaining, seconds) = balance.debit(charge_seconds);
            if remaining.is_exhausted() {
                AccessAction::ChargeAndBlock { seconds }
            } else {
                AccessAction::Charge { seconds }
            }
        }
    }
}
