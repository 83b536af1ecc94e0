//! # Ledger Summary
//!
//! Aggregate figures over the whole ledger, for `/status` and the CLI.

use crate::{AccessStatus, Ledger, PisoError};
use serde::{Deserialize, Serialize};

/// Totals across all clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub client_count: usize,
    pub active_count: usize,
    pub blocked_count: usize,
    pub inactive_count: usize,
    /// Pesos collected.
    pub total_amount: u64,
    /// Minutes sold.
    pub total_minutes: u64,
    /// Seconds consumed by metering.
    pub total_seconds_deducted: u64,
    /// Unused time still held by clients.
    pub outstanding_seconds: u64,
}

impl LedgerSummary {
    /// Compute the summary from the client rows and their lifetime totals.
    pub fn from_ledger(ledger: &Ledger) -> Result<Self, PisoError> {
        let mut summary = Self::default();

        for client in ledger.clients()? {
            summary.client_count += 1;
            match client.status {
                AccessStatus::Active => summary.active_count += 1,
                AccessStatus::Blocked => summary.blocked_count += 1,
                AccessStatus::Inactive => summary.inactive_count += 1,
            }
            summary.outstanding_seconds = summary
                .outstanding_seconds
                .saturating_add(client.balance.seconds());
            summary.total_amount = summary.total_amount.saturating_add(client.total_amount);
            summary.total_minutes = summary.total_minutes.saturating_add(client.total_minutes);
            summary.total_seconds_deducted = summary
                .total_seconds_deducted
                .saturating_add(client.total_seconds_used);
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::MAX_HISTORY_ROWS;
    use crate::{MacAddress, Timestamp};

    #[test]
    fn empty_ledger_summary_is_zero() {
        let summary = LedgerSummary::from_ledger(&Ledger::new()).expect("summary");
        assert_eq!(summary, LedgerSummary::default());
    }

    #[test]
    fn summary_counts_sales_and_usage() {
        let mut ledger = Ledger::new();
        let a: MacAddress = "00:00:00:00:00:01".parse().expect("mac");
        let b: MacAddress = "00:00:00:00:00:02".parse().expect("mac");

        ledger.add_time(a, 5, 5, Timestamp(0)).expect("top-up");
        ledger.add_time(b, 10, 10, Timestamp(0)).expect("top-up");
        ledger.deduct_time(a, 30, Timestamp(30)).expect("deduct");
        ledger
            .set_status(a, AccessStatus::Active, Timestamp(30))
            .expect("status");
        ledger
            .set_status(b, AccessStatus::Blocked, Timestamp(30))
            .expect("status");

        let summary = LedgerSummary::from_ledger(&ledger).expect("summary");
        assert_eq!(summary.client_count, 2);
        assert_eq!(summary.active_count, 1);
        assert_eq!(summary.blocked_count, 1);
        assert_eq!(summary.total_amount, 15);
        assert_eq!(summary.total_minutes, 15);
        assert_eq!(summary.total_seconds_deducted, 30);
        assert_eq!(summary.outstanding_seconds, 15 * 60 - 30);
    }

    #[test]
    fn totals_survive_history_cap() {
        let mut ledger = Ledger::new();
        let m: MacAddress = "00:00:00:00:00:01".parse().expect("mac");
        ledger.add_time(m, 100, 100, Timestamp(0)).expect("top-up");
        for tick in 1..=1200 {
            ledger.deduct_time(m, 1, Timestamp(tick)).expect("deduct");
        }
        assert_eq!(ledger.deductions(m).expect("log").len(), MAX_HISTORY_ROWS);

        let summary = LedgerSummary::from_ledger(&ledger).expect("summary");
        assert_eq!(summary.total_seconds_deducted, 1200);
        assert_eq!(summary.outstanding_seconds, 4800);
        assert_eq!(
            summary.total_minutes * 60,
            summary.outstanding_seconds + summary.total_seconds_deducted
        );
    }
}
