//! # Property-Based Tests
//!
//! Ledger invariants checked with proptest against the in-memory backend.

use pisowifi_core::{
    AccessAction, AccessStatus, Balance, Ledger, MacAddress, Timestamp, decide,
};
use proptest::collection::vec;
use proptest::prelude::*;

/// One step of random ledger activity.
#[derive(Debug, Clone)]
enum Op {
    TopUp { client: u8, minutes: u64 },
    Deduct { client: u8, seconds: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, 1u64..120).prop_map(|(client, minutes)| Op::TopUp { client, minutes }),
        (0u8..4, 0u64..600).prop_map(|(client, seconds)| Op::Deduct { client, seconds }),
    ]
}

fn mac_for(client: u8) -> MacAddress {
    MacAddress::new([0x02, 0, 0, 0, 0, client])
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Balance always equals credited seconds minus deducted seconds.
    #[test]
    fn balance_equals_credits_minus_deductions(ops in vec(op_strategy(), 1..80)) {
        let mut ledger = Ledger::new();

        for (step, op) in ops.iter().enumerate() {
            let at = Timestamp(step as u64);
            match *op {
                Op::TopUp { client, minutes } => {
                    ledger.add_time(mac_for(client), minutes, minutes, at).expect("top-up");
                }
                Op::Deduct { client, seconds } => {
                    ledger.deduct_time(mac_for(client), seconds, at).expect("deduct");
                }
            }
        }

        for client in 0u8..4 {
            let mac = mac_for(client);
            let credited: u64 = ledger
                .transactions(mac)
                .expect("log")
                .iter()
                .map(|t| t.minutes * 60)
                .sum();
            let deducted: u64 = ledger
                .deductions(mac)
                .expect("log")
                .iter()
                .map(|d| d.seconds)
                .sum();
            prop_assert!(deducted <= credited);
            prop_assert_eq!(
                ledger.check_balance(mac).expect("balance"),
                Balance(credited - deducted)
            );
        }
    }

    /// A single deduction never takes more than the balance held.
    #[test]
    fn deduction_never_exceeds_balance(minutes in 1u64..10, seconds in 0u64..2000) {
        let mut ledger = Ledger::new();
        let mac = mac_for(1);
        ledger.add_time(mac, minutes, minutes, Timestamp(0)).expect("top-up");

        let remaining = ledger
            .deduct_time(mac, seconds, Timestamp(1))
            .expect("deduct")
            .expect("known client");
        let taken: u64 = ledger.deductions(mac).expect("log").iter().map(|d| d.seconds).sum();

        prop_assert_eq!(taken, seconds.min(minutes * 60));
        prop_assert_eq!(remaining.seconds() + taken, minutes * 60);
    }

    /// The decision never charges more than the balance, and a charge that
    /// empties the balance always blocks.
    #[test]
    fn decision_charges_within_balance(balance in 0u64..1000, interval in 1u64..120) {
        let action = decide(Balance(balance), AccessStatus::Active, interval);
        prop_assert!(action.charged_seconds() <= balance);
        if balance > 0 && action.charged_seconds() == balance {
            prop_assert!(matches!(action, AccessAction::ChargeAndBlock { .. }), "expected ChargeAndBlock, got {:?}", action);
        }
        if balance == 0 {
            prop_assert_eq!(action, AccessAction::Block);
        }
    }

    /// Case and separator do not change which client a MAC names.
    #[test]
    fn mac_parsing_normalizes(octets in any::<[u8; 6]>()) {
        let mac = MacAddress::new(octets);
        let lower_dash = mac.to_string().to_lowercase().replace(':', "-");
        prop_assert_eq!(lower_dash.parse::<MacAddress>().expect("parse"), mac);
    }
}
