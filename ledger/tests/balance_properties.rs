mod common;

use fxwallet_common::UserId;
use fxwallet_ledger::LedgerStore;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;

use common::harness;

#[derive(Debug, Clone)]
enum Op {
    Fund { user: u8, cents: i64, currency: &'static str },
    Trade { user: u8, cents: i64, from: &'static str, to: &'static str },
    Replay { user: u8 },
}

fn currency() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("NGN"), Just("USD"), Just("EUR")]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3, 1i64..5_000_000, currency())
            .prop_map(|(user, cents, currency)| Op::Fund { user, cents, currency }),
        (0u8..3, 1i64..5_000_000, currency(), currency())
            .prop_map(|(user, cents, from, to)| Op::Trade { user, cents, from, to }),
        (0u8..3).prop_map(|user| Op::Replay { user }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// Property: whatever sequence of operations runs, each stored balance
    /// equals credits minus debits of its entries, and no user balance is
    /// ever negative.
    #[test]
    fn balances_match_entries(ops in prop::collection::vec(op(), 1..30)) {
        let h = harness();

        tokio_test::block_on(async {
            for (i, op) in ops.iter().enumerate() {
                // Rejections are expected; only the books matter here.
                let _ = match op {
                    Op::Fund { user, cents, currency } => h
                        .engine
                        .fund_wallet(
                            &UserId::new(format!("user-{}", user)),
                            Decimal::new(*cents, 2),
                            currency,
                            &format!("ref-{}", i),
                        )
                        .await
                        .map(|_| ()),
                    Op::Trade { user, cents, from, to } => h
                        .engine
                        .trade_currency(
                            &UserId::new(format!("user-{}", user)),
                            from,
                            to,
                            Decimal::new(*cents, 2),
                        )
                        .await
                        .map(|_| ()),
                    Op::Replay { user } => h
                        .engine
                        .fund_wallet(
                            &UserId::new(format!("user-{}", user)),
                            Decimal::new(100, 0),
                            "NGN",
                            "ref-0",
                        )
                        .await
                        .map(|_| ()),
                };
            }
        });

        let report = tokio_test::block_on(h.engine.verify_integrity()).unwrap();
        prop_assert!(report.is_ok(), "{:?}", report.mismatches);

        let snapshot = tokio_test::block_on(h.store.audit_snapshot()).unwrap();
        let balances = &snapshot.balances;
        let external = h.engine.config().external_wallet_id;
        for balance in balances {
            if balance.wallet_id != external {
                prop_assert!(balance.balance >= Decimal::ZERO);
            }
        }

        // Per currency, stored balances across all wallets net out to the entries.
        let mut funded: HashMap<String, Decimal> = HashMap::new();
        for t in &snapshot.entry_totals {
            *funded.entry(t.currency.clone()).or_default() += t.credits - t.debits;
        }
        for (currency, net) in funded {
            let stored: Decimal = balances
                .iter()
                .filter(|b| b.currency == currency)
                .map(|b| b.balance)
                .sum();
            prop_assert_eq!(stored, net);
        }
    }
}
