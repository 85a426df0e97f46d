//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario. Users are referred to by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Fund every user with the same starting balances.
    SeedBalances { amounts: Vec<(String, String)> },
    /// Fund one wallet many times at once under a single reference.
    FundingStorm {
        user: usize,
        amount: String,
        currency: String,
        reference: String,
        copies: usize,
    },
    /// Trade back and forth between two currencies concurrently.
    OpposingTrades {
        user: usize,
        base: String,
        quote: String,
        base_amount: String,
        quote_amount: String,
        rounds: usize,
    },
    /// Random funding, trades and replayed references.
    RandomLoad { operations: usize },
    /// Take the rate provider down, or bring it back.
    ProviderOutage { down: bool },
    /// Check one balance.
    AssertBalance {
        user: usize,
        currency: String,
        amount: String,
    },
}

impl Scenario {
    /// Build a scenario by name for the given population and volume.
    pub fn load(name: &str, users: usize, operations: usize) -> anyhow::Result<Self> {
        let users = users.max(1);
        match name {
            "idempotency-storm" => Ok(Self::idempotency_storm(users, operations)),
            "opposite-trades" => Ok(Self::opposite_trades(users, operations)),
            "random-load" => Ok(Self::random_load(operations)),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Every user's wallet is funded concurrently under one reference.
    fn idempotency_storm(users: usize, operations: usize) -> Self {
        let copies = (operations / users).max(2);
        let mut steps = Vec::with_capacity(users * 2);

        for user in 0..users {
            steps.push(ScenarioStep::FundingStorm {
                user,
                amount: "5000".to_string(),
                currency: "NGN".to_string(),
                reference: format!("storm-{}", user),
                copies,
            });
        }
        for user in 0..users {
            steps.push(ScenarioStep::AssertBalance {
                user,
                currency: "NGN".to_string(),
                amount: "5000".to_string(),
            });
        }

        Self {
            name: "idempotency-storm".to_string(),
            description: "Concurrent funding replays must apply once".to_string(),
            steps,
        }
    }

    /// Trades in both directions over the same pair of balance rows.
    fn opposite_trades(users: usize, operations: usize) -> Self {
        let rounds = (operations / users).max(2);
        let mut steps = vec![ScenarioStep::SeedBalances {
            amounts: vec![
                ("NGN".to_string(), "1000000".to_string()),
                ("USD".to_string(), "10000".to_string()),
            ],
        }];

        for user in 0..users {
            steps.push(ScenarioStep::OpposingTrades {
                user,
                base: "NGN".to_string(),
                quote: "USD".to_string(),
                base_amount: "15000".to_string(),
                quote_amount: "10".to_string(),
                rounds,
            });
        }

        Self {
            name: "opposite-trades".to_string(),
            description: "Opposing trades must neither deadlock nor lose value".to_string(),
            steps,
        }
    }

    /// Mixed load with a provider outage in the middle.
    fn random_load(operations: usize) -> Self {
        let first_half = operations / 2;

        Self {
            name: "random-load".to_string(),
            description: "Random funding, trades and replays across all users".to_string(),
            steps: vec![
                ScenarioStep::SeedBalances {
                    amounts: vec![
                        ("NGN".to_string(), "500000".to_string()),
                        ("USD".to_string(), "1000".to_string()),
                        ("EUR".to_string(), "1000".to_string()),
                        ("GBP".to_string(), "1000".to_string()),
                    ],
                },
                ScenarioStep::RandomLoad {
                    operations: first_half,
                },
                // cached rates keep trading alive through the outage
                ScenarioStep::ProviderOutage { down: true },
                ScenarioStep::RandomLoad {
                    operations: operations - first_half,
                },
                ScenarioStep::ProviderOutage { down: false },
            ],
        }
    }
}
