//! Simulation controller.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use fxwallet_common::{Currency, InMemoryCurrencyRegistry, UserId};
use fxwallet_fx::{MemoryCacheStore, MockRateProvider, RateCacheConfig, RateService};
use fxwallet_ledger::{
    IntegrityReport, LedgerConfig, LedgerEngine, LedgerError, LedgerStore, MemoryLedgerStore,
};

use crate::metrics::SimulationMetrics;
use crate::scenario::{Scenario, ScenarioStep};

/// Currencies the simulation trades.
pub const CURRENCIES: [&str; 4] = ["NGN", "USD", "EUR", "GBP"];

fn units_per_usd(code: &str) -> Decimal {
    match code {
        "NGN" => Decimal::from(1500),
        "EUR" => Decimal::new(92, 2),
        "GBP" => Decimal::new(79, 2),
        _ => Decimal::ONE,
    }
}

/// Largest random amount for a currency, in minor units.
fn max_minor_units(code: &str) -> i64 {
    match code {
        "NGN" => 5_000_000,
        _ => 50_000,
    }
}

/// Simulation settings.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub users: usize,
    pub concurrency: usize,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
enum Operation {
    Fund {
        user: UserId,
        amount: Decimal,
        currency: String,
        reference: String,
        replay: bool,
    },
    Trade {
        user: UserId,
        from: String,
        to: String,
        amount: Decimal,
    },
}

impl Operation {
    fn kind(&self) -> &'static str {
        match self {
            Operation::Fund { replay: false, .. } => "fund",
            Operation::Fund { replay: true, .. } => "replay",
            Operation::Trade { .. } => "trade",
        }
    }

    fn into_replay(self) -> Self {
        match self {
            Operation::Fund {
                user,
                amount,
                currency,
                reference,
                ..
            } => Operation::Fund {
                user,
                amount,
                currency,
                reference,
                replay: true,
            },
            trade => trade,
        }
    }
}

struct Outcome {
    kind: &'static str,
    latency_us: u64,
    result: Result<(), LedgerError>,
}

async fn execute(engine: &LedgerEngine, operation: Operation) -> Outcome {
    let kind = operation.kind();
    let started = Instant::now();

    let result = match operation {
        Operation::Fund {
            user,
            amount,
            currency,
            reference,
            ..
        } => engine
            .fund_wallet(&user, amount, &currency, &reference)
            .await
            .map(|_| ()),
        Operation::Trade {
            user,
            from,
            to,
            amount,
        } => engine
            .trade_currency(&user, &from, &to, amount)
            .await
            .map(|_| ()),
    };

    Outcome {
        kind,
        latency_us: started.elapsed().as_micros() as u64,
        result,
    }
}

fn parse_amount(value: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(value).map_err(|e| anyhow::anyhow!("Invalid amount '{}': {}", value, e))
}

/// Controls the simulation.
pub struct SimulationController {
    engine: Arc<LedgerEngine>,
    provider: Arc<MockRateProvider>,
    users: Vec<UserId>,
    concurrency: usize,
    /// Random number generator.
    rng: Arc<Mutex<StdRng>>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
    failed_assertions: Arc<RwLock<Vec<String>>>,
    next_reference: AtomicU64,
}

impl SimulationController {
    /// Wire the ledger over `store` with an in-memory rate cache and a mock
    /// provider.
    pub fn new(
        config: SimulationConfig,
        store: Arc<dyn LedgerStore>,
        cache_config: RateCacheConfig,
        ledger_config: LedgerConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let registry = Arc::new(InMemoryCurrencyRegistry::with_currencies([
            Currency::ngn(),
            Currency::usd(),
            Currency::eur(),
            Currency::gbp(),
        ]));

        let provider = Arc::new(MockRateProvider::new("simulated"));
        for from in CURRENCIES {
            for to in CURRENCIES {
                if from != to {
                    let rate = (units_per_usd(to) / units_per_usd(from)).round_dp(8);
                    provider.set_rate(from, to, rate);
                }
            }
        }

        let rates = Arc::new(RateService::new(
            provider.clone(),
            Arc::new(MemoryCacheStore::with_capacity(cache_config.max_entries)),
            registry.clone(),
            cache_config,
        ));

        let engine = Arc::new(LedgerEngine::new(
            store,
            registry,
            rates,
            ledger_config,
        ));

        let users = (0..config.users.max(1))
            .map(|i| UserId::new(format!("user-{}", i)))
            .collect();

        Self {
            engine,
            provider,
            users,
            concurrency: config.concurrency.max(1),
            rng: Arc::new(Mutex::new(rng)),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            failed_assertions: Arc::new(RwLock::new(Vec::new())),
            next_reference: AtomicU64::new(0),
        }
    }

    /// Initialize the simulation.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        info!(users = self.users.len(), "Initializing simulation");
        self.engine.provision_system_wallets().await?;
        Ok(())
    }

    /// Run a scenario.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::SeedBalances { amounts } => {
                let mut operations = Vec::new();
                for user in &self.users {
                    for (currency, amount) in amounts {
                        operations.push(Operation::Fund {
                            user: user.clone(),
                            amount: parse_amount(amount)?,
                            currency: currency.clone(),
                            reference: format!("seed-{}-{}", user, currency),
                            replay: false,
                        });
                    }
                }
                info!(operations = operations.len(), "Seeding balances");
                self.run_operations(operations).await?;
            }
            ScenarioStep::FundingStorm {
                user,
                amount,
                currency,
                reference,
                copies,
            } => {
                let user = self.user(*user)?;
                let amount = parse_amount(amount)?;
                info!(user = %user, reference = %reference, copies, "Funding storm");

                let operations = (0..*copies)
                    .map(|i| Operation::Fund {
                        user: user.clone(),
                        amount,
                        currency: currency.clone(),
                        reference: reference.clone(),
                        replay: i > 0,
                    })
                    .collect();
                self.run_operations(operations).await?;
            }
            ScenarioStep::OpposingTrades {
                user,
                base,
                quote,
                base_amount,
                quote_amount,
                rounds,
            } => {
                let user = self.user(*user)?;
                let base_amount = parse_amount(base_amount)?;
                let quote_amount = parse_amount(quote_amount)?;
                info!(user = %user, base = %base, quote = %quote, rounds, "Opposing trades");

                let operations = (0..*rounds)
                    .map(|i| {
                        if i % 2 == 0 {
                            Operation::Trade {
                                user: user.clone(),
                                from: base.clone(),
                                to: quote.clone(),
                                amount: base_amount,
                            }
                        } else {
                            Operation::Trade {
                                user: user.clone(),
                                from: quote.clone(),
                                to: base.clone(),
                                amount: quote_amount,
                            }
                        }
                    })
                    .collect();
                self.run_operations(operations).await?;
            }
            ScenarioStep::RandomLoad { operations } => {
                let operations = self.random_operations(*operations).await;
                info!(operations = operations.len(), "Random load");
                self.run_operations(operations).await?;
            }
            ScenarioStep::ProviderOutage { down } => {
                if *down {
                    warn!("Rate provider going down");
                } else {
                    info!("Rate provider restored");
                }
                self.provider.set_failing(*down);
            }
            ScenarioStep::AssertBalance {
                user,
                currency,
                amount,
            } => {
                let user = self.user(*user)?;
                let expected = parse_amount(amount)?;
                let actual = self
                    .engine
                    .get_user_wallets(&user)
                    .await?
                    .into_iter()
                    .find(|b| &b.currency == currency)
                    .map(|b| b.balance)
                    .unwrap_or(Decimal::ZERO);

                if actual != expected {
                    let failure = format!(
                        "{} {}: expected {}, found {}",
                        user, currency, expected, actual
                    );
                    warn!("Assertion failed: {}", failure);
                    self.failed_assertions.write().await.push(failure);
                }
            }
        }

        Ok(())
    }

    /// Run operations with at most `concurrency` in flight.
    async fn run_operations(&self, operations: Vec<Operation>) -> anyhow::Result<()> {
        let outcomes: Vec<_> = stream::iter(operations)
            .map(|operation| {
                let engine = self.engine.clone();
                tokio::spawn(async move { execute(&engine, operation).await })
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut metrics = self.metrics.write().await;
        for joined in outcomes {
            let outcome = joined?;
            match outcome.result {
                Ok(()) => metrics.record_success(outcome.kind, outcome.latency_us),
                Err(e) => {
                    debug!(kind = outcome.kind, error = %e, "Operation rejected");
                    metrics.record_rejection(outcome.kind, e.error_code(), outcome.latency_us);
                }
            }
        }

        Ok(())
    }

    async fn random_operations(&self, count: usize) -> Vec<Operation> {
        let mut rng = self.rng.lock().await;
        let mut funded: Vec<Operation> = Vec::new();
        let mut operations = Vec::with_capacity(count);

        for _ in 0..count {
            let user = self.users[rng.gen_range(0..self.users.len())].clone();
            let roll = rng.gen_range(0..100);

            let operation = if roll < 15 && !funded.is_empty() {
                funded[rng.gen_range(0..funded.len())].clone().into_replay()
            } else if roll < 50 {
                let currency = CURRENCIES[rng.gen_range(0..CURRENCIES.len())];
                let operation = Operation::Fund {
                    user,
                    amount: Decimal::new(rng.gen_range(100..=max_minor_units(currency)), 2),
                    currency: currency.to_string(),
                    reference: self.reference("fund"),
                    replay: false,
                };
                funded.push(operation.clone());
                operation
            } else {
                let from = CURRENCIES[rng.gen_range(0..CURRENCIES.len())];
                let mut to = CURRENCIES[rng.gen_range(0..CURRENCIES.len())];
                while to == from {
                    to = CURRENCIES[rng.gen_range(0..CURRENCIES.len())];
                }
                Operation::Trade {
                    user,
                    from: from.to_string(),
                    to: to.to_string(),
                    amount: Decimal::new(rng.gen_range(100..=max_minor_units(from)), 2),
                }
            };
            operations.push(operation);
        }

        operations
    }

    fn reference(&self, prefix: &str) -> String {
        let n = self.next_reference.fetch_add(1, Ordering::Relaxed);
        format!("sim-{}-{}", prefix, n)
    }

    fn user(&self, index: usize) -> anyhow::Result<UserId> {
        self.users
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No simulated user {}", index))
    }

    /// Recompute every balance from the journal.
    pub async fn audit(&self) -> anyhow::Result<IntegrityReport> {
        Ok(self.engine.verify_integrity().await?)
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn failed_assertions(&self) -> Vec<String> {
        self.failed_assertions.read().await.clone()
    }
}
