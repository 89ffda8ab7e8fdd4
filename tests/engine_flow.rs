//! Engine Integration Tests
//!
//! End-to-end flows through the assembled engine using the in-memory ports:
//! 1. Scoring bounds and admission monotonicity
//! 2. Sizing, ladder and loss-streak scenarios
//! 3. Simulation and live settlement parity
//! 4. Circuit breaker, dormancy and mirror exits
//! 5. Persistence across a restart
//!
//! All tests are deterministic: time is passed explicitly and no timers run.

use std::sync::Arc;

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use walltrack::adapters::memory::{
    InMemoryCluster, InMemoryTokenData, InMemoryWalletQuality, ScriptedExecution,
};
use walltrack::adapters::replay::ReplayWorld;
use walltrack::application::engine::Engine;
use walltrack::application::lifecycle::ExitReport;
use walltrack::config::{load_config, Config};
use walltrack::domain::circuit_breaker::{BreakerStatus, TripReason};
use walltrack::domain::order::{OrderKind, OrderReason, OrderStatus};
use walltrack::domain::persistence::{RecoveredState, StateStore};
use walltrack::domain::position::{ExecutionMode, Position, PositionStatus};
use walltrack::domain::signal::{ActivityEvent, Direction, Signal, SignalLogEntry, SignalOutcome};
use walltrack::domain::wallet_decay::WalletHealth;
use walltrack::ports::alerts::AlertKind;
use walltrack::ports::execution::ExecutionClient;
use walltrack::ports::market_data::PriceTick;
use walltrack::ports::providers::{DecayStatus, TokenCharacteristics, WalletQuality};
use walltrack::strategy::scorer::SignalScorer;

// ============================================================================
// Test Fixtures
// ============================================================================

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
        + Duration::seconds(secs)
}

/// Capital 100, base size 1.0, no slippage so fills land on the tick price
fn test_config() -> Config {
    let mut config = Config::default();
    config.sizing.capital = 100.0;
    config.sizing.base_size = 1.0;
    config.sizing.max_trade_risk_pct = 10.0;
    config.execution.slippage_bps = 0;
    config
}

/// liquidity 1.0, age 1.0, market cap 1.0, holders 0.9
fn good_token() -> TokenCharacteristics {
    TokenCharacteristics {
        liquidity_usd: 100_000.0,
        age_hours: 48.0,
        market_cap_usd: 1_000_000.0,
        top10_holder_pct: 10.0,
    }
}

fn quality(score: f64) -> WalletQuality {
    WalletQuality {
        score,
        decay_status: DecayStatus::Ok,
    }
}

/// Wallet 0.9, full cluster, full conviction: final score 0.9525
const STRONG: f64 = 0.9;
/// Wallet 0.6, full cluster, full conviction: final score 0.8325
const MODERATE: f64 = 0.6;

struct Harness {
    world: ReplayWorld,
    engine: Engine,
}

impl Harness {
    async fn start(config: &Config) -> Self {
        Self::start_with(config, None, RecoveredState::default(), None).await
    }

    async fn start_with(
        config: &Config,
        execution: Option<Arc<ScriptedExecution>>,
        recovered: RecoveredState,
        store: Option<StateStore>,
    ) -> Self {
        let world = ReplayWorld::new();
        let mut ports = world.ports(None);
        ports.execution = execution.map(|e| e as Arc<dyn ExecutionClient>);
        let engine = Engine::start(config, ports, recovered, store, None)
            .await
            .unwrap();
        Self { world, engine }
    }

    /// Wallet quality, token data, full cluster and an opening price
    async fn market(&self, wallet: &str, wallet_score: f64, mint: &str, price: f64) {
        self.world.wallets.set(wallet, quality(wallet_score)).await;
        self.world.tokens.set(mint, good_token()).await;
        self.world.cluster.set(mint, 3).await;
        self.world.feed.set_price(mint, price).await;
    }

    async fn signal(&self, wallet: &str, mint: &str, direction: Direction, secs: i64) -> SignalLogEntry {
        let event = ActivityEvent {
            wallet_id: wallet.to_string(),
            token_mint: mint.to_string(),
            direction,
            amount: 5.0,
            observed_at: at(secs),
            raw_source: Some("test".to_string()),
        };
        self.engine.process_signal(event, at(secs)).await
    }

    async fn buy(&self, wallet: &str, mint: &str, secs: i64) -> SignalLogEntry {
        self.signal(wallet, mint, Direction::Buy, secs).await
    }

    async fn admit(&self, wallet: &str, mint: &str, secs: i64) -> Uuid {
        let entry = self.buy(wallet, mint, secs).await;
        match entry.outcome {
            SignalOutcome::Admitted { position_id } => position_id,
            other => panic!("expected admission, got {:?}", other),
        }
    }

    async fn price(&self, mint: &str, price: f64, secs: i64) -> Vec<ExitReport> {
        self.world.feed.set_price(mint, price).await;
        let tick = PriceTick {
            token_mint: mint.to_string(),
            price,
            observed_at: at(secs),
        };
        self.engine.pipeline().on_price(&tick).await
    }

    async fn position(&self, id: Uuid) -> Position {
        self.engine.pipeline().lifecycle().position(id).await.unwrap()
    }

    async fn shutdown(self) {
        self.engine.shutdown().await;
    }
}

// ============================================================================
// Scoring properties
// ============================================================================

mod scoring_properties {
    use super::*;

    #[tokio::test]
    async fn final_score_stays_in_unit_range_for_extreme_inputs() {
        let wallets = Arc::new(InMemoryWalletQuality::new());
        let tokens = Arc::new(InMemoryTokenData::new());
        let cluster = Arc::new(InMemoryCluster::new());
        let settings = Config::default().scoring;
        let scorer = SignalScorer::new(wallets.clone(), tokens.clone(), cluster.clone(), settings);

        for wallet_score in [-5.0, 0.0, 0.3, 1.0, 7.5] {
            for liquidity in [0.0, 10.0, 1e12] {
                for count in [0, 2, 1_000] {
                    for amount in [0.0, 1.0, 1e9] {
                        wallets.set("W", quality(wallet_score)).await;
                        tokens
                            .set(
                                "M",
                                TokenCharacteristics {
                                    liquidity_usd: liquidity,
                                    age_hours: liquidity / 1_000.0,
                                    market_cap_usd: liquidity * 10.0,
                                    top10_holder_pct: 150.0,
                                },
                            )
                            .await;
                        cluster.set("M", count).await;

                        let signal = Signal::from_event(ActivityEvent {
                            wallet_id: "W".to_string(),
                            token_mint: "M".to_string(),
                            direction: Direction::Buy,
                            amount,
                            observed_at: at(0),
                            raw_source: None,
                        });
                        let b = scorer.score(&signal, WalletHealth::default(), at(10)).await;
                        assert!((0.0..=1.0).contains(&b.final_score), "score {}", b.final_score);
                        assert_relative_eq!(b.weights.sum(), 1.0, epsilon = 1e-9);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn admission_is_monotonic_in_score() {
        let mut admitted_seen = false;
        for (i, wallet_score) in [0.0, 0.2, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0].into_iter().enumerate() {
            let h = Harness::start(&test_config()).await;
            h.market("W", wallet_score, "M", 1.0).await;
            let entry = h.buy("W", "M", i as i64).await;
            let admitted = matches!(entry.outcome, SignalOutcome::Admitted { .. });

            if admitted_seen {
                assert!(admitted, "score {:?} refused after a lower score was admitted", entry.breakdown);
            }
            admitted_seen |= admitted;
            h.shutdown().await;
        }
        assert!(admitted_seen);
    }

    #[tokio::test]
    async fn missing_provider_data_scores_neutral_and_is_logged() {
        let h = Harness::start(&test_config()).await;
        h.world.feed.set_price("M", 1.0).await;

        let entry = h.buy("Unknown", "M", 0).await;
        let breakdown = entry.breakdown.unwrap();
        assert!(breakdown.is_degraded());
        assert_eq!(entry.outcome, SignalOutcome::BelowThreshold);
        h.shutdown().await;
    }
}

// ============================================================================
// Sizing and exit scenarios
// ============================================================================

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn high_conviction_signal_with_two_slots_used_gets_bracket_size() {
        let h = Harness::start(&test_config()).await;
        h.market("W1", MODERATE, "M1", 1.0).await;
        h.market("W2", MODERATE, "M2", 1.0).await;
        h.admit("W1", "M1", 0).await;
        h.admit("W2", "M2", 1).await;
        assert_eq!(h.engine.gate().snapshot().await.unwrap().open_positions_count, 2);

        h.market("W3", STRONG, "M3", 1.0).await;
        let entry = h.buy("W3", "M3", 2).await;
        assert!(entry.breakdown.as_ref().unwrap().final_score >= 0.85);
        let id = match entry.outcome {
            SignalOutcome::Admitted { position_id } => position_id,
            other => panic!("expected admission, got {:?}", other),
        };

        let position = h.position(id).await;
        // base 1.0 x bracket 1.5 x no loss reduction
        assert_relative_eq!(position.size, 1.5, epsilon = 1e-9);
        assert_eq!(position.exit_strategy.name, "moonbag_runner");
        assert_eq!(h.engine.gate().snapshot().await.unwrap().open_positions_count, 3);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn ladder_fires_at_2_1_and_holds_at_1_05() {
        let h = Harness::start(&test_config()).await;
        h.market("W", MODERATE, "M", 1.0).await;
        let id = h.admit("W", "M", 0).await;

        let position = h.position(id).await;
        assert_eq!(position.exit_strategy.name, "balanced");
        assert_relative_eq!(position.entry_price, 1.0);

        let exits = h.price("M", 2.1, 10).await;
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, OrderReason::ScalingOut);
        assert_relative_eq!(exits[0].amount, 0.5, epsilon = 1e-9);
        assert_eq!(exits[0].position_status, PositionStatus::PartialExit);

        let exits = h.price("M", 1.05, 20).await;
        assert!(exits.is_empty(), "1.05 is above the 0.50 stop");

        let position = h.position(id).await;
        assert_eq!(position.status, PositionStatus::PartialExit);
        assert_relative_eq!(position.remaining(), 0.5, epsilon = 1e-9);
        assert_eq!(position.exit_state.fired_levels, vec![0]);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn ladder_never_sells_into_the_moonbag() {
        let h = Harness::start(&test_config()).await;
        h.market("W", MODERATE, "M", 1.0).await;
        let id = h.admit("W", "M", 0).await;

        let mut ladder_sold = 0.0;
        for (i, price) in [2.1, 2.5, 3.2, 4.0, 10.0, 20.0].into_iter().enumerate() {
            for report in h.price("M", price, 10 + i as i64).await {
                assert_eq!(report.reason, OrderReason::ScalingOut);
                ladder_sold += report.amount;
            }
        }

        let position = h.position(id).await;
        // balanced: 50% + 25%, moonbag 25% untouched
        assert_relative_eq!(ladder_sold, 0.75, epsilon = 1e-9);
        assert_relative_eq!(position.remaining(), 0.25, epsilon = 1e-9);
        assert_eq!(position.exit_state.fired_levels, vec![0, 1]);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn moonbag_stop_guards_moonbag_after_trailing_exit() {
        let h = Harness::start(&test_config()).await;
        h.market("W", STRONG, "M", 1.0).await;
        let id = h.admit("W", "M", 0).await;
        assert_eq!(h.position(id).await.exit_strategy.name, "moonbag_runner");

        // 1.5 units: first rung sells 30%
        let exits = h.price("M", 2.0, 10).await;
        assert_eq!(exits[0].reason, OrderReason::ScalingOut);
        assert_relative_eq!(exits[0].amount, 0.45, epsilon = 1e-9);

        // trailing arms at 3x; the 4x rung is never reached
        assert!(h.price("M", 3.2, 20).await.is_empty());
        let exits = h.price("M", 2.4, 30).await;
        assert_eq!(exits[0].reason, OrderReason::TrailingStop);
        assert_relative_eq!(exits[0].amount, 0.45, epsilon = 1e-9);

        let position = h.position(id).await;
        assert!(position.only_moonbag_left());
        assert_relative_eq!(position.remaining(), 0.6, epsilon = 1e-9);

        // 0.7 is under the 0.8 moonbag stop but above the 0.6 stop loss
        let exits = h.price("M", 0.7, 40).await;
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, OrderReason::MoonbagStop);
        assert_relative_eq!(exits[0].amount, 0.6, epsilon = 1e-9);

        let position = h.position(id).await;
        assert_eq!(position.status, PositionStatus::Closed);
        // 0.45 * 1.0 + 0.45 * 1.4 - 0.6 * 0.3
        assert_relative_eq!(position.realized_pnl, 0.9, epsilon = 1e-9);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn stop_loss_wins_when_mirror_and_ladder_also_qualify() {
        let h = Harness::start(&test_config()).await;
        h.market("W", MODERATE, "M", 1.0).await;
        let id = h.admit("W", "M", 0).await;

        // price crashes; the stop must fire before anything else
        let exits = h.price("M", 0.3, 5).await;
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, OrderReason::StopLoss);
        assert_eq!(h.position(id).await.status, PositionStatus::Closed);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn three_losses_reduce_size_for_every_wallet_until_a_win() {
        let h = Harness::start(&test_config()).await;

        for (i, mint) in ["L1", "L2", "L3"].into_iter().enumerate() {
            let t = i as i64 * 100;
            h.market("W1", MODERATE, mint, 1.0).await;
            h.admit("W1", mint, t).await;
            let exits = h.price(mint, 0.4, t + 10).await;
            assert_eq!(exits[0].reason, OrderReason::StopLoss);
            assert!(exits[0].realized_pnl < 0.0);
        }
        let state = h.engine.gate().snapshot().await.unwrap();
        assert_eq!(state.consecutive_losses, 3);
        assert_eq!(state.status, BreakerStatus::Closed);

        // a different wallet still gets the reduction
        h.market("W2", STRONG, "G1", 1.0).await;
        let reduced = h.admit("W2", "G1", 400).await;
        assert_relative_eq!(h.position(reduced).await.size, 0.75, epsilon = 1e-9);

        // the win resets the streak
        h.price("G1", 1.5, 410).await;
        let routed = h.signal("W2", "G1", Direction::Sell, 420).await;
        assert_eq!(
            routed.outcome,
            SignalOutcome::MirrorExitRouted { positions: vec![reduced] }
        );
        let winner = h.position(reduced).await;
        assert_eq!(winner.status, PositionStatus::Closed);
        assert!(winner.realized_pnl > 0.0);
        assert_eq!(h.engine.gate().snapshot().await.unwrap().consecutive_losses, 0);

        h.market("W3", STRONG, "G2", 1.0).await;
        let full = h.admit("W3", "G2", 500).await;
        assert_relative_eq!(h.position(full).await.size, 1.5, epsilon = 1e-9);

        // W1 itself is now downgraded by decay tracking
        let stats = h.engine.pipeline().decay().stats("W1").await.unwrap();
        assert_eq!(stats.consecutive_losses, 3);
        assert!(stats.downgraded_until.is_some());
        assert!(h.engine.pipeline().decay().health("W1", at(600)).await.downgraded);
        h.shutdown().await;
    }
}

// ============================================================================
// Settlement parity
// ============================================================================

mod settlement_parity {
    use super::*;

    /// Entry, one ladder level, then a mirror exit of the rest
    async fn run_script(h: &Harness) -> Position {
        h.market("W", MODERATE, "M", 1.0).await;
        let id = h.admit("W", "M", 0).await;
        h.price("M", 2.2, 10).await;
        h.price("M", 1.8, 20).await;
        h.signal("W", "M", Direction::Sell, 30).await;
        h.position(id).await
    }

    #[tokio::test]
    async fn simulation_and_live_differ_only_in_fill_status() {
        let sim = Harness::start(&test_config()).await;
        let sim_position = run_script(&sim).await;

        let mut live_config = test_config();
        live_config.execution.mode = ExecutionMode::Live;
        let exec = Arc::new(ScriptedExecution::new(live_config.execution.slippage_bps));
        let live = Harness::start_with(&live_config, Some(exec.clone()), RecoveredState::default(), None).await;
        let live_position = run_script(&live).await;

        assert_eq!(sim_position.mode, ExecutionMode::Simulation);
        assert_eq!(live_position.mode, ExecutionMode::Live);
        assert_eq!(sim_position.status, live_position.status);
        assert_eq!(sim_position.status, PositionStatus::Closed);
        assert_relative_eq!(sim_position.entry_price, live_position.entry_price);
        assert_relative_eq!(sim_position.exited_amount, live_position.exited_amount, epsilon = 1e-12);
        assert_relative_eq!(sim_position.realized_pnl, live_position.realized_pnl, epsilon = 1e-12);
        assert_eq!(sim_position.exit_state.fired_levels, live_position.exit_state.fired_levels);

        assert_eq!(sim_position.orders.len(), live_position.orders.len());
        for (s, l) in sim_position.orders.iter().zip(&live_position.orders) {
            assert_eq!(s.kind, l.kind);
            assert_eq!(s.reason, l.reason);
            assert_relative_eq!(s.amount, l.amount, epsilon = 1e-12);
            assert_eq!(s.fill_price, l.fill_price);
            assert_eq!(s.status, OrderStatus::SimFilled);
            assert_eq!(l.status, OrderStatus::Filled);
        }

        let reasons: Vec<_> = live_position.orders.iter().map(|o| o.reason).collect();
        assert_eq!(
            reasons,
            vec![OrderReason::Entry, OrderReason::ScalingOut, OrderReason::MirrorExit]
        );
        assert_eq!(exec.submissions().await.len(), 3);

        sim.shutdown().await;
        live.shutdown().await;
    }

    #[tokio::test]
    async fn live_exit_failure_keeps_position_and_retries_next_tick() {
        let mut config = test_config();
        config.execution.mode = ExecutionMode::Live;
        config.execution.max_attempts = 2;
        config.execution.base_backoff_ms = 1;
        let exec = Arc::new(ScriptedExecution::new(0));
        let h = Harness::start_with(&config, Some(exec.clone()), RecoveredState::default(), None).await;

        h.market("W", MODERATE, "M", 1.0).await;
        let id = h.admit("W", "M", 0).await;

        exec.fail_next(2).await;
        let exits = h.price("M", 0.4, 10).await;
        assert_eq!(exits[0].order_status, OrderStatus::Failed);
        assert_eq!(h.position(id).await.status, PositionStatus::Open);

        let alerts = h.world.alerts.alerts().await;
        assert!(alerts.iter().any(|a| matches!(
            &a.kind,
            AlertKind::ExecutionFailed { position_id, attempts: 2, .. } if *position_id == id
        )));

        let exits = h.price("M", 0.4, 20).await;
        assert_eq!(exits[0].order_status, OrderStatus::Filled);
        assert_eq!(h.position(id).await.status, PositionStatus::Closed);
        h.shutdown().await;
    }
}

// ============================================================================
// Breaker, dormancy and mirror exits
// ============================================================================

mod risk_controls {
    use super::*;

    #[tokio::test]
    async fn drawdown_trips_breaker_and_only_reset_reopens() {
        let mut config = test_config();
        config.sizing.capital = 5.0;
        config.sizing.max_trade_risk_pct = 100.0;
        let h = Harness::start(&config).await;

        h.market("W1", STRONG, "M1", 1.0).await;
        h.admit("W1", "M1", 0).await;
        // 1.5 * (0.1 - 1) = -1.35 on 5.0 is a 27% drawdown
        let exits = h.price("M1", 0.1, 10).await;
        assert_eq!(exits[0].reason, OrderReason::StopLoss);

        let state = h.engine.gate().snapshot().await.unwrap();
        assert_eq!(state.status, BreakerStatus::Open);
        assert_eq!(state.trip_reason, Some(TripReason::Drawdown));
        assert!(h
            .world
            .alerts
            .alerts()
            .await
            .iter()
            .any(|a| matches!(a.kind, AlertKind::BreakerTripped { .. })));

        h.market("W2", STRONG, "M2", 1.0).await;
        assert_eq!(h.buy("W2", "M2", 20).await.outcome, SignalOutcome::BreakerOpen);

        // maintenance inside the cooldown does not close it
        h.engine.pipeline().run_maintenance(at(60)).await;
        assert_eq!(h.buy("W2", "M2", 70).await.outcome, SignalOutcome::BreakerOpen);

        let state = h.engine.gate().manual_reset().await.unwrap();
        assert_eq!(state.status, BreakerStatus::Closed);
        assert_relative_eq!(state.peak_equity, 3.65, epsilon = 1e-9);
        assert!(matches!(h.buy("W2", "M2", 80).await.outcome, SignalOutcome::Admitted { .. }));
        h.shutdown().await;
    }

    #[tokio::test]
    async fn pause_blocks_admission_but_exits_still_run() {
        let h = Harness::start(&test_config()).await;
        h.market("W", MODERATE, "M", 1.0).await;
        let id = h.admit("W", "M", 0).await;

        h.engine.gate().set_paused(true).await.unwrap();
        h.market("W2", STRONG, "M2", 1.0).await;
        assert_eq!(h.buy("W2", "M2", 5).await.outcome, SignalOutcome::Paused);

        let exits = h.price("M", 0.4, 10).await;
        assert_eq!(exits.len(), 1);
        assert_eq!(h.position(id).await.status, PositionStatus::Closed);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn quiet_wallet_goes_dormant_and_wakes_on_activity() {
        let h = Harness::start(&test_config()).await;
        h.market("W", STRONG, "M1", 1.0).await;
        h.admit("W", "M1", 0).await;

        let fifteen_days = 15 * 24 * 3600;
        h.engine.pipeline().run_maintenance(at(fifteen_days)).await;
        assert!(h.world.alerts.alerts().await.iter().any(|a| matches!(
            &a.kind,
            AlertKind::WalletDormant { wallet_id } if wallet_id == "W"
        )));

        h.market("W", STRONG, "M2", 1.0).await;
        let refused = h.buy("W", "M2", fifteen_days).await;
        assert_eq!(refused.outcome, SignalOutcome::WalletDormant);
        assert!(refused.breakdown.is_none());

        let woken = h.buy("W", "M2", fifteen_days + 1).await;
        assert!(matches!(woken.outcome, SignalOutcome::Admitted { .. }));
        h.shutdown().await;
    }

    #[tokio::test]
    async fn source_sell_routes_mirror_exit_only_to_its_positions() {
        let h = Harness::start(&test_config()).await;
        h.market("W1", MODERATE, "M", 1.0).await;
        h.market("W2", MODERATE, "M", 1.0).await;
        let mine = h.admit("W1", "M", 0).await;
        let other = h.admit("W2", "M", 1).await;

        let entry = h.signal("W1", "M", Direction::Sell, 10).await;
        assert_eq!(entry.outcome, SignalOutcome::MirrorExitRouted { positions: vec![mine] });

        let closed = h.position(mine).await;
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.orders.last().unwrap().reason, OrderReason::MirrorExit);
        assert_eq!(h.position(other).await.status, PositionStatus::Open);

        // nothing left to route
        let again = h.signal("W1", "M", Direction::Sell, 20).await;
        assert_eq!(again.outcome, SignalOutcome::MirrorExitRouted { positions: vec![] });
        h.shutdown().await;
    }
}

// ============================================================================
// Persistence
// ============================================================================

mod persistence {
    use super::*;

    #[tokio::test]
    async fn restart_resumes_positions_breaker_and_wallet_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let config = test_config();

        let first = Harness::start_with(&config, None, RecoveredState::default(), Some(store.clone())).await;
        first.market("W", MODERATE, "M", 1.0).await;
        let id = first.admit("W", "M", 0).await;
        first.price("M", 2.1, 10).await;
        first.shutdown().await;

        let recovered = store.recover().unwrap();
        let breaker = recovered.breaker.clone().unwrap();
        assert_eq!(breaker.open_positions_count, 1);
        assert_eq!(recovered.positions.len(), 1);
        assert_eq!(recovered.positions[0].status, PositionStatus::PartialExit);
        assert!(recovered.wallet_stats.contains_key("W"));

        let log = store.read_signal_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, SignalOutcome::Admitted { position_id: id });

        let second = Harness::start_with(&config, None, recovered, Some(store.clone())).await;
        second.world.feed.set_price("M", 2.1).await;
        assert_eq!(second.engine.pipeline().workers().running().await, vec![id]);

        let exits = second.price("M", 0.4, 100).await;
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, OrderReason::StopLoss);
        let position = second.position(id).await;
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(
            position.orders.iter().filter(|o| o.kind == OrderKind::Exit).count(),
            2
        );
        assert_eq!(second.engine.gate().snapshot().await.unwrap().open_positions_count, 0);
        second.shutdown().await;

        let saved = store.load_positions().unwrap();
        assert_eq!(saved[0].status, PositionStatus::Closed);
    }

    #[test]
    fn sample_config_loads_and_validates() {
        let config = load_config("config/walltrack.toml").unwrap();
        assert_eq!(config.execution.mode, ExecutionMode::Simulation);
        assert!(config.strategy_catalog().unwrap().get("quick_flip").is_ok());
        assert_eq!(config.effective_exit_assignment().len(), 3);
    }
}
