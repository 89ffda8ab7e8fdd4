//! CLI Command Handlers
//!
//! Implementation of all CLI commands for WallTrack.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::adapters::alerts::FanoutAlertSink;
use crate::adapters::replay::{read_events, ReplayWorld, Replayer};
use crate::config::{load_config, Config};
use crate::domain::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use crate::domain::persistence::{PersistError, RecoveredState, StateStore};
use crate::domain::position::PositionStatus;
use crate::ports::alerts::AlertSink;

const DEFAULT_CONFIG: &str = "config/walltrack.toml";

/// WallTrack - signal scoring, risk gating and exit strategy engine
#[derive(Parser, Debug)]
#[command(
    name = "walltrack",
    version = env!("CARGO_PKG_VERSION"),
    about = "Signal evaluation and risk-gated exit strategy engine",
    long_about = "WallTrack scores wallet-activity signals, admits them through a circuit \
                  breaker and manages every opened position with a configurable exit strategy."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a JSON-lines event file through the engine in simulation mode
    Replay(ReplayCmd),

    /// Show circuit breaker, positions and wallet statistics from the data dir
    Status(StatusCmd),

    /// Pause new admissions (open positions stay protected)
    Pause(PauseCmd),

    /// Resume admissions after a manual pause
    Resume(ResumeCmd),

    /// Manually reset the circuit breaker
    ResetBreaker(ResetBreakerCmd),

    /// List the exit strategy catalog and score assignment
    Strategies(StrategiesCmd),
}

impl Command {
    pub fn config_path(&self) -> &Path {
        match self {
            Command::Replay(cmd) => &cmd.config,
            Command::Status(cmd) => &cmd.config,
            Command::Pause(cmd) => &cmd.config,
            Command::Resume(cmd) => &cmd.config,
            Command::ResetBreaker(cmd) => &cmd.config,
            Command::Strategies(cmd) => &cmd.config,
        }
    }
}

#[derive(Parser, Debug)]
pub struct ReplayCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// JSON-lines event file
    #[arg(short, long, value_name = "FILE")]
    pub events: PathBuf,

    /// Recover from and write to the configured data directory
    #[arg(long)]
    pub persist: bool,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Also list closed positions
    #[arg(long)]
    pub all: bool,
}

#[derive(Parser, Debug)]
pub struct PauseCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct ResumeCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct ResetBreakerCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Skip the confirmation prompt; a corrupted state file is discarded
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct StrategiesCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
}

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    let config = load_config(app.command.config_path()).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            app.command.config_path().display()
        )
    })?;

    init_logging(app.verbose, app.debug, &config.logging.level)?;

    match app.command {
        Command::Replay(cmd) => replay_command(cmd, &config).await,
        Command::Status(cmd) => status_command(cmd, &config),
        Command::Pause(_) => set_paused(&config, true),
        Command::Resume(_) => set_paused(&config, false),
        Command::ResetBreaker(cmd) => reset_breaker_command(cmd, &config),
        Command::Strategies(_) => strategies_command(&config),
    }
}

/// Initialize logging; `RUST_LOG` wins, then the flags, then the config level
fn init_logging(verbose: bool, debug: bool, config_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let fallback = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        config_level
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

fn store_for(config: &Config) -> StateStore {
    StateStore::new(config.persistence.resolved_data_dir())
}

/// Breaker state on disk, or a fresh one at configured capital
fn load_breaker(store: &StateStore, config: &Config) -> Result<CircuitBreaker> {
    let breaker_config = config.risk.breaker_config();
    let state = store.load_breaker().with_context(|| {
        format!(
            "Breaker state in {} is unreadable; run `walltrack reset-breaker --force` to discard it",
            store.data_dir().display()
        )
    })?;
    Ok(match state {
        Some(state) => CircuitBreaker::restore(breaker_config, state),
        None => CircuitBreaker::new(breaker_config, config.sizing.capital),
    })
}

/// Handle replay command
async fn replay_command(cmd: ReplayCmd, config: &Config) -> Result<()> {
    tracing::info!(events = %cmd.events.display(), "Starting replay");

    let events = read_events(&cmd.events)
        .with_context(|| format!("Failed to read events from {}", cmd.events.display()))?;

    let (store, recovered) = if cmd.persist {
        let store = store_for(config);
        let recovered = store.recover().with_context(|| {
            format!(
                "State in {} is unreadable; run `walltrack reset-breaker --force` if the breaker file is corrupted",
                store.data_dir().display()
            )
        })?;
        (Some(store), recovered)
    } else {
        (None, RecoveredState::default())
    };

    let alerts: Arc<dyn AlertSink> = Arc::new(
        FanoutAlertSink::from_config(&config.alerts).context("Failed to build alert sinks")?,
    );

    let mut replayer = Replayer::start(config, ReplayWorld::new(), recovered, store, Some(alerts))
        .await
        .context("Failed to start engine")?;
    replayer.run(events).await;
    let summary = replayer.finish().await;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("======================================");
    println!("    Replay Summary");
    println!("======================================");
    println!();
    println!("  Events:            {}", summary.events);
    println!("  Signals:           {}", summary.signals);
    for (code, count) in &summary.outcomes {
        println!("    {:<24} {}", code, count);
    }
    println!("  Exit orders:       {}", summary.exit_orders);
    println!("  Open positions:    {}", summary.open_positions);
    println!("  Closed positions:  {}", summary.closed_positions);
    println!("  Under review:      {}", summary.review_positions);
    println!("  Realized PnL:      {:+.6}", summary.realized_pnl);
    println!("  Equity:            {:.6}", summary.equity);
    println!("  Breaker:           {}", summary.breaker_status);
    println!("  Alerts raised:     {}", summary.alerts);
    println!();

    Ok(())
}

/// Handle status command
fn status_command(cmd: StatusCmd, config: &Config) -> Result<()> {
    let store = store_for(config);
    let breaker = load_breaker(&store, config)?;
    let positions = store.load_positions().context("Failed to load positions")?;
    let wallets = store.load_wallet_stats().context("Failed to load wallet statistics")?;

    print_breaker(breaker.state(), breaker.size_multiplier());

    let active: Vec<_> = positions
        .iter()
        .filter(|p| cmd.all || p.status != PositionStatus::Closed)
        .collect();
    println!();
    println!("  Positions ({} shown, {} total):", active.len(), positions.len());
    for p in active {
        println!(
            "    {} {:<14} {:<12} entry {:.6} size {:.4} exited {:.4} pnl {:+.6} [{}]",
            p.id,
            p.status.as_str(),
            p.token_mint,
            p.entry_price,
            p.size,
            p.exited_amount,
            p.realized_pnl,
            p.exit_strategy.name
        );
        if let Some(reason) = &p.review_reason {
            println!("      review: {}", reason);
        }
    }

    let dormant = wallets.values().filter(|w| w.dormant).count();
    let flagged = wallets.values().filter(|w| w.flagged).count();
    println!();
    println!(
        "  Wallets tracked: {} (flagged {}, dormant {})",
        wallets.len(),
        flagged,
        dormant
    );
    println!();
    println!("======================================");
    Ok(())
}

fn print_breaker(state: &CircuitBreakerState, size_multiplier: f64) {
    println!();
    println!("======================================");
    println!("    WallTrack Status Report");
    println!("======================================");
    println!();
    println!("  Breaker:            {}", state.status.description());
    if let Some(reason) = state.trip_reason {
        println!("  Trip Reason:        {}", reason);
    }
    println!("  Manual Pause:       {}", if state.manual_pause { "YES" } else { "no" });
    println!("  Equity:             {:.6} (peak {:.6})", state.current_equity, state.peak_equity);
    println!("  Drawdown:           {:.2}%", state.drawdown() * 100.0);
    println!("  Consecutive Losses: {}", state.consecutive_losses);
    println!("  Size Multiplier:    {:.2}", size_multiplier);
    match state.rolling_win_rate() {
        Some(rate) => println!(
            "  Win Rate:           {:.1}% over {} trades",
            rate * 100.0,
            state.recent_outcomes.len()
        ),
        None => println!("  Win Rate:           n/a"),
    }
    println!("  Open Slots Used:    {}", state.open_positions_count);
    if let Some(until) = state.cooldown_until {
        println!("  Cooldown Until:     {}", until.to_rfc3339());
    }
    if state.requires_recalibration {
        println!("  Recalibration:      required");
    }
}

/// Handle pause and resume commands
fn set_paused(config: &Config, paused: bool) -> Result<()> {
    let store = store_for(config);
    let mut breaker = load_breaker(&store, config)?;
    breaker.set_paused(paused);
    store
        .save_breaker(breaker.state())
        .context("Failed to save breaker state")?;

    if paused {
        println!("Admissions PAUSED. Open positions remain protected by their exit strategies.");
    } else {
        println!("Admissions RESUMED.");
        if breaker.state().is_open() {
            println!("Note: the circuit breaker is still OPEN; use `reset-breaker` to clear it.");
        }
    }
    Ok(())
}

/// Handle reset-breaker command
fn reset_breaker_command(cmd: ResetBreakerCmd, config: &Config) -> Result<()> {
    let store = store_for(config);

    let mut breaker = match store.load_breaker() {
        Ok(Some(state)) => CircuitBreaker::restore(config.risk.breaker_config(), state),
        Ok(None) => {
            println!("No breaker state found at: {}", store.data_dir().display());
            println!("Nothing to reset.");
            return Ok(());
        }
        Err(PersistError::CorruptedFile(detail)) if cmd.force => {
            tracing::warn!(%detail, "Discarding corrupted breaker state");
            store.discard_breaker().context("Failed to discard breaker state")?;
            let fresh = CircuitBreaker::new(config.risk.breaker_config(), config.sizing.capital);
            store
                .save_breaker(fresh.state())
                .context("Failed to save breaker state")?;
            println!("Corrupted breaker state discarded; fresh state written at capital {:.6}.", config.sizing.capital);
            return Ok(());
        }
        Err(e) => {
            return Err(e).context("Breaker state is unreadable; re-run with --force to discard it");
        }
    };

    print_breaker(breaker.state(), breaker.size_multiplier());
    println!();
    println!("======================================");

    if !cmd.force {
        println!();
        println!("WARNING: Resetting clears the trip and rebases peak equity to current equity.");
        println!("Make sure you have investigated the losses before proceeding.");
        println!();
        print!("Type 'RESET' to confirm (or use --force to skip this prompt): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if input.trim() != "RESET" {
            println!("Aborted. Breaker state unchanged.");
            return Ok(());
        }
    }

    breaker.manual_reset();
    store
        .save_breaker(breaker.state())
        .context("Failed to save breaker state")?;

    println!();
    println!("Circuit breaker RESET.");
    if breaker.state().consecutive_losses > 0 {
        println!(
            "Note: loss streak of {} preserved; sizing stays reduced until a win.",
            breaker.state().consecutive_losses
        );
    }
    Ok(())
}

/// Handle strategies command
fn strategies_command(config: &Config) -> Result<()> {
    let catalog = config.strategy_catalog().context("Invalid exit strategy catalog")?;

    println!();
    println!("Exit strategies:");
    for strategy in catalog.iter() {
        println!();
        println!("  {}", strategy.name);
        println!("    stop loss:   -{:.1}%", strategy.stop_loss_pct);
        for level in &strategy.take_profit_levels {
            println!(
                "    take profit: {:.2}x sells {:.1}%",
                level.trigger_multiple, level.sell_pct
            );
        }
        if let Some(trailing) = strategy.active_trailing() {
            println!(
                "    trailing:    arms at {:.2}x, trails {:.1}%",
                trailing.activation_multiple, trailing.trail_pct
            );
        }
        if let Some(rules) = strategy.time_rules {
            if let Some(hours) = rules.max_hold_hours {
                println!("    max hold:    {:.1}h", hours);
            }
            if let Some((band, hours)) = rules.stagnation() {
                println!("    stagnation:  within {:.1}% for {:.1}h", band, hours);
            }
        }
        if strategy.moonbag_pct > 0.0 {
            match strategy.moonbag_stop_pct {
                Some(stop) => println!("    moonbag:     {:.1}% (stop -{:.1}%)", strategy.moonbag_pct, stop),
                None => println!("    moonbag:     {:.1}%", strategy.moonbag_pct),
            }
        }
        println!("    mirror exit: {}", if strategy.mirror_exit { "on" } else { "off" });
    }

    let mut assignment = config.effective_exit_assignment();
    assignment.sort_by(|a, b| a.min_score.total_cmp(&b.min_score));
    println!();
    println!("Assignment by score:");
    for a in &assignment {
        if catalog.get(&a.strategy).is_err() {
            bail!("Assignment references unknown strategy '{}'", a.strategy);
        }
        println!("  score >= {:.2} -> {}", a.min_score, a.strategy);
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_app_parse_replay() {
        let args = vec!["walltrack", "replay", "--events", "events.jsonl"];
        let app = CliApp::try_parse_from(args).unwrap();

        match app.command {
            Command::Replay(cmd) => {
                assert_eq!(cmd.events, PathBuf::from("events.jsonl"));
                assert_eq!(cmd.config, PathBuf::from(DEFAULT_CONFIG));
                assert!(!cmd.persist);
                assert!(!cmd.json);
            }
            _ => panic!("Expected Replay command"),
        }
    }

    #[test]
    fn test_cli_app_parse_replay_requires_events() {
        let args = vec!["walltrack", "replay"];
        assert!(CliApp::try_parse_from(args).is_err());
    }

    #[test]
    fn test_cli_app_parse_replay_with_flags() {
        let args = vec![
            "walltrack", "replay", "-c", "custom.toml", "-e", "e.jsonl", "--persist", "--json",
        ];
        let app = CliApp::try_parse_from(args).unwrap();

        match app.command {
            Command::Replay(cmd) => {
                assert_eq!(cmd.config, PathBuf::from("custom.toml"));
                assert!(cmd.persist);
                assert!(cmd.json);
            }
            _ => panic!("Expected Replay command"),
        }
    }

    #[test]
    fn test_cli_app_parse_reset_breaker() {
        let args = vec!["walltrack", "reset-breaker", "--force"];
        let app = CliApp::try_parse_from(args).unwrap();

        match app.command {
            Command::ResetBreaker(cmd) => assert!(cmd.force),
            _ => panic!("Expected ResetBreaker command"),
        }
    }

    #[test]
    fn test_cli_app_parse_pause_resume() {
        let app = CliApp::try_parse_from(vec!["walltrack", "pause"]).unwrap();
        assert!(matches!(app.command, Command::Pause(_)));

        let app = CliApp::try_parse_from(vec!["walltrack", "resume", "--config", "x.toml"]).unwrap();
        assert_eq!(app.command.config_path(), Path::new("x.toml"));
    }

    #[test]
    fn test_cli_app_parse_status_all() {
        let app = CliApp::try_parse_from(vec!["walltrack", "status", "--all"]).unwrap();
        match app.command {
            Command::Status(cmd) => assert!(cmd.all),
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_cli_app_global_flags() {
        let args = vec!["walltrack", "strategies", "--verbose", "--debug"];
        let app = CliApp::try_parse_from(args).unwrap();

        assert!(app.verbose);
        assert!(app.debug);
        assert!(matches!(app.command, Command::Strategies(_)));
    }

    #[test]
    fn test_cli_app_unknown_command() {
        assert!(CliApp::try_parse_from(vec!["walltrack", "swap"]).is_err());
    }

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.persistence.data_dir = dir.to_string_lossy().into_owned();
        config
    }

    #[test]
    fn test_pause_then_resume_persists_flag() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = StateStore::new(dir.path());

        set_paused(&config, true).unwrap();
        assert!(store.load_breaker().unwrap().unwrap().manual_pause);

        set_paused(&config, false).unwrap();
        assert!(!store.load_breaker().unwrap().unwrap().manual_pause);
    }

    #[test]
    fn test_forced_reset_discards_corrupted_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = StateStore::new(dir.path());
        std::fs::write(store.path(crate::domain::persistence::BREAKER_FILE), "{ not json").unwrap();

        let unforced = ResetBreakerCmd { config: PathBuf::new(), force: false };
        assert!(reset_breaker_command(unforced, &config).is_err());

        let forced = ResetBreakerCmd { config: PathBuf::new(), force: true };
        reset_breaker_command(forced, &config).unwrap();
        let state = store.load_breaker().unwrap().unwrap();
        assert_eq!(state.current_equity, config.sizing.capital);
    }

    #[test]
    fn test_forced_reset_closes_open_breaker() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = StateStore::new(dir.path());

        let mut state = CircuitBreakerState::fresh(100.0);
        state.status = crate::domain::circuit_breaker::BreakerStatus::Open;
        state.current_equity = 70.0;
        store.save_breaker(&state).unwrap();

        let cmd = ResetBreakerCmd { config: PathBuf::new(), force: true };
        reset_breaker_command(cmd, &config).unwrap();

        let state = store.load_breaker().unwrap().unwrap();
        assert!(!state.is_open());
        assert_eq!(state.peak_equity, 70.0);
    }
}
