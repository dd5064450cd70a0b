//! Cross-exchange arbitrage engine entry point.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cex_arb::api::{create_router, AppState};
use cex_arb::arbitrage::{diagnose_no_opportunity, Orchestrator, OrchestratorSettings};
use cex_arb::config::Config;
use cex_arb::exchange::{
    build_http_client, BinanceClient, BinanceFeed, Exchange, ExchangeRegistry, KucoinClient,
    KucoinFeed, PaperExchange, Retrying, Wallet,
};
use cex_arb::metrics;
use cex_arb::notify::{LogNotifier, NotifierRegistry, WebhookNotifier};
use cex_arb::orderbook::{PriceAggregator, PriceSnapshot, SnapshotHandler, TickerFeed};
use cex_arb::trading::{MemoryStore, PositionStore, SqliteStore, Step};
use cex_arb::utils::{shutdown_channel, shutdown_signal, wait_for_shutdown};

/// Cross-exchange spot/margin arbitrage engine.
#[derive(Parser, Debug)]
#[command(name = "cex-arb")]
#[command(about = "Spot/margin arbitrage between Binance and KuCoin")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// Run in dry-run mode (paper exchanges, in-memory store).
    #[arg(long)]
    dry_run: Option<bool>,

    /// HTTP server port for health/metrics.
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine (default).
    Run {
        /// Run in dry-run mode (paper exchanges, in-memory store).
        #[arg(long)]
        dry_run: Option<bool>,

        /// HTTP server port for health/metrics.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Query balances on both exchanges.
    CheckBalance,

    /// Print the persisted position.
    ShowPosition,

    /// Operator override for the persisted position.
    ResetPosition {
        /// Force the position to this step (e.g. LOAN_REPAID).
        #[arg(long, conflicts_with = "clear")]
        step: Option<Step>,

        /// Delete the position record entirely.
        #[arg(long)]
        clear: bool,
    },

    /// Connect the price feeds and print snapshots (diagnostic).
    FeedTest {
        /// How long to listen.
        #[arg(long, default_value = "10")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("cex_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if args.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    // Handle subcommands
    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::CheckBalance) => cmd_check_balance().await,
        Some(Command::ShowPosition) => cmd_show_position().await,
        Some(Command::ResetPosition { step, clear }) => cmd_reset_position(step, clear).await,
        Some(Command::FeedTest { seconds }) => cmd_feed_test(seconds).await,
        Some(Command::Run { dry_run, port }) => cmd_run(dry_run, port).await,
        None => cmd_run(args.dry_run, args.port).await,
    }
}

/// Load and validate configuration, applying CLI overrides.
fn load_config(dry_run: Option<bool>, port: Option<u16>) -> anyhow::Result<Config> {
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(dry_run) = dry_run {
        config.dry_run = dry_run;
    }
    if let Some(port) = port {
        config.port = port;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("CEX ARB - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Mode: {}", if config.dry_run { "PAPER" } else { "LIVE TRADING" });
    println!("  Instruments: {}", config.instruments.join(", "));
    println!("  Capital: {}", config.capital);
    println!("  Fee rate: {}", config.fee_rate);
    println!("  Transfer cost: {}", config.transfer_cost);
    println!("  Min profit margin: {}", config.min_profit_margin);
    println!("  Close spread: {}", config.close_spread);
    println!("  Price side: {}", config.price_side);
    println!("  Store: {}", config.store_path);
    println!("  Rebalance after close: {}", config.rebalance_after_close);
    println!("  Binance key: {}", Config::mask(&config.binance_api_key));
    println!("  KuCoin key: {}", Config::mask(&config.kucoin_api_key));
    println!("  Alert webhook: {}", if config.alert_webhook_url.is_some() { "set" } else { "unset" });
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Query balances on both exchanges.
async fn cmd_check_balance() -> anyhow::Result<()> {
    let config = Config::load()?;
    let registry = live_registry(&config)?;

    println!("======================================================================");
    println!("CEX ARB - BALANCE CHECK");
    println!("======================================================================");

    for exchange in registry.exchanges() {
        let client = registry.get(exchange)?;
        print!("\n{}... ", exchange);
        match client.get_balances().await {
            Ok(balances) => {
                println!("OK");
                for balance in balances.iter().filter(|b| !b.amount.is_zero()) {
                    println!("   {:<8} {:<8} {}", balance.wallet, balance.currency, balance.amount);
                }
            }
            Err(e) => {
                println!("FAILED");
                println!("   Error: {}", e);
            }
        }
    }

    println!("\n======================================================================");
    Ok(())
}

/// Print the persisted position.
async fn cmd_show_position() -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = SqliteStore::open(&config.store_path)?;

    match store.load().await? {
        Some(position) => println!("{}", serde_json::to_string_pretty(&position)?),
        None => println!("No position recorded in {}", config.store_path),
    }
    Ok(())
}

/// Operator override for the persisted position.
async fn cmd_reset_position(step: Option<Step>, clear: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = SqliteStore::open(&config.store_path)?;

    if clear {
        store.clear().await?;
        warn!(store = %config.store_path, "Position record cleared by operator");
        println!("Position cleared");
        return Ok(());
    }

    let Some(step) = step else {
        return Err(anyhow::anyhow!("pass --step <STEP> or --clear"));
    };
    let Some(mut position) = store.load().await? else {
        return Err(anyhow::anyhow!("no position recorded in {}", config.store_path));
    };

    let from = position.step;
    position.force_step(step);
    store.save(&position).await?;
    warn!(coin = %position.coin, from = %from, to = %step, "Position step overridden by operator");
    println!("Position {} moved {} -> {}", position.coin, from, step);
    Ok(())
}

/// Prints every snapshot with its no-opportunity diagnosis.
struct PrintHandler {
    config: Config,
    started: Instant,
}

#[async_trait]
impl SnapshotHandler for PrintHandler {
    async fn on_snapshot(&self, snapshot: PriceSnapshot) {
        let prices: Vec<String> = snapshot
            .prices
            .iter()
            .map(|(exchange, price)| format!("{exchange}={price}"))
            .collect();
        println!(
            "   [{:.1}s] {} {} | {}",
            self.started.elapsed().as_secs_f64(),
            snapshot.instrument,
            prices.join(" "),
            diagnose_no_opportunity(&snapshot, &self.config.strategy_params()),
        );
    }
}

/// Connect the price feeds and print snapshots.
async fn cmd_feed_test(seconds: u64) -> anyhow::Result<()> {
    let config = load_config(Some(true), None)?;

    println!("======================================================================");
    println!("CEX ARB - FEED TEST ({}s)", seconds);
    println!("======================================================================");

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let handler = Arc::new(PrintHandler {
        config: config.clone(),
        started: Instant::now(),
    });
    let (feeds, aggregator) = start_feeds(&config, handler, shutdown_rx)?;

    tokio::time::sleep(Duration::from_secs(seconds)).await;
    let _ = shutdown_tx.send(true);

    for feed in feeds {
        let _ = feed.await;
    }
    let _ = aggregator.await;

    println!("======================================================================");
    println!("FEED TEST COMPLETE");
    println!("======================================================================");
    Ok(())
}

/// Authenticated adapters for both venues, wrapped in retries.
fn live_registry(config: &Config) -> anyhow::Result<ExchangeRegistry> {
    let policy = config.retry_policy();
    Ok(ExchangeRegistry::new()
        .with(Arc::new(Retrying::new(BinanceClient::new(config)?, policy.clone())))
        .with(Arc::new(Retrying::new(KucoinClient::new(config)?, policy))))
}

/// Paper venues seeded with `paper_balance` of every quote currency.
fn paper_registry(config: &Config) -> ExchangeRegistry {
    let quotes: BTreeSet<String> = config
        .parsed_instruments()
        .iter()
        .map(|i| i.quote().to_string())
        .collect();

    let mut registry = ExchangeRegistry::new();
    for exchange in [Exchange::Binance, Exchange::Kucoin] {
        let paper = PaperExchange::new(exchange);
        for quote in &quotes {
            paper.deposit(quote, Wallet::Spot, config.paper_balance);
        }
        registry.register(Arc::new(paper));
    }
    registry
}

/// Spawn both ticker feeds and the aggregator feeding `handler`.
fn start_feeds<H: SnapshotHandler>(
    config: &Config,
    handler: Arc<H>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<(Vec<tokio::task::JoinHandle<()>>, tokio::task::JoinHandle<()>)> {
    let instruments = config.parsed_instruments();
    let http = build_http_client(Exchange::Kucoin, Duration::from_millis(config.http_timeout_ms))?;
    let (tx, rx) = mpsc::channel(1024);

    let binance = Arc::new(TickerFeed::with_reconnect_config(
        BinanceFeed::new(config.binance_ws_url.clone(), &instruments),
        config.reconnect_config(),
    ));
    let kucoin = Arc::new(TickerFeed::with_reconnect_config(
        KucoinFeed::new(http, config.kucoin_rest_url.clone(), &instruments),
        config.reconnect_config(),
    ));

    let feeds = vec![
        binance.spawn(instruments.clone(), tx.clone(), shutdown.clone()),
        kucoin.spawn(instruments, tx, shutdown),
    ];

    let aggregator = PriceAggregator::new(config.price_side).with_max_age(config.price_max_age());
    let aggregator = tokio::spawn(aggregator.run(rx, handler));

    Ok((feeds, aggregator))
}

/// Run the engine until a shutdown signal.
async fn cmd_run(dry_run_override: Option<bool>, port_override: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let config = load_config(dry_run_override, port_override)?;

    let prometheus = match metrics::install_prometheus() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
            None
        }
    };

    info!("Configuration loaded successfully");
    info!("Mode: {}", if config.dry_run { "PAPER" } else { "LIVE TRADING" });
    info!("Instruments: {}", config.instruments.join(", "));
    info!("Capital: {}", config.capital);

    let (registry, store): (ExchangeRegistry, Arc<dyn PositionStore>) = if config.dry_run {
        (paper_registry(&config), Arc::new(MemoryStore::new()))
    } else {
        (live_registry(&config)?, Arc::new(SqliteStore::open(&config.store_path)?))
    };

    let mut notifier = NotifierRegistry::new();
    notifier.register(Box::new(LogNotifier));
    if let Some(url) = &config.alert_webhook_url {
        let http = build_http_client(Exchange::Binance, Duration::from_millis(config.http_timeout_ms))?;
        notifier.register(Box::new(WebhookNotifier::new(http, url.clone())));
    }

    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        store,
        notifier,
        OrchestratorSettings::from_config(&config),
    ));

    match orchestrator.recover().await {
        Ok(state) => info!(state = %state, "Position state recovered"),
        Err(e) => error!(error = %e, "Recovery left the engine halted; openings blocked until resolved"),
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    // Start HTTP server
    let mut app_state = AppState::new()
        .with_orchestrator(orchestrator.clone())
        .with_dry_run(config.dry_run);
    if let Some(handle) = prometheus {
        app_state = app_state.with_prometheus(handle);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state.clone());
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { wait_for_shutdown(&mut server_shutdown).await })
            .await
    });

    let (feeds, aggregator) = start_feeds(&config, orchestrator.clone(), shutdown_rx)?;
    app_state.set_ready(true);

    info!("========================================");
    info!("CEX ARBITRAGE ENGINE STARTED");
    info!("========================================");

    shutdown_signal().await;
    app_state.set_ready(false);
    let _ = shutdown_tx.send(true);

    for feed in feeds {
        if let Err(e) = feed.await {
            warn!(error = %e, "Feed task ended abnormally");
        }
    }
    if let Err(e) = aggregator.await {
        warn!(error = %e, "Aggregator task ended abnormally");
    }
    info!("Waiting for in-flight orders and transfers");
    orchestrator.drain().await;
    match server.await {
        Ok(Err(e)) => warn!(error = %e, "HTTP server error"),
        Err(e) => warn!(error = %e, "HTTP server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    let status = orchestrator.status();
    info!("========================================");
    info!("SHUTDOWN SUMMARY");
    info!("========================================");
    info!("State: {}", status.state);
    info!("Opportunities: {}", status.stats.opportunities);
    info!("Opened: {}", status.stats.opened);
    info!("Closed: {}", status.stats.closed);
    info!("Unwound: {}", status.stats.unwound);
    if let Some(position) = status.position {
        info!(
            "Open position: {} {} at step {} (resumes on next start)",
            position.amount, position.coin, position.step
        );
    }
    info!("========================================");

    Ok(())
}
