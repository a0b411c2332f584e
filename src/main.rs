//! Renko Trader - Main Entry Point
//!
//! Paper trading by default; set `LIVE_TRADING=true` to send real orders.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use renko_trader::config::Config;
use renko_trader::exchange::{
    AccountService, BinanceClient, BinanceWebSocket, MarginType, MarketData, MockExchange,
    TradingMode,
};
use renko_trader::execution::{OrderGateway, SessionFactory};
use renko_trader::feed::FeedSupervisor;
use renko_trader::indicators::IndicatorEngine;
use renko_trader::pipeline::Pipeline;
use renko_trader::renko::BrickAggregator;
use renko_trader::replay::{replay, PriceSeries};
use renko_trader::strategy::StrategyMachine;
use renko_trader::utils::StopSignal;
use renko_trader::warmup::WarmupBootstrapper;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Paper account size when not trading live
const PAPER_BALANCE: Decimal = dec!(10000);

/// Renko Trader CLI
#[derive(Parser)]
#[command(name = "renko-trader")]
#[command(version, about = "Renko brick trend follower for Binance USD-M futures")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a CSV price series through bricks and indicators (no orders)
    Replay {
        /// Path to CSV data file
        #[arg(short, long)]
        data: String,

        /// Print one JSON object per brick instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show account balance and open position
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Replay { data, json }) => {
            return run_replay(&data, json);
        }
        Some(Commands::Status) => {
            return show_status().await;
        }
        None => {
            // Default: run trading mode
        }
    }

    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║              Renko Trader v{}                            ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let trading_mode = if std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
        warn!("⚠️  LIVE TRADING MODE - Real money at risk!");
        TradingMode::Live
    } else {
        info!("📝 MOCK TRADING MODE - Paper trading enabled");
        TradingMode::Mock
    };

    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;
    if trading_mode == TradingMode::Live {
        anyhow::ensure!(
            !config.binance.api_key.is_empty() && !config.binance.secret_key.is_empty(),
            "LIVE_TRADING requires BINANCE_API_KEY and BINANCE_SECRET_KEY"
        );
    }
    log_config(&config, trading_mode);

    let symbol = config.instrument.symbol.clone();
    let timeout = Duration::from_secs(config.execution.request_timeout_secs);

    let client = Arc::new(
        BinanceClient::new(&config.binance, timeout).context("Failed to create Binance client")?,
    );
    let market: Arc<dyn MarketData> = client.clone();

    if trading_mode == TradingMode::Live {
        setup_account(&client, &config).await;
    }

    // Session factory: live sessions are rebuilt from credentials, the paper
    // account is shared across renewals
    let mut paper: Option<Arc<MockExchange>> = None;
    let factory: SessionFactory = match trading_mode {
        TradingMode::Live => {
            let binance = config.binance.clone();
            Box::new(move || {
                let client = BinanceClient::new(&binance, timeout)?;
                Ok(Arc::new(client) as Arc<dyn AccountService>)
            })
        }
        TradingMode::Mock => {
            let exchange = Arc::new(MockExchange::new(PAPER_BALANCE).with_price_source(market.clone()));
            paper = Some(exchange.clone());
            Box::new(move || Ok(exchange.clone() as Arc<dyn AccountService>))
        }
    };

    let mut aggregator = BrickAggregator::new(config.bricks.box_size, config.bricks.reversal);
    let mut indicators = IndicatorEngine::from_config(&config.indicators);

    if config.warmup.enabled {
        let bootstrapper = WarmupBootstrapper::new(&symbol, &config.warmup);
        if let Err(e) = bootstrapper
            .prime(market.as_ref(), &mut aggregator, &mut indicators)
            .await
        {
            warn!(error = %e, "⚠️  [INIT] Warm-up failed, starting cold");
        }
    } else {
        info!("[INIT] Warm-up disabled, first live price seeds the bricks");
    }

    let gateway = OrderGateway::new(
        &symbol,
        &config.instrument.margin_asset,
        config.sizing.clone(),
        config.execution.clone(),
        factory,
    )
    .context("Failed to open trading session")?;

    let pipeline = Pipeline::new(
        aggregator,
        indicators,
        StrategyMachine::new(config.strategy.clone()),
        gateway,
    );

    let (tx, rx) = mpsc::channel(config.feed.channel_capacity);
    let pipeline_handle = tokio::spawn(pipeline.run(rx));

    // Shutdown signal
    let shutdown = StopSignal::new();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.trigger();
    });

    info!("🚀 Starting live feed...");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let supervisor = FeedSupervisor::new(
        &symbol,
        config.feed.clone(),
        BinanceWebSocket::new(config.binance.testnet),
        market.clone(),
    );
    supervisor.run(tx, shutdown).await;

    // All senders are gone once the supervisor returns; the pipeline drains and exits
    let pipeline = pipeline_handle.await.context("Pipeline task failed")?;
    let state = pipeline.strategy().state();
    info!(
        exposure = %state.exposure,
        quantity = %state.quantity,
        "Final strategy state"
    );
    if state.quantity > Decimal::ZERO {
        warn!("⚠️  Position still open on exit");
    }

    if let Some(exchange) = paper {
        let account = exchange.get_state().await;
        info!(
            "📊 Paper account: balance ${:.2} (start ${:.2}), realized PnL ${:.2}, fees ${:.2}, orders {}",
            account.balance,
            account.initial_balance,
            account.realized_pnl,
            account.total_trading_fees,
            account.order_count
        );
    }

    info!("👋 Renko Trader shutdown complete");
    Ok(())
}

/// Apply margin type and leverage once. Failures are not fatal.
async fn setup_account(client: &BinanceClient, config: &Config) {
    let symbol = &config.instrument.symbol;
    let margin_type = if config.instrument.cross_margin {
        MarginType::Cross
    } else {
        MarginType::Isolated
    };

    match client.set_margin_type(symbol, margin_type).await {
        Ok(()) => info!("✅ [INIT] Margin type set to {:?}", margin_type),
        Err(e) => warn!("⚠️  [INIT] Failed to set margin type: {}", e),
    }

    match client.set_leverage(symbol, config.instrument.leverage).await {
        Ok(()) => info!("✅ [INIT] Leverage set to {}x", config.instrument.leverage),
        Err(e) => warn!("⚠️  [INIT] Failed to set leverage: {}", e),
    }
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "renko-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("renko_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config, mode: TradingMode) {
    info!("📋 Configuration ({}):", mode);
    info!(
        "   Instrument: {} ({}x, {})",
        config.instrument.symbol,
        config.instrument.leverage,
        if config.instrument.cross_margin {
            "cross"
        } else {
            "isolated"
        }
    );
    info!(
        "   Bricks: box {} / reversal {}",
        config.bricks.box_size, config.bricks.reversal
    );
    info!(
        "   Indicators: EMA {}/{}, RSI {}",
        config.indicators.ema_fast, config.indicators.ema_slow, config.indicators.rsi_length
    );
    info!(
        "   RSI bands: long [{}, {}], short [{}, {}]",
        config.strategy.rsi_long_min,
        config.strategy.rsi_long_max,
        config.strategy.rsi_short_min,
        config.strategy.rsi_short_max
    );
    info!(
        "   Sizing: {:.0}% of free {}",
        config.sizing.balance_fraction * dec!(100),
        config.instrument.margin_asset
    );
    info!(
        "   Feed: mark price {}, stale after {}s, reconnect after {}s, fallback {}",
        config.feed.use_mark_price,
        config.feed.stale_after_secs,
        config.feed.reconnect_after_secs,
        config.feed.fallback_enabled
    );
    info!(
        "   Network: {}",
        if config.binance.testnet {
            "testnet"
        } else {
            "mainnet"
        }
    );
}

/// Show account balance and position for the configured instrument.
async fn show_status() -> Result<()> {
    let config = Config::load()?;
    anyhow::ensure!(
        !config.binance.api_key.is_empty() && !config.binance.secret_key.is_empty(),
        "status requires BINANCE_API_KEY and BINANCE_SECRET_KEY"
    );

    let timeout = Duration::from_secs(config.execution.request_timeout_secs);
    let client = BinanceClient::new(&config.binance, timeout)?;
    let symbol = &config.instrument.symbol;
    let asset = &config.instrument.margin_asset;

    let free = client
        .free_balance(asset)
        .await
        .context("Failed to fetch balance")?;
    let position = client
        .position(symbol)
        .await
        .context("Failed to fetch position")?;
    let price = client
        .current_price(symbol)
        .await
        .context("Failed to fetch price")?;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              RENKO TRADER STATUS                           ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    println!("\n📊 Account");
    println!("   └─ Free {}:  {:.2}", asset, free);

    println!("\n📈 {} @ {}", symbol, price);
    if position.size.is_zero() {
        println!("   └─ No open position");
    } else {
        let side = if position.size > Decimal::ZERO {
            "LONG"
        } else {
            "SHORT"
        };
        println!("   ├─ Side:           {}", side);
        println!("   ├─ Size:           {}", position.size.abs());
        println!("   ├─ Entry Price:    {}", position.entry_price);
        println!("   ├─ Mark Price:     {}", position.mark_price);
        println!("   └─ Unrealized PnL: {:.2}", position.unrealized_pnl);
    }

    Ok(())
}

/// Replay recorded prices through bricks and indicators.
fn run_replay(data_path: &str, json: bool) -> Result<()> {
    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;

    info!("📊 Loading data from: {}", data_path);
    let series = PriceSeries::load(data_path)?;
    info!("   Prices: {}", series.len());

    let report = replay(series.prices(), &config.bricks, &config.indicators);

    for entry in &report.bricks {
        if json {
            match serde_json::to_string(entry) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to encode brick {}: {}", entry.brick.id, e),
            }
        } else {
            let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v));
            println!(
                "{:<24} ema_fast {:>12} ema_slow {:>12} rsi {:>6}",
                entry.brick.to_string(),
                fmt(entry.snapshot.ema_fast),
                fmt(entry.snapshot.ema_slow),
                fmt(entry.snapshot.rsi)
            );
        }
    }

    println!("\n{}", report.summary());
    Ok(())
}
