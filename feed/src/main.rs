//! Ratefeed
//!
//! Command-line host for the fiat rate feed: polls the selected source once a
//! second and prints the converted amount whenever quotes change.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratefeed_common::{constants, Currency, COIN};
use ratefeed_fx::{
    keys, BroadcastNotifier, ConfigStore, FxEvent, FxSettings, HttpFetcher, JsonFileConfig,
    MemoryConfig, RateCoordinator, SourceCatalog, SourceRegistry, ASSET,
};

/// Ratefeed CLI
#[derive(Parser, Debug)]
#[command(name = "ratefeed")]
#[command(about = "Fiat exchange-rate feed for LBTC")]
struct Args {
    /// Wallet config file (JSON object); in-memory when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Capability cache file
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll a source and print converted amounts (default)
    Watch(WatchArgs),
    /// List currencies offered by at least one source
    Currencies {
        /// Only currencies with historical rates
        #[arg(long)]
        history: bool,
    },
    /// List sources, optionally only those quoting a currency
    Sources {
        /// Currency to filter by
        #[arg(long)]
        currency: Option<String>,
        /// Only sources with historical rates for the currency
        #[arg(long)]
        history: bool,
    },
}

#[derive(clap::Args, Debug, Default)]
struct WatchArgs {
    /// Source name
    #[arg(short, long)]
    source: Option<String>,

    /// Fiat currency code
    #[arg(short, long)]
    currency: Option<String>,

    /// Amount of LBTC to value
    #[arg(short, long, default_value = "1")]
    amount: Decimal,

    /// Enable historical rates
    #[arg(long)]
    history: bool,

    /// Day to value the amount at (YYYY-MM-DD), needs --history
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Print Prometheus metrics on exit
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json);

    let mut settings = FxSettings::from_env();
    if let Some(cache) = &args.cache {
        settings.cache_path = cache.clone();
    }
    if let Err(e) = settings.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let http = HttpFetcher::new(settings.http_timeout, &settings.user_agent)?;
    let catalog = Arc::new(SourceCatalog::builtin(http, settings.fanout_concurrency));
    let registry = Arc::new(SourceRegistry::new(catalog, settings.cache_path.clone()));

    let config: Arc<dyn ConfigStore> = match &args.config {
        Some(path) => Arc::new(
            JsonFileConfig::open(path)
                .with_context(|| format!("opening config {}", path.display()))?,
        ),
        None => Arc::new(MemoryConfig::new()),
    };

    let command = args.command.unwrap_or_else(|| {
        Command::Watch(WatchArgs {
            amount: Decimal::ONE,
            ..WatchArgs::default()
        })
    });
    match command {
        Command::Watch(watch_args) => watch(registry, config, settings, watch_args).await,
        Command::Currencies { history } => {
            registry.load_or_build().await;
            for currency in registry.currencies(history) {
                println!("{}", currency);
            }
            Ok(())
        }
        Command::Sources { currency, history } => {
            let capabilities = registry.load_or_build().await;
            match currency {
                Some(code) => {
                    for name in registry.sources_supporting(&Currency::new(code), history) {
                        println!("{}", name);
                    }
                }
                None => {
                    for (name, currencies) in capabilities {
                        println!("{:<18} {} currencies", name, currencies.len());
                    }
                }
            }
            Ok(())
        }
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn watch(
    registry: Arc<SourceRegistry>,
    config: Arc<dyn ConfigStore>,
    settings: FxSettings,
    args: WatchArgs,
) -> anyhow::Result<()> {
    config.set_key(keys::USE_EXCHANGE_RATE, Value::from(true), false)?;
    if args.history {
        config.set_key(keys::HISTORY_RATES, Value::from(true), false)?;
    }

    let units = (args.amount * Decimal::from(COIN))
        .trunc()
        .to_i64()
        .context("amount out of range")?;

    let notifier = Arc::new(BroadcastNotifier::default());
    let mut events = notifier.subscribe();
    let coordinator = RateCoordinator::new(registry, config, settings)?.with_notifier(notifier);

    if let Some(source) = &args.source {
        coordinator.set_source(source)?;
    }
    if let Some(currency) = &args.currency {
        coordinator.set_currency(currency)?;
    }
    coordinator.start()?;

    info!(
        source = %coordinator.source_name(),
        currency = %coordinator.currency(),
        "Watching rates, press Ctrl+C to stop"
    );

    let mut ticker = tokio::time::interval(constants::tick_interval().to_std()?);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let limited = args.duration > 0;
    let deadline = tokio::time::sleep(std::time::Duration::from_secs(args.duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                coordinator.tick();
            }
            event = events.recv() => match event {
                Ok(FxEvent::Quotes) => {
                    if coordinator.current_rate().is_some() {
                        println!(
                            "{} {} = {}{}",
                            args.amount,
                            ASSET,
                            coordinator.format_amount_and_units(Some(units)),
                            coordinator.fiat_status_text(ASSET, 8),
                        );
                    }
                }
                Ok(FxEvent::History) => {
                    if let Some(date) = args.date {
                        println!(
                            "{} {} on {} = {} {}",
                            args.amount,
                            ASSET,
                            date,
                            coordinator.historical_value_str(Some(units), date),
                            coordinator.currency(),
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dropped rate events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut deadline, if limited => break,
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if coordinator.take_history_used_spot() {
        info!("Some historical values used the spot rate");
    }
    if args.metrics {
        print!("{}", coordinator.metrics().to_prometheus());
    }
    Ok(())
}
