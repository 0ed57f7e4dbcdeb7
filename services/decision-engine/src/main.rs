//! Decision Engine - evaluate one webhook payload
//!
//! 1. Loads thresholds and provider credentials from the environment
//! 2. Wires whichever market data clients have credentials
//! 3. Runs the payload through the decision pipeline
//! 4. Prints the result as JSON

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use decision_engine::{
    Collaborators, DecisionPipeline, EngineConfig, EngineError, InMemoryStore, ProcessContext,
    ProviderCredentials,
};
use market_data::{AlpacaClient, TradierClient, TwelveDataClient};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let level = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|l| l.parse::<tracing::Level>().ok())
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Decision Engine...");

    let config = EngineConfig::load()?;
    let summary = config.summary();
    info!(
        strategy = ?summary.strategy,
        signal_max_age_ms = summary.signal_max_age_ms,
        daily_trade_limit = summary.daily_trade_limit,
        min_confluence_scanner = summary.min_confluence_scanner,
        min_confluence_full = summary.min_confluence_full,
        enable_auto_trading = summary.enable_auto_trading,
        min_buying_power = summary.min_buying_power,
        "Configuration loaded"
    );

    let credentials = ProviderCredentials::from_env()?;
    let collaborators = build_collaborators(&config, &credentials)?;

    let pipeline = DecisionPipeline::new(config, collaborators, Arc::new(InMemoryStore::new()))?;
    for health in pipeline.source_health() {
        info!(source = %health.source, healthy = health.is_healthy, "Collaborator ready");
    }

    let raw = read_payload(std::env::args().nth(1).map(PathBuf::from))?;
    let payload: serde_json::Value = serde_json::from_str(&raw).context("payload is not valid JSON")?;

    match pipeline.process_webhook(&payload, ProcessContext::default()).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(EngineError::UnrecognizedPayload(reason)) => {
            error!(%reason, "Unrecognized payload");
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}

/// Only providers with credentials are wired in
fn build_collaborators(config: &EngineConfig, creds: &ProviderCredentials) -> anyhow::Result<Collaborators> {
    let timeout = config.collaborator_timeout();
    let mut collaborators = Collaborators::new();

    match &creds.tradier_api_key {
        Some(key) => {
            let tradier = Arc::new(
                TradierClient::new(key.clone(), creds.tradier_account_id.clone(), creds.tradier_base_url.clone())?
                    .with_timeout(timeout)
                    .with_expiration_window(config.min_dte, config.max_dte, config.max_expirations),
            );
            let probe = tradier.clone();
            collaborators = collaborators
                .with_primary_quote(tradier.clone())
                .with_option_chain(tradier.clone())
                .with_health_probe(Arc::new(move || probe.health()));
            if creds.tradier_account_id.is_some() {
                collaborators = collaborators
                    .with_account(tradier.clone())
                    .with_brokerage(tradier);
            } else {
                warn!("TRADIER_ACCOUNT_ID not set, balances/positions/orders disabled");
            }
            info!("Tradier enabled");
        }
        None => warn!("TRADIER_API_KEY not set, quotes/options disabled"),
    }

    match &creds.twelvedata_api_key {
        Some(key) => {
            let twelvedata = Arc::new(TwelveDataClient::new(key.clone())?.with_timeout(timeout));
            let probe = twelvedata.clone();
            collaborators = collaborators
                .with_indicators(twelvedata)
                .with_health_probe(Arc::new(move || probe.health()));
            info!("TwelveData enabled");
        }
        None => warn!("TWELVEDATA_API_KEY not set, indicators disabled"),
    }

    match (&creds.alpaca_api_key, &creds.alpaca_secret_key) {
        (Some(key), Some(secret)) => {
            let alpaca = Arc::new(
                AlpacaClient::new(key.clone(), secret.clone())?
                    .with_urls(creds.alpaca_base_url.clone(), creds.alpaca_data_url.clone())
                    .with_timeout(timeout),
            );
            let probe = alpaca.clone();
            collaborators = collaborators
                .with_market_clock(alpaca.clone())
                .with_secondary_quote(alpaca)
                .with_health_probe(Arc::new(move || probe.health()));
            info!("Alpaca enabled");
        }
        _ => warn!("ALPACA_API_KEY/ALPACA_SECRET_KEY not set, market clock disabled"),
    }

    Ok(collaborators)
}

fn read_payload(path: Option<PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
            Ok(buf)
        }
    }
}
