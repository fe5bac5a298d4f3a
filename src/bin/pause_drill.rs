//! Sign, pause, resume, replay. Exits non-zero when the contract accepts a replayed signature.

use anyhow::Context;
use std::sync::Arc;
use watchtower_harness::drill::run_pause_drill;
use watchtower_harness::ledger::rpc::RpcLedger;
use watchtower_harness::ledger::sim::SimulatedLedger;
use watchtower_harness::ledger::LedgerGateway;
use watchtower_harness::utils::config::{Config, LedgerMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    watchtower_harness::utils::env_guard::harden_env_setup();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().context("loading harness configuration")?;
    let people = config.participants()?;
    let ledger: Arc<dyn LedgerGateway> = match config.ledger_mode {
        LedgerMode::Offline => Arc::new(SimulatedLedger::new(config.sim_config(&people))),
        LedgerMode::Rpc => Arc::new(RpcLedger::connect(config.rpc_config()?).await?),
    };

    let report = run_pause_drill(
        ledger.as_ref(),
        &people.watchtower,
        &people.owner,
        &people.owner,
        config.fee_policy,
    )
    .await
    .context("pause drill failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.passed() {
        anyhow::bail!("pause drill did not hold: {report:?}");
    }
    Ok(())
}
