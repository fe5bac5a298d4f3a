use anyhow::Context;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use watchtower_harness::experiment::Orchestrator;
use watchtower_harness::ledger::rpc::RpcLedger;
use watchtower_harness::ledger::sim::SimulatedLedger;
use watchtower_harness::ledger::LedgerGateway;
use watchtower_harness::report::write_exports;
use watchtower_harness::utils::config::{Config, LedgerMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    watchtower_harness::utils::env_guard::harden_env_setup();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        eprintln!("[STARTUP] RUST_LOG invalid or unset; defaulting to 'info'");
        tracing_subscriber::EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().context("loading harness configuration")?;
    let participants = config.participants().context("parsing identity keys")?;

    let ledger: Arc<dyn LedgerGateway> = match config.ledger_mode {
        LedgerMode::Offline => {
            tracing::info!("[STARTUP] offline ledger (block time {:?})", config.offline.block_time);
            Arc::new(SimulatedLedger::new(config.sim_config(&participants)))
        }
        LedgerMode::Rpc => {
            let rpc = config.rpc_config()?;
            Arc::new(
                RpcLedger::connect(rpc)
                    .await
                    .with_context(|| format!("connecting to {}", config.eth_rpc_url))?,
            )
        }
    };
    tracing::info!(
        "[STARTUP] watchtower={:#x} attacker={:#x} owner={:#x}",
        participants.watchtower.address(),
        participants.attacker.address(),
        participants.owner.address()
    );

    let scenario = config.scenario.clone();
    let mut orchestrator = Orchestrator::new(ledger, participants, config.fee_policy);
    let summary = orchestrator
        .run(&scenario)
        .await
        .context("experiment run aborted")?;

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let stem = format!("experiment_{}_{}", scenario.attack_kind.as_str(), stamp);
    let paths = write_exports(&config.export_dir, &stem, orchestrator.log(), &summary)
        .context("writing experiment exports")?;

    println!("{summary}");
    println!("csv: {}", paths.csv.display());
    println!("summary: {}", paths.summary.display());
    Ok(())
}
