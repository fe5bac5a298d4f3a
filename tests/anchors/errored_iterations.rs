use crate::anchor_utils::{faulty_orchestrator, participants, pinned_scenario, sim_config, sim_ledger, FaultyLedger};
use std::time::Duration;
use watchtower_harness::arbiter::OutcomeClass;
use watchtower_harness::experiment::IterationRecord;
use watchtower_harness::ledger::{tokens_to_wei, LedgerGateway, ViewQuery};
use watchtower_harness::report::render_csv;
use watchtower_harness::scenario::{AttackKind, DefenseAction};

fn second_iteration_wins(records: &[IterationRecord], action: DefenseAction) {
    match &records[1] {
        IterationRecord::Completed(done) => {
            assert_eq!(done.outcome.status, OutcomeClass::DefendedPriorityWin);
            assert_eq!(done.defense_action, Some(action));
            assert!(!done.restore_failed);
        }
        other => panic!("second iteration should complete: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_freeze_is_lifted_when_attack_confirmation_times_out() {
    let people = participants();
    let mut cfg = sim_config(&people);
    cfg.confirmation_timeout = Duration::from_secs(3);
    let sim = sim_ledger(cfg);
    let ledger = FaultyLedger::new(sim.clone()).hide_receipts(people.attacker.address(), "exploitMint", 1);
    let mut runner = faulty_orchestrator(ledger);
    let mut scenario = pinned_scenario(AttackKind::InfiniteMint, 60_000.0, 200, 2);
    scenario.defense_action = DefenseAction::WalletFreeze;

    let summary = runner.run(&scenario).await.expect("run");
    let records = runner.log().records();
    assert_eq!(records[0].status_label(), "ERRORED:submission_timeout");
    second_iteration_wins(records, DefenseAction::WalletFreeze);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.restore_failures, 0);
    assert_eq!(summary.trigger_rate_pct, 100.0);
    assert_eq!(summary.status_counts.get("ERRORED:ledger"), None);
}

#[tokio::test(start_paused = true)]
async fn test_defense_timeout_errors_only_its_iteration() {
    let people = participants();
    let mut cfg = sim_config(&people);
    cfg.confirmation_timeout = Duration::from_secs(3);
    let sim = sim_ledger(cfg);
    let ledger = FaultyLedger::new(sim.clone()).hide_receipts(
        people.watchtower.address(),
        "pauseByWatchtower",
        1,
    );
    let mut runner = faulty_orchestrator(ledger);
    let scenario = pinned_scenario(AttackKind::InfiniteMint, 60_000.0, 200, 2);

    let summary = runner.run(&scenario).await.expect("run");
    let records = runner.log().records();
    assert_eq!(records[0].status_label(), "ERRORED:submission_timeout");
    second_iteration_wins(records, DefenseAction::Pause);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.trigger_rate_pct, 100.0);
    assert_eq!(summary.success_rate_pct, 100.0);
    assert_eq!(summary.restore_failures, 0);

    let csv = render_csv(runner.log());
    assert_eq!(
        csv.lines().nth(1),
        Some("1,infinite_mint,60000.00,50000,,false,,0,ERRORED:submission_timeout")
    );
    // The hidden pause still mined; both pauses were resumed.
    assert!(!sim.is_paused().await.unwrap());
    assert_eq!(sim.get_nonce(people.watchtower.address()).await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_twice_stale_pause_exports_wasted_gas() {
    let people = participants();
    let sim = sim_ledger(sim_config(&people));
    let ledger = FaultyLedger::new(sim.clone()).skew_nonce_reads(2);
    let mut runner = faulty_orchestrator(ledger);
    let scenario = pinned_scenario(AttackKind::InfiniteMint, 60_000.0, 200, 2);

    let summary = runner.run(&scenario).await.expect("run");
    let records = runner.log().records();
    assert_eq!(records[0].status_label(), "ERRORED:stale_nonce");
    second_iteration_wins(records, DefenseAction::Pause);

    let csv = render_csv(runner.log());
    assert_eq!(
        csv.lines().nth(1),
        Some("1,infinite_mint,60000.00,50000,,false,,47600,ERRORED:stale_nonce")
    );
    assert_eq!(summary.mean_gas_cost, 54_210.0);
    assert_eq!(summary.trigger_rate_pct, 100.0);
    assert_eq!(sim.get_nonce(people.watchtower.address()).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_errored_flash_loan_is_still_repaid() {
    let people = participants();
    let mut cfg = sim_config(&people);
    cfg.confirmation_timeout = Duration::from_secs(3);
    let sim = sim_ledger(cfg);
    let ledger = FaultyLedger::new(sim.clone()).hide_receipts(people.attacker.address(), "simulateDump", 1);
    let mut runner = faulty_orchestrator(ledger);
    let scenario = pinned_scenario(AttackKind::FlashLoanDepeg, 60_000.0, 200, 1);

    runner.run(&scenario).await.expect("run");
    let records = runner.log().records();
    assert_eq!(records[0].status_label(), "ERRORED:submission_timeout");
    assert_eq!(
        sim.call_view(ViewQuery::BalanceOf(people.attacker.address()))
            .await
            .unwrap(),
        tokens_to_wei(0.0)
    );
    assert_eq!(
        sim.call_view(ViewQuery::BalanceOf(people.lender.address()))
            .await
            .unwrap(),
        tokens_to_wei(10_000_000.0)
    );
    assert!(!sim.is_paused().await.unwrap());
}
