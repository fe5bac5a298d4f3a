use std::time::Duration;
use watchtower_harness::arbiter::{OutcomeClass, RaceOutcome};
use watchtower_harness::experiment::{
    CompletedIteration, ErroredIteration, ExperimentLog, ExperimentSummary, IterationRecord,
};
use watchtower_harness::scenario::{AttackAttempt, AttackKind, DefenseAction, Detection};

fn record(iteration: u32, triggered: bool, status: OutcomeClass) -> IterationRecord {
    IterationRecord::Completed(CompletedIteration {
        iteration,
        attack_kind: AttackKind::InfiniteMint,
        threshold: 50_000.0,
        attempt: AttackAttempt {
            magnitude: if triggered { 80_000.0 } else { 20_000.0 },
            fee_multiplier: 1.0,
            simulated_gas_price: 1_000_000_000,
            simulated_latency: Duration::from_millis(250),
        },
        detection: Detection {
            metric: if triggered { 80_000.0 } else { 20_000.0 },
            triggered,
        },
        outcome: RaceOutcome {
            triggered,
            defended: status.is_success(),
            attack_block: 100 + iteration as u64,
            attack_tx_index: Some(1),
            defense_block: triggered.then_some(100 + iteration as u64),
            defense_tx_index: triggered.then_some(0),
            status,
            gas_cost: if triggered { 60_000 } else { 0 },
        },
        defense_action: triggered.then_some(DefenseAction::Pause),
        defense_latency: triggered.then(|| Duration::from_millis(300)),
        restore_failed: false,
    })
}

#[test]
fn test_ten_iterations_six_triggered_five_defended() {
    let mut log = ExperimentLog::new();
    for iteration in 1..=5 {
        log.append(record(iteration, true, OutcomeClass::DefendedPriorityWin));
    }
    log.append(record(6, true, OutcomeClass::FailedPriorityLoss));
    for iteration in 7..=10 {
        log.append(record(iteration, false, OutcomeClass::UndetectedAttackSucceeded));
    }

    let summary = ExperimentSummary::from_log(&log, AttackKind::InfiniteMint, DefenseAction::Pause, 0);
    assert_eq!(summary.total, 10);
    assert_eq!(summary.triggered, 6);
    assert_eq!(summary.successful_triggered, 5);
    assert!((summary.trigger_rate_pct - 60.0).abs() < 1e-9);
    assert!((summary.success_rate_pct - 500.0 / 6.0).abs() < 1e-9);
    assert_eq!(summary.mean_gas_cost, 60_000.0);
    assert_eq!(summary.mean_defense_latency_ms, 300.0);

    let rendered = summary.to_string();
    assert!(rendered.contains("trigger rate 60.0%"));
    assert!(rendered.contains("defense success rate 83.3%"));
}

#[test]
fn test_errored_iterations_are_counted_but_not_rated() {
    let mut log = ExperimentLog::new();
    log.append(record(1, true, OutcomeClass::DefendedFrontRun));
    log.append(IterationRecord::Errored(ErroredIteration {
        iteration: 2,
        attack_kind: AttackKind::InfiniteMint,
        threshold: 50_000.0,
        magnitude: Some(70_000.0),
        gas_cost: 47_600,
        kind: "stale_nonce",
        message: "pause nonce moved twice".to_string(),
    }));

    let summary = ExperimentSummary::from_log(&log, AttackKind::InfiniteMint, DefenseAction::Pause, 0);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.trigger_rate_pct, 100.0);
    assert_eq!(summary.success_rate_pct, 100.0);
    assert_eq!(summary.status_counts.get("ERRORED:stale_nonce"), Some(&1));
    // Gas wasted by the errored iteration stays out of the mean.
    assert_eq!(summary.mean_gas_cost, 60_000.0);
    assert_eq!(summary.status_counts.get("DEFENDED_FRONT_RUN"), Some(&1));
}

#[test]
fn test_nothing_triggered_reports_zero_success_rate() {
    let mut log = ExperimentLog::new();
    for iteration in 1..=3 {
        log.append(record(iteration, false, OutcomeClass::UndetectedAttackSucceeded));
    }
    let summary = ExperimentSummary::from_log(&log, AttackKind::InfiniteMint, DefenseAction::Pause, 0);
    assert_eq!(summary.trigger_rate_pct, 0.0);
    assert_eq!(summary.success_rate_pct, 0.0);
    assert_eq!(summary.mean_gas_cost, 0.0);
    assert_eq!(summary.mean_defense_latency_ms, 0.0);
}
