use crate::anchor_utils::{orchestrator, participants, sim_config, sim_ledger};
use watchtower_harness::defense::FeePolicy;
use watchtower_harness::report::render_csv;
use watchtower_harness::scenario::{AttackKind, ScenarioConfig, ScenarioGenerator};

fn seeded(kind: AttackKind, seed: u64) -> ScenarioConfig {
    let mut scenario = ScenarioConfig::new(kind);
    scenario.iterations = 6;
    scenario.seed = Some(seed);
    scenario
}

async fn run_fresh(scenario: &ScenarioConfig) -> (Vec<String>, String) {
    let people = participants();
    let ledger = sim_ledger(sim_config(&people));
    let mut runner = orchestrator(ledger, FeePolicy::default());
    runner.run(scenario).await.expect("run");
    (runner.log().outcome_labels(), render_csv(runner.log()))
}

#[tokio::test(start_paused = true)]
async fn test_same_seed_same_outcomes() {
    let scenario = seeded(AttackKind::InfiniteMint, 2024);
    let (first_labels, first_csv) = run_fresh(&scenario).await;
    let (second_labels, second_csv) = run_fresh(&scenario).await;
    assert_eq!(first_labels.len(), 6);
    assert_eq!(first_labels, second_labels);
    assert_eq!(first_csv, second_csv);
}

#[tokio::test(start_paused = true)]
async fn test_seeded_flash_loan_runs_repeat() {
    let scenario = seeded(AttackKind::FlashLoanDepeg, 99);
    let (first, _) = run_fresh(&scenario).await;
    let (second, _) = run_fresh(&scenario).await;
    assert_eq!(first, second);
    assert!(first.iter().all(|label| !label.starts_with("ERRORED")), "{first:?}");
}

#[test]
fn test_generator_draws_are_reproducible_and_bounded() {
    let scenario = seeded(AttackKind::VaultDrain, 11);
    let mut a = ScenarioGenerator::new(&scenario);
    let mut b = ScenarioGenerator::new(&scenario);
    let market_fee = 1_000_000_000u128;
    for _ in 0..200 {
        let left = a.next_attempt(market_fee);
        let right = b.next_attempt(market_fee);
        assert_eq!(left, right);
        assert!(left.magnitude >= scenario.magnitude_range.0);
        assert!(left.magnitude <= scenario.magnitude_range.1);
        assert!(left.simulated_gas_price >= market_fee * 8 / 10);
        assert!(left.simulated_gas_price <= market_fee * 12 / 10);
        let latency = left.simulated_latency.as_millis() as u64;
        assert!(latency >= scenario.latency_range_ms.0 && latency <= scenario.latency_range_ms.1);
    }
}
