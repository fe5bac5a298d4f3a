use crate::anchor_utils::{orchestrator, participants, pinned_scenario, sim_config, sim_ledger};
use std::fs;
use watchtower_harness::defense::FeePolicy;
use watchtower_harness::report::{write_exports, CSV_HEADER};
use watchtower_harness::scenario::AttackKind;

#[tokio::test(start_paused = true)]
async fn test_run_exports_csv_and_summary() {
    let people = participants();
    let ledger = sim_ledger(sim_config(&people));
    let mut runner = orchestrator(ledger, FeePolicy::default());
    let scenario = pinned_scenario(AttackKind::InfiniteMint, 60_000.0, 200, 2);
    let summary = runner.run(&scenario).await.expect("run");

    let dir = tempfile::tempdir().unwrap();
    let paths = write_exports(dir.path(), "experiment_infinite_mint_test", runner.log(), &summary)
        .expect("exports");
    assert!(paths.csv.ends_with("experiment_infinite_mint_test.csv"));
    assert!(paths.summary.ends_with("experiment_infinite_mint_test_summary.json"));

    let csv = fs::read_to_string(&paths.csv).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[1],
        "1,infinite_mint,60000.00,50000,true,true,0,54210,DEFENDED_PRIORITY_WIN"
    );
    assert!(lines[2].starts_with("2,infinite_mint,"));

    let json: serde_json::Value = serde_json::from_slice(&fs::read(&paths.summary).unwrap()).unwrap();
    assert_eq!(json["total"], 2);
    assert_eq!(json["triggered"], 2);
    assert_eq!(json["success_rate_pct"], 100.0);
    assert_eq!(json["status_counts"]["DEFENDED_PRIORITY_WIN"], 2);
}
