use crate::anchor_utils::{participants, sim_config, sim_ledger};
use watchtower_harness::defense::{submit_defense, FeePolicy};
use watchtower_harness::drill::run_pause_drill;
use watchtower_harness::error::{HarnessError, SubmissionError};
use watchtower_harness::ledger::LedgerGateway;
use watchtower_harness::signer::{accepts_pause, sign_pause, Identity};

#[tokio::test(start_paused = true)]
async fn test_drill_refuses_replayed_signature() {
    let people = participants();
    let ledger = sim_ledger(sim_config(&people));

    let report = run_pause_drill(
        &*ledger,
        &people.watchtower,
        &people.owner,
        &people.owner,
        FeePolicy::default(),
    )
    .await
    .expect("drill");

    assert!(report.passed(), "{report:?}");
    assert_eq!(report.nonce_before, 0);
    assert_eq!(report.nonce_after, 1);
    assert!(report.paused_after_pause);
    assert!(!report.paused_after_resume);
    assert!(report.replay_rejected);
    assert!(!ledger.is_paused().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_drill_needs_a_live_contract() {
    let people = participants();
    let ledger = sim_ledger(sim_config(&people));
    let chain_id = ledger.chain_id().await.unwrap();
    let signed = sign_pause(chain_id, ledger.contracts().token, 0, &people.watchtower).unwrap();
    submit_defense(&*ledger, &signed, &people.watchtower, FeePolicy::default())
        .await
        .expect("first pause lands");

    let err = run_pause_drill(
        &*ledger,
        &people.watchtower,
        &people.owner,
        &people.owner,
        FeePolicy::default(),
    )
    .await
    .expect_err("already paused");
    assert!(matches!(err, HarnessError::StatePrecondition(_)));
    assert_eq!(err.kind(), "state_precondition");
}

#[tokio::test(start_paused = true)]
async fn test_signature_from_wrong_key_is_stale_not_accepted() {
    let people = participants();
    let ledger = sim_ledger(sim_config(&people));
    let chain_id = ledger.chain_id().await.unwrap();
    let impostor = Identity::random("impostor");
    let forged = sign_pause(chain_id, ledger.contracts().token, 0, &impostor).unwrap();

    let err = submit_defense(&*ledger, &forged, &impostor, FeePolicy::default())
        .await
        .expect_err("only the watchtower key may pause");
    assert!(matches!(err, SubmissionError::StaleNonce { nonce: 0, .. }));
    assert!(!ledger.is_paused().await.unwrap());
    assert_eq!(ledger.get_nonce(people.watchtower.address()).await.unwrap(), 0);
}

#[test]
fn test_authorization_binds_chain_contract_and_nonce() {
    let people = participants();
    let sim = sim_config(&people);
    let token = sim.contracts.token;
    let signed = sign_pause(sim.chain_id, token, 4, &people.watchtower).unwrap();
    let signature = signed.signature();

    assert!(accepts_pause(sim.chain_id, token, 4, people.watchtower.address(), signature));
    assert!(!accepts_pause(sim.chain_id, token, 5, people.watchtower.address(), signature));
    assert!(!accepts_pause(1, token, 4, people.watchtower.address(), signature));
    assert!(!accepts_pause(sim.chain_id, sim.contracts.vault, 4, people.watchtower.address(), signature));
    assert!(!accepts_pause(sim.chain_id, token, 4, people.attacker.address(), signature));
    assert!(signed.verify_for(4, people.watchtower.address()));
}
