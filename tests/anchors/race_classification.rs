use watchtower_harness::arbiter::{
    arbitrate, classify, AttackSettlement, AttackStatus, Inclusion, OutcomeClass, RaceInput,
};
use watchtower_harness::error::ArbiterError;
use watchtower_harness::scenario::{AttackKind, DetectionContext};

fn included(block: u64, index: u64, status: AttackStatus) -> AttackSettlement {
    AttackSettlement::Included {
        at: Inclusion::new(block, index),
        status,
    }
}

#[test]
fn test_mint_over_threshold_paused_a_block_early() {
    let detection = AttackKind::InfiniteMint.detect(60_000.0, 50_000.0, &DetectionContext::default());
    assert!(detection.triggered);

    let input = RaceInput {
        triggered: detection.triggered,
        attack: included(15, 0, AttackStatus::RevertedOther),
        defense: Some(Inclusion::new(14, 2)),
    };
    let outcome = arbitrate(&input, 54_210).unwrap();
    assert_eq!(outcome.status, OutcomeClass::DefendedFrontRun);
    assert!(outcome.defended);
    assert_eq!(outcome.block_diff(), Some(-1));
}

#[test]
fn test_mint_under_threshold_stopped_by_rate_limit() {
    let detection = AttackKind::InfiniteMint.detect(30_000.0, 50_000.0, &DetectionContext::default());
    assert!(!detection.triggered);

    let input = RaceInput {
        triggered: detection.triggered,
        attack: AttackSettlement::RejectedByBackstop { observed_block: 31 },
        defense: None,
    };
    let outcome = arbitrate(&input, 0).unwrap();
    assert_eq!(outcome.status, OutcomeClass::DefendedByBackstop);
    assert!(outcome.defended);
    assert_eq!(outcome.block_diff(), Some(0));
    assert_eq!(outcome.gas_cost, 0);
}

#[test]
fn test_same_block_defense_behind_attack_loses() {
    let input = RaceInput {
        triggered: true,
        attack: included(42, 1, AttackStatus::Succeeded),
        defense: Some(Inclusion::new(42, 3)),
    };
    let outcome = arbitrate(&input, 54_210).unwrap();
    assert_eq!(outcome.status, OutcomeClass::FailedPriorityLoss);
    assert!(!outcome.defended);
    assert_eq!(outcome.block_diff(), Some(0));
}

#[test]
fn test_same_block_defense_ahead_of_attack_wins() {
    let input = RaceInput {
        triggered: true,
        attack: included(42, 3, AttackStatus::RevertedOther),
        defense: Some(Inclusion::new(42, 1)),
    };
    assert_eq!(classify(&input).unwrap(), OutcomeClass::DefendedPriorityWin);
}

#[test]
fn test_inconsistent_races_are_refused() {
    let shared = RaceInput {
        triggered: true,
        attack: included(7, 2, AttackStatus::Succeeded),
        defense: Some(Inclusion::new(7, 2)),
    };
    assert!(matches!(
        classify(&shared),
        Err(ArbiterError::DuplicateInclusion { block: 7, index: 2 })
    ));

    let missing = RaceInput {
        triggered: true,
        attack: included(7, 2, AttackStatus::Succeeded),
        defense: None,
    };
    assert!(matches!(classify(&missing), Err(ArbiterError::MissingDefense)));

    let unexpected = RaceInput {
        triggered: false,
        attack: included(7, 2, AttackStatus::Succeeded),
        defense: Some(Inclusion::new(6, 0)),
    };
    assert!(matches!(classify(&unexpected), Err(ArbiterError::UnexpectedDefense)));
}

#[test]
fn test_every_class_has_a_stable_label() {
    let labels: Vec<&str> = OutcomeClass::ALL.iter().map(|class| class.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            "DEFENDED_BY_BACKSTOP",
            "UNDETECTED_ATTACK_SUCCEEDED",
            "DEFENDED_FRONT_RUN",
            "DEFENDED_PRIORITY_WIN",
            "FAILED_PRIORITY_LOSS",
            "DEFENDED_LATE_BACKSTOP",
            "FAILED_LATE",
            "ATTACK_REVERTED_UNATTRIBUTED",
        ]
    );
    for class in OutcomeClass::ALL {
        assert_eq!(class.is_success(), class.as_str().starts_with("DEFENDED_"));
        let json = serde_json::to_string(&class).unwrap();
        assert_eq!(json, format!("\"{}\"", class.as_str()));
    }
}
