//! Race classification. Pure: the same inputs always give the same outcome.

use crate::error::ArbiterError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeClass {
    DefendedByBackstop,
    UndetectedAttackSucceeded,
    DefendedFrontRun,
    DefendedPriorityWin,
    FailedPriorityLoss,
    DefendedLateBackstop,
    FailedLate,
    AttackRevertedUnattributed,
}

impl OutcomeClass {
    pub const ALL: [OutcomeClass; 8] = [
        OutcomeClass::DefendedByBackstop,
        OutcomeClass::UndetectedAttackSucceeded,
        OutcomeClass::DefendedFrontRun,
        OutcomeClass::DefendedPriorityWin,
        OutcomeClass::FailedPriorityLoss,
        OutcomeClass::DefendedLateBackstop,
        OutcomeClass::FailedLate,
        OutcomeClass::AttackRevertedUnattributed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeClass::DefendedByBackstop => "DEFENDED_BY_BACKSTOP",
            OutcomeClass::UndetectedAttackSucceeded => "UNDETECTED_ATTACK_SUCCEEDED",
            OutcomeClass::DefendedFrontRun => "DEFENDED_FRONT_RUN",
            OutcomeClass::DefendedPriorityWin => "DEFENDED_PRIORITY_WIN",
            OutcomeClass::FailedPriorityLoss => "FAILED_PRIORITY_LOSS",
            OutcomeClass::DefendedLateBackstop => "DEFENDED_LATE_BACKSTOP",
            OutcomeClass::FailedLate => "FAILED_LATE",
            OutcomeClass::AttackRevertedUnattributed => "ATTACK_REVERTED_UNATTRIBUTED",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            OutcomeClass::DefendedByBackstop
                | OutcomeClass::DefendedFrontRun
                | OutcomeClass::DefendedPriorityWin
                | OutcomeClass::DefendedLateBackstop
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AttackStatus {
    Succeeded,
    RevertedByBackstop,
    /// Reverted for any other reason (paused, blacklisted, unknown).
    RevertedOther,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Inclusion {
    pub block: u64,
    pub index: u64,
}

impl Inclusion {
    pub fn new(block: u64, index: u64) -> Self {
        Self { block, index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttackSettlement {
    Included {
        at: Inclusion,
        status: AttackStatus,
    },
    /// Refused before inclusion with a backstop reason; never mined.
    RejectedByBackstop { observed_block: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RaceInput {
    pub triggered: bool,
    pub attack: AttackSettlement,
    pub defense: Option<Inclusion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RaceOutcome {
    pub triggered: bool,
    pub defended: bool,
    pub attack_block: u64,
    pub attack_tx_index: Option<u64>,
    pub defense_block: Option<u64>,
    pub defense_tx_index: Option<u64>,
    pub status: OutcomeClass,
    /// Gas units spent by the watchtower side; zero when it never submitted.
    pub gas_cost: u64,
}

impl RaceOutcome {
    /// `defense_block - attack_block`; negative means the defense landed first.
    pub fn block_diff(&self) -> Option<i64> {
        if matches!(self.status, OutcomeClass::DefendedByBackstop) && self.attack_tx_index.is_none() {
            return Some(0);
        }
        self.defense_block
            .map(|defense| defense as i64 - self.attack_block as i64)
    }
}

pub fn classify(input: &RaceInput) -> Result<OutcomeClass, ArbiterError> {
    let (attack_at, attack_status) = match input.attack {
        AttackSettlement::RejectedByBackstop { .. } => {
            return Ok(OutcomeClass::DefendedByBackstop);
        }
        AttackSettlement::Included { at, status } => (at, status),
    };

    if !input.triggered {
        if input.defense.is_some() {
            return Err(ArbiterError::UnexpectedDefense);
        }
        return Ok(match attack_status {
            AttackStatus::RevertedByBackstop => OutcomeClass::DefendedByBackstop,
            AttackStatus::Succeeded => OutcomeClass::UndetectedAttackSucceeded,
            AttackStatus::RevertedOther => OutcomeClass::AttackRevertedUnattributed,
        });
    }

    let defense_at = input.defense.ok_or(ArbiterError::MissingDefense)?;
    if defense_at == attack_at {
        return Err(ArbiterError::DuplicateInclusion {
            block: defense_at.block,
            index: defense_at.index,
        });
    }

    if defense_at < attack_at {
        return Ok(if defense_at.block < attack_at.block {
            OutcomeClass::DefendedFrontRun
        } else {
            OutcomeClass::DefendedPriorityWin
        });
    }
    if defense_at.block == attack_at.block {
        return Ok(OutcomeClass::FailedPriorityLoss);
    }
    Ok(match attack_status {
        AttackStatus::RevertedByBackstop => OutcomeClass::DefendedLateBackstop,
        AttackStatus::Succeeded => OutcomeClass::FailedLate,
        AttackStatus::RevertedOther => OutcomeClass::AttackRevertedUnattributed,
    })
}

/// Classifies and assembles the per-iteration record.
pub fn arbitrate(input: &RaceInput, defense_gas: u64) -> Result<RaceOutcome, ArbiterError> {
    let status = classify(input)?;
    let (attack_block, attack_tx_index) = match input.attack {
        AttackSettlement::Included { at, .. } => (at.block, Some(at.index)),
        AttackSettlement::RejectedByBackstop { observed_block } => (observed_block, None),
    };
    let rejected_early = attack_tx_index.is_none();
    Ok(RaceOutcome {
        triggered: input.triggered,
        defended: status.is_success(),
        attack_block,
        attack_tx_index,
        defense_block: input.defense.map(|d| d.block),
        defense_tx_index: input.defense.map(|d| d.index),
        status,
        gas_cost: if rejected_early { 0 } else { defense_gas },
    })
}
