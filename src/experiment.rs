//! Monte Carlo experiment loop.
//!
//! Iterations run strictly one after another. Inside an iteration the attack is broadcast first
//! and the watchtower reacts after the sampled latency; both settle concurrently and the arbiter
//! classifies the pair. The contract is restored (un-paused, un-frozen) and any flash loan repaid
//! before the next iteration starts, whether the iteration completed or errored.

use crate::arbiter::{
    arbitrate, AttackSettlement, AttackStatus, Inclusion, OutcomeClass, RaceInput, RaceOutcome,
};
use crate::defense::{DefenseReport, DefenseSubmitter, FeePolicy};
use crate::error::{HarnessError, LedgerError, Result};
use crate::ledger::{
    classify_revert_reason, tokens_to_wei, wei_to_tokens, ContractCall, LedgerGateway,
    RevertCategory, TxStatus, ViewQuery,
};
use crate::scenario::{
    AttackAttempt, AttackKind, DefenseAction, Detection, DetectionContext, ScenarioConfig,
    ScenarioGenerator,
};
use crate::signer::Identity;
use alloy::primitives::U256;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const RESTORE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct Participants {
    pub watchtower: Identity,
    pub attacker: Identity,
    pub owner: Identity,
    /// Funds the flash-loan leg.
    pub lender: Identity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedIteration {
    pub iteration: u32,
    pub attack_kind: AttackKind,
    pub threshold: f64,
    pub attempt: AttackAttempt,
    pub detection: Detection,
    pub outcome: RaceOutcome,
    pub defense_action: Option<DefenseAction>,
    pub defense_latency: Option<Duration>,
    pub restore_failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErroredIteration {
    pub iteration: u32,
    pub attack_kind: AttackKind,
    pub threshold: f64,
    pub magnitude: Option<f64>,
    /// Defense gas burned before the failure.
    pub gas_cost: u64,
    pub kind: &'static str,
    pub message: String,
}

/// Side effects of an iteration that outlive its result and drive cleanup.
#[derive(Debug, Clone, Default)]
struct IterationTrace {
    magnitude: Option<f64>,
    borrowed: bool,
    freeze_sent: bool,
    defense_gas: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IterationRecord {
    Completed(CompletedIteration),
    Errored(ErroredIteration),
}

impl IterationRecord {
    pub fn iteration(&self) -> u32 {
        match self {
            IterationRecord::Completed(done) => done.iteration,
            IterationRecord::Errored(failed) => failed.iteration,
        }
    }

    pub fn status_label(&self) -> String {
        match self {
            IterationRecord::Completed(done) => done.outcome.status.as_str().to_string(),
            IterationRecord::Errored(failed) => format!("ERRORED:{}", failed.kind),
        }
    }
}

/// Append-only record of one run.
#[derive(Debug, Clone, Default)]
pub struct ExperimentLog {
    records: Vec<IterationRecord>,
}

impl ExperimentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn completed(&self) -> impl Iterator<Item = &CompletedIteration> {
        self.records.iter().filter_map(|record| match record {
            IterationRecord::Completed(done) => Some(done),
            IterationRecord::Errored(_) => None,
        })
    }

    pub fn outcome_labels(&self) -> Vec<String> {
        self.records.iter().map(IterationRecord::status_label).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSummary {
    pub attack_kind: AttackKind,
    pub defense_action: DefenseAction,
    pub total: u32,
    pub completed: u32,
    pub errored: u32,
    pub triggered: u32,
    pub successful_triggered: u32,
    /// Percent of completed iterations that triggered a defense.
    pub trigger_rate_pct: f64,
    /// Percent of triggered iterations that ended in a `DEFENDED_*` class.
    pub success_rate_pct: f64,
    pub mean_gas_cost: f64,
    pub mean_defense_latency_ms: f64,
    pub backstop_only_defenses: u32,
    pub restore_failures: u32,
    pub status_counts: BTreeMap<String, u32>,
}

impl ExperimentSummary {
    pub fn from_log(
        log: &ExperimentLog,
        attack_kind: AttackKind,
        defense_action: DefenseAction,
        restore_failures: u32,
    ) -> Self {
        let total = log.len() as u32;
        let mut completed = 0u32;
        let mut triggered = 0u32;
        let mut successful_triggered = 0u32;
        let mut triggered_gas = 0u128;
        let mut backstop_only = 0u32;
        let mut latency_total_ms = 0u128;
        let mut latency_samples = 0u32;
        let mut status_counts = BTreeMap::new();

        for record in log.records() {
            *status_counts.entry(record.status_label()).or_insert(0u32) += 1;
        }
        for done in log.completed() {
            completed += 1;
            if done.outcome.triggered {
                triggered += 1;
                triggered_gas += done.outcome.gas_cost as u128;
                if done.outcome.status.is_success() {
                    successful_triggered += 1;
                }
            }
            if matches!(
                done.outcome.status,
                OutcomeClass::DefendedByBackstop | OutcomeClass::DefendedLateBackstop
            ) {
                backstop_only += 1;
            }
            if let Some(latency) = done.defense_latency {
                latency_total_ms += latency.as_millis();
                latency_samples += 1;
            }
        }

        Self {
            attack_kind,
            defense_action,
            total,
            completed,
            errored: total - completed,
            triggered,
            successful_triggered,
            trigger_rate_pct: percent(triggered, completed),
            success_rate_pct: percent(successful_triggered, triggered),
            mean_gas_cost: mean(triggered_gas, triggered),
            mean_defense_latency_ms: mean(latency_total_ms, latency_samples),
            backstop_only_defenses: backstop_only,
            restore_failures,
            status_counts,
        }
    }
}

fn percent(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

fn mean(sum: u128, count: u32) -> f64 {
    if count == 0 {
        return 0.0;
    }
    sum as f64 / count as f64
}

impl fmt::Display for ExperimentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} / {}: {} iterations ({} completed, {} errored)",
            self.attack_kind.label(),
            self.defense_action.as_str(),
            self.total,
            self.completed,
            self.errored
        )?;
        writeln!(
            f,
            "trigger rate {:.1}% | defense success rate {:.1}% | mean gas {:.0} | mean defense latency {:.0}ms",
            self.trigger_rate_pct,
            self.success_rate_pct,
            self.mean_gas_cost,
            self.mean_defense_latency_ms
        )?;
        write!(
            f,
            "backstop-only defenses {} | restore failures {}",
            self.backstop_only_defenses, self.restore_failures
        )
    }
}

pub struct Orchestrator {
    ledger: Arc<dyn LedgerGateway>,
    participants: Participants,
    fee_policy: FeePolicy,
    log: ExperimentLog,
}

impl Orchestrator {
    pub fn new(ledger: Arc<dyn LedgerGateway>, participants: Participants, fee_policy: FeePolicy) -> Self {
        Self {
            ledger,
            participants,
            fee_policy,
            log: ExperimentLog::new(),
        }
    }

    pub fn log(&self) -> &ExperimentLog {
        &self.log
    }

    pub async fn run(&mut self, config: &ScenarioConfig) -> Result<ExperimentSummary> {
        config.validate()?;
        self.log.clear();
        let mut generator = ScenarioGenerator::new(config);
        let mut restore_failures = 0u32;
        let mut lingering_freeze = false;
        tracing::info!(
            "[RACE] starting {} x {} (threshold {}, action {}, seed {:?})",
            config.iterations,
            config.attack_kind.label(),
            config.detection_threshold,
            config.defense_action.as_str(),
            config.seed
        );

        for iteration in 1..=config.iterations {
            match self.ensure_ready(lingering_freeze).await {
                Ok(()) => lingering_freeze = false,
                Err(err) => {
                    restore_failures += 1;
                    tracing::error!("[RESTORE] iteration {} skipped: {}", iteration, err);
                    let err = HarnessError::StatePrecondition(err.to_string());
                    self.log.append(IterationRecord::Errored(ErroredIteration {
                        iteration,
                        attack_kind: config.attack_kind,
                        threshold: config.detection_threshold,
                        magnitude: None,
                        gas_cost: 0,
                        kind: err.kind(),
                        message: err.to_string(),
                    }));
                    continue;
                }
            }

            let mut trace = IterationTrace::default();
            let result = self
                .run_iteration(iteration, config, &mut generator, &mut trace)
                .await;
            let restore = self.restore_state(trace.freeze_sent).await;
            if let Err(err) = &restore {
                restore_failures += 1;
                lingering_freeze = trace.freeze_sent;
                tracing::error!("[RESTORE] iteration {}: {}", iteration, err);
            }
            if trace.borrowed {
                if let Some(magnitude) = trace.magnitude {
                    self.repay_flash_loan(magnitude).await;
                }
            }

            match result {
                Ok(mut done) => {
                    done.restore_failed = restore.is_err();
                    self.log.append(IterationRecord::Completed(done));
                }
                Err(err) => {
                    tracing::warn!("[RACE] iteration {} errored ({}): {}", iteration, err.kind(), err);
                    self.log.append(IterationRecord::Errored(ErroredIteration {
                        iteration,
                        attack_kind: config.attack_kind,
                        threshold: config.detection_threshold,
                        magnitude: trace.magnitude,
                        gas_cost: trace.defense_gas,
                        kind: err.kind(),
                        message: err.to_string(),
                    }));
                }
            }
        }

        let summary = ExperimentSummary::from_log(
            &self.log,
            config.attack_kind,
            config.defense_action,
            restore_failures,
        );
        tracing::info!("[RACE] run finished\n{}", summary);
        Ok(summary)
    }

    async fn run_iteration(
        &self,
        iteration: u32,
        config: &ScenarioConfig,
        generator: &mut ScenarioGenerator,
        trace: &mut IterationTrace,
    ) -> Result<CompletedIteration> {
        let ledger = &*self.ledger;
        let market_fee = ledger.market_fee().await?;
        let attempt = generator.next_attempt(market_fee);
        trace.magnitude = Some(attempt.magnitude);

        let ctx = if config.attack_kind.needs_reserve() {
            DetectionContext {
                reserve_balance: wei_to_tokens(ledger.call_view(ViewQuery::ReserveBalance).await?),
            }
        } else {
            DetectionContext::default()
        };
        let detection = config
            .attack_kind
            .detect(attempt.magnitude, config.detection_threshold, &ctx);
        tracing::info!(
            "[RACE] iteration {}: {} magnitude={:.0} metric={:.2} threshold={} triggered={} fee_x={:.3} latency={}ms",
            iteration,
            config.attack_kind.label(),
            attempt.magnitude,
            detection.metric,
            config.detection_threshold,
            detection.triggered,
            attempt.fee_multiplier,
            attempt.simulated_latency.as_millis()
        );

        if config.attack_kind == AttackKind::FlashLoanDepeg {
            self.borrow_flash_loan(attempt.magnitude, market_fee).await?;
            trace.borrowed = true;
        }

        let attacker = &self.participants.attacker;
        let attack_call = config.attack_kind.attack_call(attempt.magnitude);
        let attack_tx = match ledger
            .broadcast(attack_call, attacker, attempt.simulated_gas_price)
            .await
        {
            Ok(tx) => tx,
            Err(LedgerError::Rejected { reason }) if classify_revert_reason(&reason).is_backstop() => {
                tracing::info!("[RACE] iteration {}: backstop refused the attack before inclusion", iteration);
                let observed_block = ledger.block_number().await?;
                let input = RaceInput {
                    triggered: detection.triggered,
                    attack: AttackSettlement::RejectedByBackstop { observed_block },
                    defense: None,
                };
                let outcome = arbitrate(&input, 0)?;
                return Ok(CompletedIteration {
                    iteration,
                    attack_kind: config.attack_kind,
                    threshold: config.detection_threshold,
                    attempt,
                    detection,
                    outcome,
                    defense_action: None,
                    defense_latency: None,
                    restore_failed: false,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let submitter = DefenseSubmitter::new(
            ledger,
            &self.participants.watchtower,
            &self.participants.owner,
            self.fee_policy,
        );
        let defense = async {
            if !detection.triggered {
                return None;
            }
            tokio::time::sleep(attempt.simulated_latency).await;
            Some(submitter.execute(config.defense_action, attacker.address()).await)
        };
        let (attack_receipt, defense) = tokio::join!(ledger.await_receipt(attack_tx), defense);
        if let Some(result) = &defense {
            trace.freeze_sent = config.defense_action == DefenseAction::WalletFreeze;
            trace.defense_gas = match result {
                Ok(report) => report.gas_spent,
                Err(err) => err.gas_used(),
            };
        }
        let attack_receipt = attack_receipt?;
        let defense: Option<DefenseReport> = defense.transpose()?;

        let status = match &attack_receipt.status {
            TxStatus::Success => AttackStatus::Succeeded,
            TxStatus::Reverted(RevertCategory::Backstop) => AttackStatus::RevertedByBackstop,
            TxStatus::Reverted(_) => AttackStatus::RevertedOther,
        };
        let input = RaceInput {
            triggered: detection.triggered,
            attack: AttackSettlement::Included {
                at: Inclusion::new(attack_receipt.block_number, attack_receipt.transaction_index),
                status,
            },
            defense: defense.as_ref().map(|report| {
                Inclusion::new(report.receipt.block_number, report.receipt.transaction_index)
            }),
        };
        let outcome = arbitrate(&input, defense.as_ref().map_or(0, |report| report.gas_spent))?;
        tracing::info!(
            "[RACE] iteration {} -> {} (attack {}:{}, defense {})",
            iteration,
            outcome.status.as_str(),
            attack_receipt.block_number,
            attack_receipt.transaction_index,
            defense.as_ref().map_or_else(
                || "n/a".to_string(),
                |report| format!("{}:{}", report.receipt.block_number, report.receipt.transaction_index)
            )
        );

        Ok(CompletedIteration {
            iteration,
            attack_kind: config.attack_kind,
            threshold: config.detection_threshold,
            attempt,
            detection,
            outcome,
            defense_action: defense.as_ref().map(|report| report.action_taken),
            defense_latency: defense.as_ref().map(|report| report.latency),
            restore_failed: false,
        })
    }

    async fn borrow_flash_loan(&self, magnitude: f64, fee: u128) -> Result<()> {
        let receipt = self
            .ledger
            .submit(
                ContractCall::Transfer {
                    to: self.participants.attacker.address(),
                    amount: tokens_to_wei(magnitude),
                },
                &self.participants.lender,
                fee,
            )
            .await?;
        match receipt.status {
            TxStatus::Success => Ok(()),
            TxStatus::Reverted(category) => Err(LedgerError::Rejected {
                reason: format!("flash-loan borrow reverted: {}", category.reason()),
            }
            .into()),
        }
    }

    /// Returns whatever the dump left behind. Failures are logged, never fatal.
    async fn repay_flash_loan(&self, magnitude: f64) {
        if let Err(err) = self.try_repay(magnitude).await {
            tracing::debug!("[RACE] flash-loan repay skipped: {}", err);
        }
    }

    async fn try_repay(&self, magnitude: f64) -> Result<()> {
        let attacker = &self.participants.attacker;
        let held = self
            .ledger
            .call_view(ViewQuery::BalanceOf(attacker.address()))
            .await?;
        let owed = held.min(tokens_to_wei(magnitude));
        if owed == U256::ZERO {
            return Ok(());
        }
        let fee = self.ledger.market_fee().await?;
        let receipt = self
            .ledger
            .submit(
                ContractCall::Transfer {
                    to: self.participants.lender.address(),
                    amount: owed,
                },
                attacker,
                fee,
            )
            .await?;
        if !receipt.status.is_success() {
            tracing::debug!("[RACE] flash-loan repay reverted: {:?}", receipt.status);
        }
        Ok(())
    }

    /// Start-of-iteration precondition: unpaused, and no freeze left over from a failed restore.
    async fn ensure_ready(&self, lingering_freeze: bool) -> Result<()> {
        if !lingering_freeze && !self.ledger.is_paused().await? {
            return Ok(());
        }
        tracing::warn!("[RESTORE] previous iteration left the system halted; restoring once more");
        self.restore_state(lingering_freeze).await.map(|_| ())
    }

    /// Resumes (and un-freezes) the contract, retrying up to `RESTORE_ATTEMPTS` times.
    async fn restore_state(&self, unfreeze: bool) -> Result<u32> {
        let mut last_reason = String::new();
        for attempt in 1..=RESTORE_ATTEMPTS {
            match self.try_restore(unfreeze).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!("[RESTORE] state restored on attempt {}", attempt);
                    }
                    return Ok(attempt);
                }
                Err(err) => {
                    tracing::warn!("[RESTORE] attempt {}/{} failed: {}", attempt, RESTORE_ATTEMPTS, err);
                    last_reason = err.to_string();
                }
            }
        }
        Err(HarnessError::StateRestore {
            attempts: RESTORE_ATTEMPTS,
            reason: last_reason,
        })
    }

    async fn try_restore(&self, unfreeze: bool) -> Result<()> {
        let owner = &self.participants.owner;
        let fee = self.fee_policy.bid(self.ledger.market_fee().await?);
        if unfreeze {
            let receipt = self
                .ledger
                .submit(
                    ContractCall::UnblacklistAccount {
                        account: self.participants.attacker.address(),
                    },
                    owner,
                    fee,
                )
                .await?;
            if let TxStatus::Reverted(category) = receipt.status {
                return Err(LedgerError::Rejected {
                    reason: format!("unblacklistAccount reverted: {}", category.reason()),
                }
                .into());
            }
        }
        if self.ledger.is_paused().await? {
            let receipt = self
                .ledger
                .submit(ContractCall::ResumeService, owner, fee)
                .await?;
            if let TxStatus::Reverted(category) = &receipt.status {
                tracing::debug!("[RESTORE] resumeService reverted: {}", category.reason());
            }
        }
        if self.ledger.is_paused().await? {
            return Err(LedgerError::Rejected {
                reason: "still paused after resumeService".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
