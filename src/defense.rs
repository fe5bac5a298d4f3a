//! Watchtower defense submission.

use crate::error::{ConfigError, LedgerError, SubmissionError};
use crate::ledger::{ContractCall, LedgerGateway, Receipt, RevertCategory, TxStatus};
use crate::scenario::DefenseAction;
use crate::signer::{sign_pause, Identity, SignedAuthorization};
use alloy::primitives::Address;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_FEE_MULTIPLIER_BPS: u64 = 15_000;

/// Defense bid = observed market fee scaled by `multiplier_bps / 10_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub multiplier_bps: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            multiplier_bps: DEFAULT_FEE_MULTIPLIER_BPS,
        }
    }
}

impl FeePolicy {
    pub fn from_multiplier(multiplier: f64) -> Result<Self, ConfigError> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "defense fee multiplier {multiplier} must be a positive number"
            )));
        }
        Ok(Self {
            multiplier_bps: (multiplier * 10_000.0).round() as u64,
        })
    }

    pub fn bid(&self, market_fee: u128) -> u128 {
        market_fee.saturating_mul(self.multiplier_bps as u128) / 10_000
    }
}

/// Submits a signed pause and waits for it to be mined.
///
/// A pause that reverts because the contract is already paused still counts as landed; the
/// system is halted either way. An `Invalid signature` revert means the nonce moved between read
/// and inclusion and is reported as `StaleNonce`, carrying the gas it burned.
pub async fn submit_defense(
    ledger: &dyn LedgerGateway,
    signed: &SignedAuthorization,
    submitter: &Identity,
    fee_policy: FeePolicy,
) -> Result<(Receipt, Duration), SubmissionError> {
    let started = Instant::now();
    let fee = fee_policy.bid(ledger.market_fee().await?);
    let call = ContractCall::PauseByWatchtower {
        signature: signed.signature().clone(),
    };
    let receipt = match ledger.submit(call, submitter, fee).await {
        Ok(receipt) => receipt,
        Err(LedgerError::Rejected { reason })
            if matches!(
                crate::ledger::classify_revert_reason(&reason),
                RevertCategory::InvalidSignature
            ) =>
        {
            return Err(SubmissionError::StaleNonce {
                signer: submitter.address(),
                nonce: signed.nonce(),
                gas_used: 0,
            });
        }
        Err(err) => return Err(err.into()),
    };
    let latency = started.elapsed();

    match &receipt.status {
        TxStatus::Success | TxStatus::Reverted(RevertCategory::Paused) => Ok((receipt, latency)),
        TxStatus::Reverted(RevertCategory::InvalidSignature) => Err(SubmissionError::StaleNonce {
            signer: submitter.address(),
            nonce: signed.nonce(),
            gas_used: receipt.gas_used,
        }),
        TxStatus::Reverted(category) => Err(SubmissionError::Reverted {
            reason: category.reason().to_string(),
            gas_used: receipt.gas_used,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefenseReport {
    pub receipt: Receipt,
    pub latency: Duration,
    /// What actually landed; a failed freeze or a safe-mode request both end up as `Pause`.
    pub action_taken: DefenseAction,
    pub fallback: bool,
    pub stale_retries: u32,
    /// Gas across every defense transaction of the iteration, wasted ones included.
    pub gas_spent: u64,
}

pub struct DefenseSubmitter<'a> {
    ledger: &'a dyn LedgerGateway,
    watchtower: &'a Identity,
    owner: &'a Identity,
    fee_policy: FeePolicy,
}

impl<'a> DefenseSubmitter<'a> {
    pub fn new(
        ledger: &'a dyn LedgerGateway,
        watchtower: &'a Identity,
        owner: &'a Identity,
        fee_policy: FeePolicy,
    ) -> Self {
        Self {
            ledger,
            watchtower,
            owner,
            fee_policy,
        }
    }

    pub async fn execute(
        &self,
        action: DefenseAction,
        attacker: Address,
    ) -> Result<DefenseReport, SubmissionError> {
        let started = Instant::now();
        match action {
            DefenseAction::Pause => self.pause(started, false, 0).await,
            DefenseAction::VaultSafeMode => {
                tracing::info!("[DEFENSE] vault has no safe-mode surface; substituting system pause");
                self.pause(started, true, 0).await
            }
            DefenseAction::WalletFreeze => {
                let fee = self.fee_policy.bid(self.ledger.market_fee().await?);
                let outcome = self
                    .ledger
                    .submit(ContractCall::BlacklistAccount { account: attacker }, self.owner, fee)
                    .await;
                match outcome {
                    Ok(receipt) if receipt.status.is_success() => {
                        tracing::info!(
                            "[DEFENSE] attacker {:#x} frozen in block {} (index {})",
                            attacker,
                            receipt.block_number,
                            receipt.transaction_index
                        );
                        Ok(DefenseReport {
                            gas_spent: receipt.gas_used,
                            latency: started.elapsed(),
                            receipt,
                            action_taken: DefenseAction::WalletFreeze,
                            fallback: false,
                            stale_retries: 0,
                        })
                    }
                    Ok(receipt) => {
                        tracing::warn!(
                            "[DEFENSE] wallet freeze reverted ({:?}); falling back to pause",
                            receipt.status
                        );
                        self.pause(started, true, receipt.gas_used).await
                    }
                    Err(err) => {
                        tracing::warn!("[DEFENSE] wallet freeze failed ({err}); falling back to pause");
                        self.pause(started, true, 0).await
                    }
                }
            }
        }
    }

    async fn sign_fresh(&self) -> Result<SignedAuthorization, SubmissionError> {
        let chain_id = self.ledger.chain_id().await?;
        let token = self.ledger.contracts().token;
        let nonce = self.ledger.get_nonce(self.watchtower.address()).await?;
        sign_pause(chain_id, token, nonce, self.watchtower)
            .map_err(|err| SubmissionError::Signing(err.to_string()))
    }

    async fn pause(
        &self,
        started: Instant,
        fallback: bool,
        prior_gas: u64,
    ) -> Result<DefenseReport, SubmissionError> {
        let mut gas_spent = prior_gas;
        let mut stale_retries = 0u32;
        loop {
            let signed = self.sign_fresh().await?;
            match submit_defense(self.ledger, &signed, self.watchtower, self.fee_policy).await {
                Ok((receipt, _)) => {
                    gas_spent = gas_spent.saturating_add(receipt.gas_used);
                    tracing::info!(
                        "[DEFENSE] pause landed in block {} (index {}) with nonce {}",
                        receipt.block_number,
                        receipt.transaction_index,
                        signed.nonce()
                    );
                    return Ok(DefenseReport {
                        receipt,
                        latency: started.elapsed(),
                        action_taken: DefenseAction::Pause,
                        fallback,
                        stale_retries,
                        gas_spent,
                    });
                }
                Err(SubmissionError::StaleNonce {
                    signer,
                    nonce,
                    gas_used,
                }) => {
                    gas_spent = gas_spent.saturating_add(gas_used);
                    if stale_retries >= 1 {
                        tracing::error!(
                            "[DEFENSE] nonce {} stale again after re-sign; giving up this iteration",
                            nonce
                        );
                        return Err(SubmissionError::StaleNonce {
                            signer,
                            nonce,
                            gas_used: gas_spent,
                        });
                    }
                    tracing::warn!("[DEFENSE] nonce {} was stale; re-reading and re-signing once", nonce);
                    stale_retries += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
